//! Result-set quality metrics

use crate::search::DocumentCandidate;
use serde::{Deserialize, Serialize};

/// How a candidate set is scored against the quality threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityMetric {
    /// Best single score
    #[default]
    TopScore,
    /// Mean of the `n` best scores
    MeanTopN {
        /// How many scores to average
        n: usize,
    },
}

impl QualityMetric {
    /// Quality of `candidates`; an empty set scores zero.
    ///
    /// Order of `candidates` is not changed.
    pub fn score(&self, candidates: &[DocumentCandidate]) -> f64 {
        if candidates.is_empty() {
            return 0.0;
        }
        match self {
            Self::TopScore => candidates
                .iter()
                .map(|c| c.score)
                .fold(f64::NEG_INFINITY, f64::max),
            Self::MeanTopN { n } => {
                let mut scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();
                scores.sort_by(|a, b| b.total_cmp(a));
                let take = (*n).clamp(1, scores.len());
                scores[..take].iter().sum::<f64>() / take as f64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearance_core::{AccessLevel, DocumentId};

    fn hits(scores: &[f64]) -> Vec<DocumentCandidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| DocumentCandidate {
                document_id: DocumentId::new(format!("d{i}")),
                score: *s,
                access_level: AccessLevel::GENERAL,
                department_id: None,
                department_only: false,
                content: String::new(),
            })
            .collect()
    }

    #[test]
    fn top_score_ignores_order() {
        assert_eq!(QualityMetric::TopScore.score(&hits(&[0.2, 0.9, 0.4])), 0.9);
        assert_eq!(QualityMetric::TopScore.score(&[]), 0.0);
    }

    #[test]
    fn mean_top_n_averages_best_scores() {
        let metric = QualityMetric::MeanTopN { n: 2 };
        assert!((metric.score(&hits(&[0.2, 0.9, 0.5])) - 0.7).abs() < 1e-9);
        assert!((metric.score(&hits(&[0.4])) - 0.4).abs() < 1e-9);
    }
}
