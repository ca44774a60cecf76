//! Quality-adaptive retrieval
//!
//! Search starts at `min_k` candidates and grows `k` geometrically until the
//! quality metric clears the threshold or `max_k` is reached. Below threshold
//! at `max_k`, one optional rerank pass runs. The loop is bounded by
//! construction: at most `log_growth(max_k / min_k) + 1` searches and one
//! rerank.
//!
//! Infrastructure failures end the retrieval immediately; only low quality
//! triggers escalation. Candidates are re-checked against the filter locally
//! and kept in collaborator order.

use crate::errors::RetrievalFailure;
use crate::quality::QualityMetric;
use crate::search::{DocumentCandidate, RerankEffects, SearchError, VectorSearchEffects};
use clearance_cache::normalize_query;
use clearance_core::{AccessFilter, AccessLevel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Fan-out, threshold and collaborator bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// First fan-out
    pub min_k: usize,
    /// Largest fan-out
    pub max_k: usize,
    /// Multiplier applied to `k` on each escalation
    pub k_growth_factor: usize,
    /// Quality required to stop early
    pub quality_threshold: f64,
    /// Quality metric
    pub quality_metric: QualityMetric,
    /// Run the rerank pass when quality stays low at `max_k`
    pub rerank_enabled: bool,
    /// Bound on each collaborator call
    pub collaborator_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_k: 5,
            max_k: 20,
            k_growth_factor: 2,
            quality_threshold: 0.5,
            quality_metric: QualityMetric::TopScore,
            rerank_enabled: false,
            collaborator_timeout: Duration::from_secs(5),
        }
    }
}

impl RetrievalConfig {
    /// Next fan-out after `k`, never above `max_k` and always growing.
    pub fn next_k(&self, k: usize) -> usize {
        k.saturating_mul(self.k_growth_factor)
            .max(k + 1)
            .min(self.max_k)
    }
}

/// Successful retrieval. Only these are ever cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Permitted candidates in collaborator (or reranker) order
    pub documents: Vec<DocumentCandidate>,
    /// Highest required level among `documents`
    pub max_access_level_seen: AccessLevel,
    /// Final quality score
    pub quality: f64,
    /// Whether `quality` cleared the threshold
    pub quality_passed: bool,
    /// Fan-out of the last search
    pub k: usize,
    /// Number of search calls made
    pub searches: u32,
    /// Whether the rerank pass ran
    pub reranked: bool,
}

/// Highest required level among `documents`, `NONE` when empty.
pub fn max_access_level(documents: &[DocumentCandidate]) -> AccessLevel {
    documents
        .iter()
        .map(|d| d.access_level)
        .max()
        .unwrap_or(AccessLevel::NONE)
}

/// Adaptive retrieval orchestrator.
#[derive(Clone)]
pub struct AdaptiveRetriever {
    search: Arc<dyn VectorSearchEffects>,
    reranker: Option<Arc<dyn RerankEffects>>,
    config: RetrievalConfig,
}

impl AdaptiveRetriever {
    /// Orchestrator over `search`, with an optional `reranker`.
    pub fn new(
        search: Arc<dyn VectorSearchEffects>,
        reranker: Option<Arc<dyn RerankEffects>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            search,
            reranker,
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    async fn search_bounded(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<DocumentCandidate>, RetrievalFailure> {
        let bound = self.config.collaborator_timeout;
        timeout(bound, self.search.search(query, k, filter))
            .await
            .unwrap_or(Err(SearchError::Timeout(bound)))
            .map_err(|e| RetrievalFailure::from_search("search", e))
    }

    async fn rerank_bounded(
        &self,
        reranker: &dyn RerankEffects,
        query: &str,
        candidates: Vec<DocumentCandidate>,
    ) -> Result<Vec<DocumentCandidate>, RetrievalFailure> {
        let bound = self.config.collaborator_timeout;
        timeout(bound, reranker.rerank(query, candidates))
            .await
            .unwrap_or(Err(SearchError::Timeout(bound)))
            .map_err(|e| RetrievalFailure::from_search("rerank", e))
    }

    /// Retrieve documents for `query_text` visible through `filter`.
    pub async fn retrieve(
        &self,
        query_text: &str,
        filter: &AccessFilter,
    ) -> Result<RetrievalOutcome, RetrievalFailure> {
        let query = normalize_query(query_text);
        let threshold = self.config.quality_threshold;
        let metric = self.config.quality_metric;

        let mut k = self.config.min_k.max(1);
        let mut searches = 0u32;
        let mut candidates;
        let mut quality;

        loop {
            let mut hits = self.search_bounded(&query, k, filter).await?;
            searches += 1;
            hits.truncate(k);
            hits.retain(|c| c.permitted_by(filter));
            candidates = hits;
            quality = metric.score(&candidates);
            debug!(k, searches, quality, candidates = candidates.len(), "Search pass");

            if quality >= threshold || k >= self.config.max_k {
                break;
            }
            k = self.config.next_k(k);
        }

        let mut reranked = false;
        if quality < threshold && self.config.rerank_enabled && !candidates.is_empty() {
            if let Some(reranker) = &self.reranker {
                let mut rescored = self
                    .rerank_bounded(reranker.as_ref(), &query, candidates)
                    .await?;
                rescored.retain(|c| c.permitted_by(filter));
                candidates = rescored;
                quality = metric.score(&candidates);
                reranked = true;
                debug!(quality, "Rerank pass");
            }
        }

        if candidates.is_empty() {
            return Err(RetrievalFailure::NoCandidates { k });
        }

        let outcome = RetrievalOutcome {
            max_access_level_seen: max_access_level(&candidates),
            quality_passed: quality >= threshold,
            documents: candidates,
            quality,
            k,
            searches,
            reranked,
        };
        info!(
            k = outcome.k,
            searches = outcome.searches,
            reranked = outcome.reranked,
            quality = outcome.quality,
            quality_passed = outcome.quality_passed,
            documents = outcome.documents.len(),
            max_level = outcome.max_access_level_seen.rank(),
            "Retrieval complete"
        );
        Ok(outcome)
    }
}
