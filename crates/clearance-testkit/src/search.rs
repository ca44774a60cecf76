//! Scripted vector search and reranker

use async_trait::async_trait;
use clearance_core::{AccessFilter, AccessLevel, DepartmentId, DocumentId};
use clearance_retrieval::{DocumentCandidate, RerankEffects, SearchError, VectorSearchEffects};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Org-wide candidate.
pub fn candidate(id: &str, score: f64, level_rank: u8) -> DocumentCandidate {
    DocumentCandidate {
        document_id: DocumentId::new(id),
        score,
        access_level: AccessLevel::from_rank(level_rank).unwrap(),
        department_id: None,
        department_only: false,
        content: format!("content of {id}"),
    }
}

/// Candidate owned by `dept`.
pub fn department_candidate(
    id: &str,
    score: f64,
    level_rank: u8,
    dept: u64,
    department_only: bool,
) -> DocumentCandidate {
    DocumentCandidate {
        department_id: Some(DepartmentId(dept)),
        department_only,
        ..candidate(id, score, level_rank)
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Answer,
    Fail(SearchError),
    Hang,
}

/// Search stub answering from a script keyed by fan-out.
///
/// A call with fan-out `k` answers from the entry with the largest
/// `from_k <= k`, truncated to `k`. Filtering is left to the caller unless
/// [`ScriptedSearch::filtering`] is enabled.
#[derive(Debug)]
pub struct ScriptedSearch {
    script: Mutex<BTreeMap<usize, Vec<DocumentCandidate>>>,
    mode: Mutex<Mode>,
    filtering: bool,
    calls: Mutex<Vec<(String, usize)>>,
}

impl Default for ScriptedSearch {
    fn default() -> Self {
        Self {
            script: Mutex::new(BTreeMap::new()),
            mode: Mutex::new(Mode::Answer),
            filtering: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedSearch {
    /// Stub with an empty script; every call returns nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls with `k >= from_k` with `hits`.
    pub fn respond(self, from_k: usize, hits: Vec<DocumentCandidate>) -> Self {
        self.script.lock().insert(from_k, hits);
        self
    }

    /// Apply the access filter like a real collaborator would.
    pub fn filtering(mut self) -> Self {
        self.filtering = true;
        self
    }

    /// Fail every subsequent call with `error`.
    pub fn fail_with(&self, error: SearchError) {
        *self.mode.lock() = Mode::Fail(error);
    }

    /// Never answer subsequent calls.
    pub fn hang(&self) {
        *self.mode.lock() = Mode::Hang;
    }

    /// Answer from the script again.
    pub fn recover(&self) {
        *self.mode.lock() = Mode::Answer;
    }

    /// `(query, k)` of every call so far.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().clone()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl VectorSearchEffects for ScriptedSearch {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<DocumentCandidate>, SearchError> {
        self.calls.lock().push((query.to_string(), k));
        let mode = self.mode.lock().clone();
        match mode {
            Mode::Answer => {}
            Mode::Fail(error) => return Err(error),
            Mode::Hang => std::future::pending::<()>().await,
        }

        let mut hits = self
            .script
            .lock()
            .range(..=k)
            .next_back()
            .map(|(_, hits)| hits.clone())
            .unwrap_or_default();
        if self.filtering {
            hits.retain(|c| c.permitted_by(filter));
        }
        hits.truncate(k);
        Ok(hits)
    }
}

/// Reranker assigning fixed scores by document id and reordering by them.
///
/// Unknown documents keep their score. Equal scores keep their input order.
#[derive(Debug, Default)]
pub struct ScriptedReranker {
    scores: BTreeMap<String, f64>,
    failure: Option<SearchError>,
    calls: AtomicUsize,
}

impl ScriptedReranker {
    /// Reranker with no score overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `id` as `score` after reranking.
    pub fn score(mut self, id: &str, score: f64) -> Self {
        self.scores.insert(id.to_string(), score);
        self
    }

    /// Fail every call with `error`.
    pub fn failing(mut self, error: SearchError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RerankEffects for ScriptedReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<DocumentCandidate>,
    ) -> Result<Vec<DocumentCandidate>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        for candidate in &mut candidates {
            if let Some(score) = self.scores.get(&candidate.document_id.0) {
                candidate.score = *score;
            }
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(candidates)
    }
}
