//! Vector search and rerank effects
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementations**: external collaborators; scripted stubs in
//!   `clearance-testkit`
//! - **Usage**: only through [`crate::AdaptiveRetriever`], which bounds every
//!   call with a timeout and re-checks every candidate against the filter
//!
//! Both collaborators are opaque scoring functions.

use async_trait::async_trait;
use clearance_core::{AccessFilter, AccessLevel, DepartmentId, DocumentId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One search hit with the gating metadata of its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCandidate {
    /// Document the chunk belongs to
    pub document_id: DocumentId,
    /// Similarity or rerank score, higher is better
    pub score: f64,
    /// Level a reader must hold
    pub access_level: AccessLevel,
    /// Owning department, if any
    pub department_id: Option<DepartmentId>,
    /// Visible only to members of `department_id`
    pub department_only: bool,
    /// Retrieved text
    pub content: String,
}

impl DocumentCandidate {
    /// Whether `filter` admits this candidate.
    pub fn permitted_by(&self, filter: &AccessFilter) -> bool {
        filter.permits(self.access_level, self.department_id, self.department_only)
    }
}

/// Collaborator failure. Quality problems are not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// Collaborator could not be reached.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    /// Collaborator did not answer in time.
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
    /// Collaborator refused the request.
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

/// Nearest-neighbour search.
#[async_trait]
pub trait VectorSearchEffects: Send + Sync {
    /// Up to `k` candidates for `query`, best first, restricted by `filter`.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<DocumentCandidate>, SearchError>;
}

/// Optional second-stage scorer.
#[async_trait]
pub trait RerankEffects: Send + Sync {
    /// Re-score and reorder `candidates` for `query`.
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<DocumentCandidate>,
    ) -> Result<Vec<DocumentCandidate>, SearchError>;
}
