//! Typed retrieval failures

use crate::search::SearchError;
use clearance_core::AccessError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a retrieval produced nothing cacheable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RetrievalFailure {
    /// Search or rerank collaborator could not be reached or refused.
    #[error("{stage} collaborator unavailable: {message}")]
    CollaboratorUnavailable {
        /// `search` or `rerank`
        stage: String,
        /// Underlying cause
        message: String,
    },
    /// A collaborator call exceeded its bound.
    #[error("{stage} collaborator timed out after {after:?}")]
    Timeout {
        /// `search` or `rerank`
        stage: String,
        /// The bound that was exceeded
        after: Duration,
    },
    /// Full escalation found nothing the requester may see.
    #[error("no permitted candidates after escalating to k={k}")]
    NoCandidates {
        /// Largest fan-out tried
        k: usize,
    },
}

impl RetrievalFailure {
    pub(crate) fn from_search(stage: &str, error: SearchError) -> Self {
        match error {
            SearchError::Timeout(after) => Self::Timeout {
                stage: stage.to_string(),
                after,
            },
            SearchError::Unavailable(message) | SearchError::Rejected(message) => {
                Self::CollaboratorUnavailable {
                    stage: stage.to_string(),
                    message,
                }
            }
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CollaboratorUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
            Self::Timeout { .. } => "RETRIEVAL_TIMEOUT",
            Self::NoCandidates { .. } => "NO_RESULTS",
        }
    }

    /// Infrastructure failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoCandidates { .. })
    }
}

impl From<RetrievalFailure> for AccessError {
    fn from(failure: RetrievalFailure) -> Self {
        AccessError::retrieval_failure(failure.to_string())
    }
}
