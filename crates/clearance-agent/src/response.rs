//! Query response shape

use clearance_core::{AccessError, AccessLevel};
use clearance_retrieval::{DocumentCandidate, RetrievalFailure, RetrievalOutcome};
use serde::{Deserialize, Serialize};

/// Result of [`ClearanceService::query`](crate::ClearanceService::query).
///
/// A failed query carries a stable `error_code` and a user-facing `message`;
/// `offer_override_request` is set only when the failure is a clearance
/// denial, never for an outage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Whether documents were produced
    pub success: bool,
    /// Permitted documents, best first
    pub documents: Vec<DocumentCandidate>,
    /// `documents.len()`
    pub count: usize,
    /// Highest classification among `documents`
    pub max_access_level_seen: AccessLevel,
    /// Stable machine-readable failure code
    pub error_code: Option<String>,
    /// Human-readable failure message
    pub message: Option<String>,
    /// The caller may retry
    pub retryable: bool,
    /// The UI should offer an override request
    pub offer_override_request: bool,
    /// Served from the scoped cache
    pub cache_hit: bool,
    /// `org` or `dept`, once access was resolved
    pub scope_kind: Option<String>,
    /// Retrieval met the quality threshold
    pub quality_passed: bool,
}

impl QueryResponse {
    pub(crate) fn from_outcome(outcome: RetrievalOutcome, cache_hit: bool, scope_kind: &str) -> Self {
        Self {
            success: true,
            count: outcome.documents.len(),
            documents: outcome.documents,
            max_access_level_seen: outcome.max_access_level_seen,
            error_code: None,
            message: None,
            retryable: false,
            offer_override_request: false,
            cache_hit,
            scope_kind: Some(scope_kind.to_string()),
            quality_passed: outcome.quality_passed,
        }
    }

    fn failed(code: &str, message: String) -> Self {
        Self {
            success: false,
            documents: Vec::new(),
            count: 0,
            max_access_level_seen: AccessLevel::NONE,
            error_code: Some(code.to_string()),
            message: Some(message),
            retryable: false,
            offer_override_request: false,
            cache_hit: false,
            scope_kind: None,
            quality_passed: false,
        }
    }

    pub(crate) fn from_access_error(error: &AccessError) -> Self {
        Self {
            retryable: error.is_retryable(),
            offer_override_request: error.offers_override_request(),
            ..Self::failed(error.error_code(), error.user_message())
        }
    }

    pub(crate) fn from_failure(failure: &RetrievalFailure, scope_kind: &str) -> Self {
        let message = match failure {
            RetrievalFailure::NoCandidates { .. } => {
                "No documents within your clearance match this query.".to_string()
            }
            RetrievalFailure::CollaboratorUnavailable { .. } | RetrievalFailure::Timeout { .. } => {
                "Search is temporarily unavailable. Please try again shortly.".to_string()
            }
        };
        Self {
            retryable: failure.is_retryable(),
            scope_kind: Some(scope_kind.to_string()),
            ..Self::failed(failure.error_code(), message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearance_core::Scope;
    use std::time::Duration;

    #[test]
    fn denial_offers_a_request_and_outages_do_not() {
        let denied = QueryResponse::from_access_error(&AccessError::AccessDenied {
            scope: Scope::OrgWide,
            required: AccessLevel::GENERAL,
            effective: AccessLevel::NONE,
        });
        assert_eq!(denied.error_code.as_deref(), Some("ACCESS_DENIED"));
        assert!(denied.offer_override_request);
        assert!(!denied.retryable);

        let outage =
            QueryResponse::from_access_error(&AccessError::identity_unavailable("ldap down"));
        assert_eq!(outage.error_code.as_deref(), Some("IDENTITY_UNAVAILABLE"));
        assert!(!outage.offer_override_request);
        assert!(outage.retryable);
        assert_ne!(denied.message, outage.message);
    }

    #[test]
    fn retrieval_failures_keep_their_codes() {
        let timeout = QueryResponse::from_failure(
            &RetrievalFailure::Timeout {
                stage: "search".into(),
                after: Duration::from_secs(5),
            },
            "org",
        );
        assert_eq!(timeout.error_code.as_deref(), Some("RETRIEVAL_TIMEOUT"));
        assert!(timeout.retryable);
        assert!(!timeout.success);

        let empty = QueryResponse::from_failure(&RetrievalFailure::NoCandidates { k: 20 }, "dept");
        assert_eq!(empty.error_code.as_deref(), Some("NO_RESULTS"));
        assert!(!empty.retryable);
        assert_eq!(empty.scope_kind.as_deref(), Some("dept"));
    }
}
