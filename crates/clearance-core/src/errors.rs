//! Unified error type for access-control operations
//!
//! Everything touching access-level computation is surfaced to the caller.
//! Only cache errors are absorbed, and they never reach this type.

use crate::{AccessLevel, OverrideId, RequestId, RequestStatus, Scope, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access-control error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AccessError {
    /// Effective level is below what the operation needs.
    #[error("Access denied for {scope}: requires {required}, effective {effective}")]
    AccessDenied {
        /// Scope the check ran against
        scope: Scope,
        /// Level the resource requires
        required: AccessLevel,
        /// Level the user holds
        effective: AccessLevel,
    },

    /// Identity subsystem could not be reached; resolution failed closed.
    #[error("Identity unavailable: {message}")]
    IdentityUnavailable {
        /// Underlying cause
        message: String,
    },

    /// Vector search or reranker failed or timed out.
    #[error("Retrieval collaborator failure: {message}")]
    RetrievalCollaboratorFailure {
        /// Underlying cause
        message: String,
    },

    /// Override window does not strictly advance.
    #[error("Invalid override window: {valid_from} .. {valid_until}")]
    InvalidOverrideWindow {
        /// Requested start
        valid_from: DateTime<Utc>,
        /// Requested end
        valid_until: DateTime<Utc>,
    },

    /// Malformed input (empty reason, bad level or duration, duplicate request).
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong
        message: String,
    },

    /// No such override request.
    #[error("Request not found: {request_id}")]
    RequestNotFound {
        /// Missing request
        request_id: RequestId,
    },

    /// No such override.
    #[error("Override not found: {override_id}")]
    OverrideNotFound {
        /// Missing override
        override_id: OverrideId,
    },

    /// Decision attempted on a request that is no longer pending.
    #[error("Request {request_id} already decided ({status:?})")]
    AlreadyDecided {
        /// Request in question
        request_id: RequestId,
        /// Its terminal status
        status: RequestStatus,
    },

    /// Decider is outside the request's approver set.
    #[error("{user_id} is not an approver for {request_id}")]
    NotAnApprover {
        /// Request in question
        request_id: RequestId,
        /// Rejected decider
        user_id: UserId,
    },

    /// Durable store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Underlying cause
        message: String,
    },
}

impl AccessError {
    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an identity unavailable error
    pub fn identity_unavailable(message: impl Into<String>) -> Self {
        Self::IdentityUnavailable {
            message: message.into(),
        }
    }

    /// Create a retrieval collaborator failure
    pub fn retrieval_failure(message: impl Into<String>) -> Self {
        Self::RetrievalCollaboratorFailure {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::IdentityUnavailable { .. } => "IDENTITY_UNAVAILABLE",
            Self::RetrievalCollaboratorFailure { .. } => "RETRIEVAL_UNAVAILABLE",
            Self::InvalidOverrideWindow { .. } => "INVALID_OVERRIDE_WINDOW",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::RequestNotFound { .. } => "REQUEST_NOT_FOUND",
            Self::OverrideNotFound { .. } => "OVERRIDE_NOT_FOUND",
            Self::AlreadyDecided { .. } => "ALREADY_DECIDED",
            Self::NotAnApprover { .. } => "NOT_AN_APPROVER",
            Self::Storage { .. } => "STORAGE_ERROR",
        }
    }

    /// Infrastructure errors a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IdentityUnavailable { .. }
                | Self::RetrievalCollaboratorFailure { .. }
                | Self::Storage { .. }
        )
    }

    /// Errors caused by the caller's input (404/409/422 equivalents).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOverrideWindow { .. }
                | Self::InvalidRequest { .. }
                | Self::RequestNotFound { .. }
                | Self::OverrideNotFound { .. }
                | Self::AlreadyDecided { .. }
                | Self::NotAnApprover { .. }
        )
    }

    /// Whether the UI should offer the override-request workflow.
    pub fn offers_override_request(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Message suitable for end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::AccessDenied { required, .. } => format!(
                "Your clearance is insufficient for this content (requires {}). You can request temporary access.",
                required.name()
            ),
            Self::IdentityUnavailable { .. } | Self::RetrievalCollaboratorFailure { .. } => {
                "This service is temporarily unavailable. Please try again shortly.".to_string()
            }
            Self::Storage { .. } => {
                "Access records are temporarily unavailable. Please try again shortly.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Standard result type for access-control operations
pub type AccessResult<T> = std::result::Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_and_outage_are_distinguishable() {
        let denied = AccessError::AccessDenied {
            scope: Scope::OrgWide,
            required: AccessLevel::CONFIDENTIAL,
            effective: AccessLevel::GENERAL,
        };
        let outage = AccessError::identity_unavailable("directory timeout");

        assert_ne!(denied.error_code(), outage.error_code());
        assert!(denied.offers_override_request());
        assert!(!outage.offers_override_request());
        assert!(outage.is_retryable());
        assert!(!denied.is_retryable());
        assert_ne!(denied.user_message(), outage.user_message());
    }
}
