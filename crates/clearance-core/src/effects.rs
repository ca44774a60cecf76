//! Collaborator effect traits
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: identity and notification adapters live outside the
//!   core; the override source is implemented by `clearance-store`
//! - **Usage**: the resolver, the request workflow and the agent runtime
//!
//! Handlers are constructed once at startup and passed in explicitly.

use crate::{
    AccessLevel, AccessResult, DepartmentId, Override, OverrideId, RequestId, RequestStatus,
    Scope, UserAccessProfile, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for identity lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum IdentityError {
    /// Directory could not be reached or answered garbage.
    #[error("Identity store unavailable: {reason}")]
    Unavailable {
        /// Underlying cause
        reason: String,
    },
    /// Directory answered and has no such user.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),
}

/// Identity and administration subsystem.
#[async_trait]
pub trait IdentityEffects: Send + Sync {
    /// Base clearance of `user`.
    async fn user_access_profile(&self, user: UserId) -> Result<UserAccessProfile, IdentityError>;

    /// Managers who may approve requests scoped to `department`.
    async fn department_managers(
        &self,
        department: DepartmentId,
    ) -> Result<Vec<UserId>, IdentityError>;

    /// Organization administrators.
    async fn administrators(&self) -> Result<Vec<UserId>, IdentityError>;
}

/// Read access to the overrides a resolution folds in.
#[async_trait]
pub trait OverrideSource: Send + Sync {
    /// Overrides of `user` that are active and whose window contains `at`.
    async fn effective_overrides(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> AccessResult<Vec<Override>>;
}

/// Fire-and-forget lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccessEvent {
    /// A request was opened and routed.
    RequestCreated {
        /// New request
        request_id: RequestId,
        /// Who asked
        requester_id: UserId,
        /// Scope asked for
        scope: Scope,
        /// Level asked for
        requested_level: AccessLevel,
        /// Who may decide
        approvers: Vec<UserId>,
    },
    /// A request reached a decision.
    RequestDecided {
        /// Decided request
        request_id: RequestId,
        /// Who asked
        requester_id: UserId,
        /// Outcome
        status: RequestStatus,
        /// Deciding approver
        approver_id: UserId,
    },
    /// A request sat undecided past the timeout and admins were added.
    RequestEscalated {
        /// Escalated request
        request_id: RequestId,
        /// Who asked
        requester_id: UserId,
        /// Approvers added by the escalation
        added_approvers: Vec<UserId>,
    },
    /// An override ends soon.
    OverrideExpiringSoon {
        /// Expiring override
        override_id: OverrideId,
        /// Holder
        user_id: UserId,
        /// End of window
        valid_until: DateTime<Utc>,
    },
    /// An override was revoked before its window ended.
    OverrideRevoked {
        /// Revoked override
        override_id: OverrideId,
        /// Holder
        user_id: UserId,
        /// Revoking administrator
        revoked_by: UserId,
    },
}

impl AccessEvent {
    /// Event name for logs and routing.
    pub fn name(&self) -> &'static str {
        match self {
            AccessEvent::RequestCreated { .. } => "request_created",
            AccessEvent::RequestDecided { .. } => "request_decided",
            AccessEvent::RequestEscalated { .. } => "request_escalated",
            AccessEvent::OverrideExpiringSoon { .. } => "override_expiring_soon",
            AccessEvent::OverrideRevoked { .. } => "override_revoked",
        }
    }
}

/// Notification delivery. Must not block and cannot fail from the caller's view.
pub trait NotificationEffects: Send + Sync {
    /// Hand `event` to the delivery subsystem.
    fn notify(&self, event: AccessEvent);
}

/// Default notifier that records events in the trace log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationEffects for TracingNotifier {
    fn notify(&self, event: AccessEvent) {
        tracing::info!(event = event.name(), details = ?event, "access notification");
    }
}
