//! Override request state machine
//!
//! ```text
//! Pending ──escalate──▶ PendingEscalated
//!    │                        │
//!    ├──approve / deny / cancel / expire──▶ terminal
//! ```
//!
//! Terminal states (`Approved`, `Denied`, `Cancelled`, `Expired`) are final.
//! Escalation widens the approver set and never removes anyone from it.

use crate::{AccessError, AccessLevel, DocumentId, OverrideId, RequestId, Scope, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Input for opening a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOverrideRequest {
    /// User asking for the elevation
    pub requester_id: UserId,
    /// Scope asked for
    pub scope: Scope,
    /// Level asked for
    pub requested_level: AccessLevel,
    /// Duration asked for
    pub requested_duration_hours: u32,
    /// Why the user needs it
    pub reason: String,
    /// Query that hit the clearance wall, if any
    pub trigger_query: Option<String>,
    /// Document that hit the clearance wall, if any
    pub trigger_document_id: Option<DocumentId>,
}

/// Who decided, when, and with what notes. Always populated together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Deciding approver
    pub approver_id: UserId,
    /// Free-form notes
    pub notes: Option<String>,
    /// Decision time
    pub decided_at: DateTime<Utc>,
}

/// Tagged request state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestState {
    /// Awaiting a decision from the original approver set.
    Pending,
    /// Awaiting a decision after the approver set was widened.
    PendingEscalated,
    /// Approved; an override was created.
    Approved {
        /// Decision record
        decision: Decision,
        /// Override created by the approval
        override_id: OverrideId,
        /// Duration actually granted
        granted_duration_hours: u32,
    },
    /// Denied by an approver.
    Denied {
        /// Decision record
        decision: Decision,
    },
    /// Withdrawn by the requester.
    Cancelled {
        /// Withdrawal time
        cancelled_at: DateTime<Utc>,
    },
    /// Left undecided past the request lifetime.
    Expired {
        /// Expiry time
        expired_at: DateTime<Utc>,
    },
}

/// Flat status view of [`RequestState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting decision (escalated or not)
    Pending,
    /// Approved
    Approved,
    /// Denied
    Denied,
    /// Expired
    Expired,
    /// Cancelled
    Cancelled,
}

impl RequestState {
    /// Flat status.
    pub fn status(&self) -> RequestStatus {
        match self {
            RequestState::Pending | RequestState::PendingEscalated => RequestStatus::Pending,
            RequestState::Approved { .. } => RequestStatus::Approved,
            RequestState::Denied { .. } => RequestStatus::Denied,
            RequestState::Cancelled { .. } => RequestStatus::Cancelled,
            RequestState::Expired { .. } => RequestStatus::Expired,
        }
    }

    /// Whether a decision can still be made.
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::Pending | RequestState::PendingEscalated)
    }
}

/// A pending or decided ask for elevation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    /// Unique identifier
    pub id: RequestId,
    /// Requesting user
    pub requester_id: UserId,
    /// Scope asked for
    pub scope: Scope,
    /// Level asked for
    pub requested_level: AccessLevel,
    /// Duration asked for
    pub requested_duration_hours: u32,
    /// Requester's justification
    pub reason: String,
    /// Query that triggered the request
    pub trigger_query: Option<String>,
    /// Document that triggered the request
    pub trigger_document_id: Option<DocumentId>,
    /// Current state
    pub state: RequestState,
    /// Users allowed to decide
    pub approver_ids: BTreeSet<UserId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When the approver set was widened, if it was
    pub escalated_at: Option<DateTime<Utc>>,
}

impl OverrideRequest {
    /// Validate `input` and open a pending request routed to `approvers`.
    pub fn open(
        id: RequestId,
        input: NewOverrideRequest,
        approvers: BTreeSet<UserId>,
        max_duration_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, AccessError> {
        if input.reason.trim().is_empty() {
            return Err(AccessError::invalid_request("request reason must not be empty"));
        }
        if !input.requested_level.is_grantable() {
            return Err(AccessError::invalid_request(format!(
                "level {} cannot be requested",
                input.requested_level
            )));
        }
        validate_duration(input.requested_duration_hours, max_duration_hours)?;

        Ok(Self {
            id,
            requester_id: input.requester_id,
            scope: input.scope,
            requested_level: input.requested_level,
            requested_duration_hours: input.requested_duration_hours,
            reason: input.reason.trim().to_string(),
            trigger_query: input.trigger_query,
            trigger_document_id: input.trigger_document_id,
            state: RequestState::Pending,
            approver_ids: approvers,
            created_at: now,
            escalated_at: None,
        })
    }

    /// Flat status.
    pub fn status(&self) -> RequestStatus {
        self.state.status()
    }

    /// Whether the approver set was widened by the sweep.
    pub fn auto_escalated(&self) -> bool {
        self.escalated_at.is_some()
    }

    /// Deciding approver, once decided.
    pub fn approver_id(&self) -> Option<UserId> {
        self.decision().map(|d| d.approver_id)
    }

    /// Decision time, once decided.
    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decision().map(|d| d.decided_at)
    }

    /// Approver notes, once decided.
    pub fn approval_notes(&self) -> Option<&str> {
        self.decision().and_then(|d| d.notes.as_deref())
    }

    fn decision(&self) -> Option<&Decision> {
        match &self.state {
            RequestState::Approved { decision, .. } | RequestState::Denied { decision } => {
                Some(decision)
            }
            _ => None,
        }
    }

    /// Whether `user` may approve or deny this request.
    pub fn can_be_decided_by(&self, user: UserId) -> bool {
        self.approver_ids.contains(&user)
    }

    /// Pending, not yet escalated, and older than `timeout`.
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        matches!(self.state, RequestState::Pending) && now - self.created_at >= timeout
    }

    /// Pending (escalated or not) and older than `ttl`.
    pub fn is_abandoned(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.state.is_pending() && now - self.created_at >= ttl
    }

    fn ensure_pending(&self) -> Result<(), AccessError> {
        if self.state.is_pending() {
            Ok(())
        } else {
            Err(AccessError::AlreadyDecided {
                request_id: self.id,
                status: self.status(),
            })
        }
    }

    fn ensure_approver(&self, user: UserId) -> Result<(), AccessError> {
        if self.can_be_decided_by(user) {
            Ok(())
        } else {
            Err(AccessError::NotAnApprover {
                request_id: self.id,
                user_id: user,
            })
        }
    }

    /// Check that `approver` may approve with `duration_hours`, without mutating.
    pub fn check_approval(
        &self,
        approver: UserId,
        duration_hours: u32,
        max_duration_hours: u32,
    ) -> Result<(), AccessError> {
        self.ensure_pending()?;
        self.ensure_approver(approver)?;
        validate_duration(duration_hours, max_duration_hours)
    }

    /// `Pending → Approved`.
    pub fn approve(
        &mut self,
        decision: Decision,
        override_id: OverrideId,
        granted_duration_hours: u32,
    ) -> Result<(), AccessError> {
        self.ensure_pending()?;
        self.ensure_approver(decision.approver_id)?;
        self.state = RequestState::Approved {
            decision,
            override_id,
            granted_duration_hours,
        };
        Ok(())
    }

    /// Check that `approver` may deny, without mutating.
    pub fn check_denial(&self, approver: UserId) -> Result<(), AccessError> {
        self.ensure_pending()?;
        self.ensure_approver(approver)
    }

    /// `Pending → Denied`.
    pub fn deny(&mut self, decision: Decision) -> Result<(), AccessError> {
        self.check_denial(decision.approver_id)?;
        self.state = RequestState::Denied { decision };
        Ok(())
    }

    /// Check that `user` may cancel, without mutating.
    pub fn check_cancel(&self, user: UserId) -> Result<(), AccessError> {
        self.ensure_pending()?;
        if user != self.requester_id {
            return Err(AccessError::invalid_request(format!(
                "only the requester may cancel {}",
                self.id
            )));
        }
        Ok(())
    }

    /// `Pending → Cancelled`, requester only.
    pub fn cancel(&mut self, user: UserId, now: DateTime<Utc>) -> Result<(), AccessError> {
        self.check_cancel(user)?;
        self.state = RequestState::Cancelled { cancelled_at: now };
        Ok(())
    }

    /// `Pending → PendingEscalated`, adding `extra_approvers` to the set.
    ///
    /// Existing approvers stay eligible.
    pub fn escalate(
        &mut self,
        extra_approvers: impl IntoIterator<Item = UserId>,
        now: DateTime<Utc>,
    ) -> Result<(), AccessError> {
        match self.state {
            RequestState::Pending => {
                self.approver_ids.extend(extra_approvers);
                self.state = RequestState::PendingEscalated;
                self.escalated_at = Some(now);
                Ok(())
            }
            RequestState::PendingEscalated => Err(AccessError::invalid_request(format!(
                "{} is already escalated",
                self.id
            ))),
            _ => self.ensure_pending(),
        }
    }

    /// `Pending → Expired`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), AccessError> {
        self.ensure_pending()?;
        self.state = RequestState::Expired { expired_at: now };
        Ok(())
    }
}

fn validate_duration(hours: u32, max_hours: u32) -> Result<(), AccessError> {
    if hours == 0 || hours > max_hours {
        return Err(AccessError::invalid_request(format!(
            "duration must be between 1 and {max_hours} hours, got {hours}"
        )));
    }
    Ok(())
}
