//! Access facts
//!
//! Every mutation of the override store and the request workflow is recorded
//! as an [`AccessFact`]. Facts are committed in batches; a batch is the unit
//! of atomicity, so an approval and the override it creates always land
//! together.

use chrono::{DateTime, Utc};
use clearance_core::{Decision, Override, OverrideId, OverrideRequest, RequestId, UserId};
use serde::{Deserialize, Serialize};

/// Type identifier written into every journal record.
pub const ACCESS_FACT_TYPE_ID: &str = "clearance/access/v1";

/// Store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum AccessFact {
    /// A new override was recorded
    OverrideGranted {
        /// Full override record
        grant: Override,
    },
    /// An override was revoked early
    OverrideRevoked {
        /// Revoked override
        override_id: OverrideId,
        /// Revoking administrator
        revoked_by: UserId,
        /// Revocation time
        revoked_at: DateTime<Utc>,
    },
    /// An override's window was pushed out
    OverrideExtended {
        /// Extended override
        override_id: OverrideId,
        /// New end of window
        valid_until: DateTime<Utc>,
        /// Administrator who extended it
        extended_by: UserId,
        /// Extension time
        extended_at: DateTime<Utc>,
    },
    /// The sweep deactivated a lapsed override
    OverrideExpired {
        /// Lapsed override
        override_id: OverrideId,
        /// Sweep time
        expired_at: DateTime<Utc>,
    },
    /// The expiring-soon notice for an override went out
    OverrideExpiryNoticed {
        /// Override about to lapse
        override_id: OverrideId,
        /// Notice time
        noticed_at: DateTime<Utc>,
    },
    /// A request was opened
    RequestOpened {
        /// Full request record
        request: OverrideRequest,
    },
    /// A request was approved; always committed with the matching grant
    RequestApproved {
        /// Approved request
        request_id: RequestId,
        /// Decision record
        decision: Decision,
        /// Override created by the approval
        override_id: OverrideId,
        /// Duration actually granted
        granted_duration_hours: u32,
    },
    /// A request was denied
    RequestDenied {
        /// Denied request
        request_id: RequestId,
        /// Decision record
        decision: Decision,
    },
    /// The requester withdrew a request
    RequestCancelled {
        /// Withdrawn request
        request_id: RequestId,
        /// Requester
        cancelled_by: UserId,
        /// Withdrawal time
        cancelled_at: DateTime<Utc>,
    },
    /// A stale request had its approver set widened
    RequestEscalated {
        /// Escalated request
        request_id: RequestId,
        /// Approvers added
        added_approvers: Vec<UserId>,
        /// Escalation time
        escalated_at: DateTime<Utc>,
    },
    /// An abandoned request was closed
    RequestExpired {
        /// Abandoned request
        request_id: RequestId,
        /// Sweep time
        expired_at: DateTime<Utc>,
    },
}

impl AccessFact {
    /// Fact type name for logs.
    pub fn fact_type(&self) -> &'static str {
        match self {
            AccessFact::OverrideGranted { .. } => "override_granted",
            AccessFact::OverrideRevoked { .. } => "override_revoked",
            AccessFact::OverrideExtended { .. } => "override_extended",
            AccessFact::OverrideExpired { .. } => "override_expired",
            AccessFact::OverrideExpiryNoticed { .. } => "override_expiry_noticed",
            AccessFact::RequestOpened { .. } => "request_opened",
            AccessFact::RequestApproved { .. } => "request_approved",
            AccessFact::RequestDenied { .. } => "request_denied",
            AccessFact::RequestCancelled { .. } => "request_cancelled",
            AccessFact::RequestEscalated { .. } => "request_escalated",
            AccessFact::RequestExpired { .. } => "request_expired",
        }
    }
}

/// One atomically committed group of facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactBatch {
    /// Record type tag
    pub fact_type_id: String,
    /// Monotonic batch sequence number, starting at 1
    pub sequence: u64,
    /// Commit time
    pub recorded_at: DateTime<Utc>,
    /// Facts in application order
    pub facts: Vec<AccessFact>,
}

impl FactBatch {
    /// Wrap `facts` as batch number `sequence`.
    pub fn new(sequence: u64, recorded_at: DateTime<Utc>, facts: Vec<AccessFact>) -> Self {
        Self {
            fact_type_id: ACCESS_FACT_TYPE_ID.to_string(),
            sequence,
            recorded_at,
            facts,
        }
    }
}
