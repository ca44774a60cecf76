//! Periodic maintenance sweep
//!
//! Runs independently of request traffic. Every step commits through the
//! store, so resolutions running concurrently see either the pre-sweep or the
//! post-sweep version of each override and request.

use crate::overrides::OverrideStore;
use crate::workflow::RequestWorkflow;
use chrono::Duration;
use clearance_core::AccessResult;
use serde::{Deserialize, Serialize};

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Lapsed overrides flipped to inactive
    pub overrides_expired: usize,
    /// Expiring-soon notices sent
    pub expiry_notices: usize,
    /// Requests closed after the request lifetime
    pub requests_expired: usize,
    /// Requests whose approver set was widened
    pub requests_escalated: usize,
}

impl SweepReport {
    /// Whether the sweep changed anything.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Override expiry, expiring-soon notices, request expiry and escalation.
#[derive(Clone)]
pub struct MaintenanceSweep {
    overrides: OverrideStore,
    workflow: RequestWorkflow,
    expiring_soon: Duration,
}

impl MaintenanceSweep {
    /// Sweep over the given stores, noticing overrides that end within `expiring_soon`.
    pub fn new(overrides: OverrideStore, workflow: RequestWorkflow, expiring_soon: Duration) -> Self {
        Self {
            overrides,
            workflow,
            expiring_soon,
        }
    }

    /// Run every step once.
    ///
    /// Abandoned requests expire before escalation so a request past its
    /// lifetime is closed rather than escalated.
    pub async fn run_once(&self) -> AccessResult<SweepReport> {
        let report = SweepReport {
            overrides_expired: self.overrides.cleanup_expired().await?.len(),
            expiry_notices: self.overrides.notify_expiring(self.expiring_soon).await?,
            requests_expired: self.workflow.expire_abandoned().await?.len(),
            requests_escalated: self.workflow.escalate_stale().await?.len(),
        };

        if report.is_empty() {
            tracing::debug!("maintenance sweep found nothing to do");
        } else {
            tracing::info!(
                overrides_expired = report.overrides_expired,
                expiry_notices = report.expiry_notices,
                requests_expired = report.requests_expired,
                requests_escalated = report.requests_escalated,
                "maintenance sweep complete"
            );
        }
        Ok(report)
    }
}
