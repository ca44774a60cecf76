//! Time-bound elevation grants
//!
//! An [`Override`] raises a user's level for a scope during a validity window.
//! It is effective iff it is active *and* the window contains "now". The two
//! conditions are independent: a revoked override inside its window and an
//! active override past its window both contribute nothing.

use crate::{AccessError, AccessLevel, OverrideId, RequestId, Scope, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input for creating an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOverride {
    /// User receiving the elevation
    pub user_id: UserId,
    /// Scope of the elevation
    pub scope: Scope,
    /// Granted level
    pub level: AccessLevel,
    /// Start of the validity window
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (must be after `valid_from`)
    pub valid_until: DateTime<Utc>,
    /// Mandatory audit reason
    pub reason: String,
    /// Administrator or approver who granted it
    pub granted_by: UserId,
    /// Request this override fulfils, if it came from the workflow
    pub request_id: Option<RequestId>,
}

/// A granted elevation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    /// Unique identifier
    pub id: OverrideId,
    /// User holding the elevation
    pub user_id: UserId,
    /// Scope of the elevation
    pub scope: Scope,
    /// Granted level
    pub level: AccessLevel,
    /// Start of the validity window
    pub valid_from: DateTime<Utc>,
    /// End of the validity window
    pub valid_until: DateTime<Utc>,
    /// Manual revocation flag, independent of the window
    pub is_active: bool,
    /// Audit reason
    pub reason: String,
    /// Who granted it
    pub granted_by: UserId,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
    /// Originating request, if any
    #[serde(default)]
    pub request_id: Option<RequestId>,
    /// When it was revoked, if it was revoked early
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Who revoked it
    #[serde(default)]
    pub revoked_by: Option<UserId>,
    /// Whether the expiring-soon notice went out
    #[serde(default)]
    pub expiry_notice_sent: bool,
}

impl Override {
    /// Validate `input` and build the override record.
    ///
    /// Rejects windows that do not strictly advance, empty reasons, and
    /// non-grantable levels before anything is persisted.
    pub fn create(id: OverrideId, input: NewOverride, now: DateTime<Utc>) -> Result<Self, AccessError> {
        if input.valid_until <= input.valid_from {
            return Err(AccessError::InvalidOverrideWindow {
                valid_from: input.valid_from,
                valid_until: input.valid_until,
            });
        }
        if input.reason.trim().is_empty() {
            return Err(AccessError::invalid_request("override reason must not be empty"));
        }
        if !input.level.is_grantable() {
            return Err(AccessError::invalid_request(format!(
                "level {} cannot be granted",
                input.level
            )));
        }

        Ok(Self {
            id,
            user_id: input.user_id,
            scope: input.scope,
            level: input.level,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            is_active: true,
            reason: input.reason.trim().to_string(),
            granted_by: input.granted_by,
            created_at: now,
            request_id: input.request_id,
            revoked_at: None,
            revoked_by: None,
            expiry_notice_sent: false,
        })
    }

    /// `is_active ∧ valid_from ≤ now ≤ valid_until`
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from <= now && now <= self.valid_until
    }

    /// Whether this override raises the level resolved for `target` at `now`.
    pub fn contributes_to(&self, target: &Scope, now: DateTime<Utc>) -> bool {
        self.is_effective(now) && self.scope.covers(target)
    }

    /// Past its window. Lapsed overrides never contribute even if still flagged active.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Still flagged active but past its window; the sweep flips these.
    pub fn needs_expiry(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.is_lapsed(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn input(from: DateTime<Utc>, until: DateTime<Utc>) -> NewOverride {
        NewOverride {
            user_id: UserId(1),
            scope: Scope::OrgWide,
            level: AccessLevel::CONFIDENTIAL,
            valid_from: from,
            valid_until: until,
            reason: "quarter close".into(),
            granted_by: UserId(99),
            request_id: None,
        }
    }

    #[test]
    fn rejects_window_that_does_not_advance() {
        let err = Override::create(OverrideId::new(), input(t0(), t0()), t0()).unwrap_err();
        assert_matches!(err, AccessError::InvalidOverrideWindow { .. });
    }

    #[test]
    fn rejects_blank_reason() {
        let mut new = input(t0(), t0() + Duration::days(1));
        new.reason = "   ".into();
        let err = Override::create(OverrideId::new(), new, t0()).unwrap_err();
        assert_matches!(err, AccessError::InvalidRequest { .. });
    }

    #[test]
    fn effective_only_inside_window_and_while_active() {
        let mut ovr =
            Override::create(OverrideId::new(), input(t0(), t0() + Duration::days(14)), t0())
                .unwrap();
        assert!(ovr.is_effective(t0()));
        assert!(ovr.is_effective(t0() + Duration::days(14)));
        assert!(!ovr.is_effective(t0() - Duration::seconds(1)));
        assert!(!ovr.is_effective(t0() + Duration::days(14) + Duration::seconds(1)));

        ovr.is_active = false;
        assert!(!ovr.is_effective(t0() + Duration::days(1)));
    }
}
