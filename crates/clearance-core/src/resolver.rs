//! Effective permission resolver
//!
//! The computation itself is a pure function over a fully loaded
//! `UserAccessProfile + [Override]` value:
//!
//! ```text
//! org(U)    = max(org_level, org-wide overrides)
//! dept(U,d) = max(org_level, department_level[d] or 0, overrides covering d)
//! ```
//!
//! Overrides only ever enter through a `max`, so adding one never lowers the
//! result and removing one never raises it. Overrides that are revoked, outside
//! their window, or owned by someone else contribute 0.
//!
//! [`PermissionResolver`] wraps the pure core with collaborator lookups and
//! fails closed: any lookup failure resolves to [`AccessLevel::NONE`].

use crate::{
    AccessError, AccessLevel, AccessResult, DepartmentId, EffectiveAccess, IdentityEffects,
    IdentityError, Override, OverrideSource, PhysicalClock, Scope, UserAccessProfile, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Effective level of `profile` for `scope` at `now`.
pub fn resolve(
    profile: &UserAccessProfile,
    overrides: &[Override],
    scope: &Scope,
    now: DateTime<Utc>,
) -> AccessLevel {
    let base = match scope {
        Scope::OrgWide => profile.org_level,
        Scope::Department(dept) => profile
            .org_level
            .max(profile.department_level(*dept).unwrap_or(AccessLevel::NONE)),
    };

    overrides
        .iter()
        .filter(|o| o.user_id == profile.user_id && o.contributes_to(scope, now))
        .map(|o| o.level)
        .fold(base, AccessLevel::max)
}

/// Resolve every scope the user can reach at `now`.
///
/// Departments covered are those with a base assignment plus those named by
/// an effective department override.
pub fn resolve_all(
    profile: &UserAccessProfile,
    overrides: &[Override],
    now: DateTime<Utc>,
) -> EffectiveAccess {
    let mut departments: BTreeSet<DepartmentId> =
        profile.department_levels.keys().copied().collect();
    departments.extend(
        overrides
            .iter()
            .filter(|o| o.user_id == profile.user_id && o.is_effective(now))
            .filter_map(|o| o.scope.department()),
    );

    let department_levels: BTreeMap<DepartmentId, AccessLevel> = departments
        .into_iter()
        .map(|d| (d, resolve(profile, overrides, &Scope::Department(d), now)))
        .collect();

    EffectiveAccess {
        user_id: profile.user_id,
        org_level: resolve(profile, overrides, &Scope::OrgWide, now),
        department_levels,
        degraded: false,
    }
}

/// Everything a resolution read, kept together for summaries.
#[derive(Debug, Clone)]
pub struct AccessSnapshot {
    /// Base clearance
    pub profile: UserAccessProfile,
    /// Overrides effective at resolution time
    pub overrides: Vec<Override>,
    /// Resolved access
    pub access: EffectiveAccess,
}

/// Collaborator-backed resolver.
///
/// Holds no state of its own and is safe to share across request tasks.
/// Results are never cached: override changes must be visible on the next call.
#[derive(Clone)]
pub struct PermissionResolver {
    identity: Arc<dyn IdentityEffects>,
    overrides: Arc<dyn OverrideSource>,
    clock: Arc<dyn PhysicalClock>,
}

impl PermissionResolver {
    /// Create a resolver over the given collaborators.
    pub fn new(
        identity: Arc<dyn IdentityEffects>,
        overrides: Arc<dyn OverrideSource>,
        clock: Arc<dyn PhysicalClock>,
    ) -> Self {
        Self {
            identity,
            overrides,
            clock,
        }
    }

    /// Load profile and overrides, then resolve.
    ///
    /// An unknown user resolves to no access. An unreachable identity store or
    /// override store is surfaced as an error so the caller can report it.
    pub async fn snapshot(&self, user: UserId) -> AccessResult<AccessSnapshot> {
        let now = self.clock.now();
        let profile = match self.identity.user_access_profile(user).await {
            Ok(profile) => profile,
            Err(IdentityError::UnknownUser(_)) => {
                tracing::debug!(user_id = %user, "unknown user resolves to no access");
                UserAccessProfile::no_access(user)
            }
            Err(IdentityError::Unavailable { reason }) => {
                return Err(AccessError::identity_unavailable(reason));
            }
        };
        let overrides = self.overrides.effective_overrides(user, now).await?;
        let access = resolve_all(&profile, &overrides, now);

        tracing::debug!(
            user_id = %user,
            org_level = %access.org_level,
            departments = access.department_levels.len(),
            overrides = overrides.len(),
            "resolved effective access"
        );

        Ok(AccessSnapshot {
            profile,
            overrides,
            access,
        })
    }

    /// Resolved access, failing closed with `degraded` set on any lookup error.
    pub async fn effective_access(&self, user: UserId) -> EffectiveAccess {
        match self.snapshot(user).await {
            Ok(snapshot) => snapshot.access,
            Err(err) => {
                tracing::warn!(user_id = %user, error = %err, "access resolution failed closed");
                EffectiveAccess::fail_closed(user)
            }
        }
    }

    /// `resolve(userID, scope) → AccessLevel`; never errors.
    pub async fn resolve(&self, user: UserId, scope: Scope) -> AccessLevel {
        self.effective_access(user).await.level_for(&scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OverrideId, RequestId};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn grant(user: u64, scope: Scope, level: AccessLevel) -> Override {
        Override {
            id: OverrideId::new(),
            user_id: UserId(user),
            scope,
            level,
            valid_from: now() - Duration::days(1),
            valid_until: now() + Duration::days(1),
            is_active: true,
            reason: "test".into(),
            granted_by: UserId(0),
            created_at: now() - Duration::days(1),
            request_id: Some(RequestId::new()),
            revoked_at: None,
            revoked_by: None,
            expiry_notice_sent: false,
        }
    }

    #[test]
    fn org_scope_ignores_department_grants() {
        let profile = UserAccessProfile::new(UserId(1), AccessLevel::INTERNAL);
        let overrides = [grant(1, Scope::Department(DepartmentId(4)), AccessLevel::MAX)];
        assert_eq!(
            resolve(&profile, &overrides, &Scope::OrgWide, now()),
            AccessLevel::INTERNAL
        );
    }

    #[test]
    fn org_wide_grant_lifts_every_department() {
        let profile = UserAccessProfile::new(UserId(1), AccessLevel::GENERAL)
            .with_department(DepartmentId(2), AccessLevel::INTERNAL);
        let overrides = [grant(1, Scope::OrgWide, AccessLevel::CONFIDENTIAL)];
        let access = resolve_all(&profile, &overrides, now());
        assert_eq!(access.org_level, AccessLevel::CONFIDENTIAL);
        assert_eq!(
            access.level_for(&Scope::Department(DepartmentId(2))),
            AccessLevel::CONFIDENTIAL
        );
    }

    #[test]
    fn department_level_never_drops_below_org_level() {
        let profile = UserAccessProfile::new(UserId(1), AccessLevel::CONFIDENTIAL)
            .with_department(DepartmentId(2), AccessLevel::GENERAL);
        assert_eq!(
            resolve(&profile, &[], &Scope::Department(DepartmentId(2)), now()),
            AccessLevel::CONFIDENTIAL
        );
    }

    #[test]
    fn department_override_adds_department_to_access() {
        let profile = UserAccessProfile::new(UserId(1), AccessLevel::GENERAL);
        let overrides = [grant(1, Scope::Department(DepartmentId(9)), AccessLevel::INTERNAL)];
        let access = resolve_all(&profile, &overrides, now());
        assert_eq!(
            access.department_levels.get(&DepartmentId(9)),
            Some(&AccessLevel::INTERNAL)
        );
    }

    #[test]
    fn foreign_overrides_are_ignored() {
        let profile = UserAccessProfile::new(UserId(1), AccessLevel::GENERAL);
        let overrides = [grant(2, Scope::OrgWide, AccessLevel::MAX)];
        assert_eq!(
            resolve(&profile, &overrides, &Scope::OrgWide, now()),
            AccessLevel::GENERAL
        );
    }

    #[test]
    fn lapsed_or_revoked_overrides_contribute_nothing() {
        let profile = UserAccessProfile::new(UserId(1), AccessLevel::GENERAL);

        let mut revoked = grant(1, Scope::OrgWide, AccessLevel::MAX);
        revoked.is_active = false;
        let mut lapsed = grant(1, Scope::OrgWide, AccessLevel::MAX);
        lapsed.valid_until = now() - Duration::seconds(1);

        assert_eq!(
            resolve(&profile, &[revoked, lapsed], &Scope::OrgWide, now()),
            AccessLevel::GENERAL
        );
    }
}
