//! Resolver monotonicity and override-window properties.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use clearance_core::{
    resolve, AccessLevel, AccessResult, DepartmentId, IdentityEffects, IdentityError, NewOverride,
    Override, OverrideId, OverrideSource, PermissionResolver, PhysicalClock, Scope,
    SimulatedClock, UserAccessProfile, UserId,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
}

fn level() -> impl Strategy<Value = AccessLevel> {
    (1u8..=AccessLevel::MAX.rank()).prop_map(|r| AccessLevel::from_rank(r).unwrap())
}

fn scope() -> impl Strategy<Value = Scope> {
    prop_oneof![
        Just(Scope::OrgWide),
        (0u64..4).prop_map(|d| Scope::Department(DepartmentId(d))),
    ]
}

prop_compose! {
    fn any_override()(
        scope in scope(),
        level in level(),
        start in -72i64..72,
        len in 1i64..96,
        active in any::<bool>(),
    ) -> Override {
        let mut o = Override::create(
            OverrideId::new(),
            NewOverride {
                user_id: UserId(1),
                scope,
                level,
                valid_from: t0() + Duration::hours(start),
                valid_until: t0() + Duration::hours(start + len),
                reason: "generated".into(),
                granted_by: UserId(99),
                request_id: None,
            },
            t0(),
        )
        .unwrap();
        o.is_active = active;
        o
    }
}

prop_compose! {
    fn any_profile()(
        org in 0u8..=AccessLevel::MAX.rank(),
        depts in proptest::collection::btree_map(0u64..4, level(), 0..3),
    ) -> UserAccessProfile {
        let mut profile = UserAccessProfile::new(UserId(1), AccessLevel::from_rank(org).unwrap());
        for (d, l) in depts {
            profile = profile.with_department(DepartmentId(d), l);
        }
        profile
    }
}

proptest! {
    #[test]
    fn adding_an_override_never_lowers_the_level(
        profile in any_profile(),
        existing in proptest::collection::vec(any_override(), 0..5),
        extra in any_override(),
        target in scope(),
    ) {
        let before = resolve(&profile, &existing, &target, t0());
        let mut grown = existing.clone();
        grown.push(extra);
        let after = resolve(&profile, &grown, &target, t0());
        prop_assert!(after >= before);
    }

    #[test]
    fn revoking_an_override_never_raises_the_level(
        profile in any_profile(),
        overrides in proptest::collection::vec(any_override(), 1..6),
        victim in any::<prop::sample::Index>(),
        target in scope(),
    ) {
        let before = resolve(&profile, &overrides, &target, t0());
        let mut revoked = overrides.clone();
        let idx = victim.index(revoked.len());
        revoked[idx].is_active = false;
        prop_assert!(resolve(&profile, &revoked, &target, t0()) <= before);
    }

    #[test]
    fn lapsed_overrides_never_contribute(
        profile in any_profile(),
        mut o in any_override(),
        target in scope(),
    ) {
        o.is_active = true;
        o.valid_until = t0() - Duration::seconds(1);
        o.valid_from = o.valid_until - Duration::hours(1);
        prop_assert_eq!(
            resolve(&profile, &[o], &target, t0()),
            resolve(&profile, &[], &target, t0())
        );
    }

    #[test]
    fn inactive_overrides_never_contribute(
        profile in any_profile(),
        mut o in any_override(),
        target in scope(),
    ) {
        o.is_active = false;
        o.valid_from = t0() - Duration::hours(1);
        o.valid_until = t0() + Duration::hours(1);
        prop_assert_eq!(
            resolve(&profile, &[o], &target, t0()),
            resolve(&profile, &[], &target, t0())
        );
    }

    #[test]
    fn department_level_dominates_org_level(
        profile in any_profile(),
        overrides in proptest::collection::vec(any_override(), 0..5),
        dept in 0u64..4,
    ) {
        let org = resolve(&profile, &overrides, &Scope::OrgWide, t0());
        let dept = resolve(&profile, &overrides, &Scope::Department(DepartmentId(dept)), t0());
        prop_assert!(dept >= org);
    }
}

struct Directory(UserAccessProfile);

#[async_trait]
impl IdentityEffects for Directory {
    async fn user_access_profile(&self, user: UserId) -> Result<UserAccessProfile, IdentityError> {
        if user == self.0.user_id {
            Ok(self.0.clone())
        } else {
            Err(IdentityError::UnknownUser(user))
        }
    }

    async fn department_managers(&self, _: DepartmentId) -> Result<Vec<UserId>, IdentityError> {
        Ok(Vec::new())
    }

    async fn administrators(&self) -> Result<Vec<UserId>, IdentityError> {
        Ok(Vec::new())
    }
}

struct Offline;

#[async_trait]
impl IdentityEffects for Offline {
    async fn user_access_profile(&self, _: UserId) -> Result<UserAccessProfile, IdentityError> {
        Err(IdentityError::Unavailable {
            reason: "directory timeout".into(),
        })
    }

    async fn department_managers(&self, _: DepartmentId) -> Result<Vec<UserId>, IdentityError> {
        Ok(Vec::new())
    }

    async fn administrators(&self) -> Result<Vec<UserId>, IdentityError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct Grants(Mutex<Vec<Override>>);

#[async_trait]
impl OverrideSource for Grants {
    async fn effective_overrides(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> AccessResult<Vec<Override>> {
        Ok(self
            .0
            .lock()
            .iter()
            .filter(|o| o.user_id == user && o.is_effective(at))
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn fourteen_day_grant_lapses_with_the_clock() {
    let clock = SimulatedClock::new(t0());
    let user = UserId(7);
    let grants = Arc::new(Grants::default());
    let resolver = PermissionResolver::new(
        Arc::new(Directory(UserAccessProfile::new(user, AccessLevel::GENERAL))),
        grants.clone(),
        Arc::new(clock.clone()),
    );

    let grant = Override::create(
        OverrideId::new(),
        NewOverride {
            user_id: user,
            scope: Scope::OrgWide,
            level: AccessLevel::CONFIDENTIAL,
            valid_from: clock.now(),
            valid_until: clock.now() + Duration::days(14),
            reason: "quarter close".into(),
            granted_by: UserId(1),
            request_id: None,
        },
        clock.now(),
    )
    .unwrap();
    grants.0.lock().push(grant);

    assert!(resolver.resolve(user, Scope::OrgWide).await >= AccessLevel::CONFIDENTIAL);

    clock.advance(Duration::days(14) + Duration::seconds(1));
    assert_eq!(resolver.resolve(user, Scope::OrgWide).await, AccessLevel::GENERAL);
}

#[tokio::test]
async fn unreachable_identity_fails_closed() {
    let resolver = PermissionResolver::new(
        Arc::new(Offline),
        Arc::new(Grants::default()),
        Arc::new(SimulatedClock::new(t0())),
    );

    let access = resolver.effective_access(UserId(3)).await;
    assert!(access.degraded);
    assert_eq!(access.org_level, AccessLevel::NONE);
    assert!(resolver.snapshot(UserId(3)).await.is_err());
}

#[tokio::test]
async fn unknown_user_has_no_access_but_is_not_degraded() {
    let resolver = PermissionResolver::new(
        Arc::new(Directory(UserAccessProfile::new(UserId(1), AccessLevel::MAX))),
        Arc::new(Grants::default()),
        Arc::new(SimulatedClock::new(t0())),
    );

    let access = resolver.effective_access(UserId(2)).await;
    assert!(!access.degraded);
    assert_eq!(access.org_level, AccessLevel::NONE);
}
