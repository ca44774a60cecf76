//! Fixed instants and profile builders

use chrono::{DateTime, TimeZone, Utc};
use clearance_core::{AccessLevel, DepartmentId, SimulatedClock, UserAccessProfile, UserId};

/// Monday 2025-01-06 09:00 UTC. Every suite starts its clock here.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
}

/// Simulated clock frozen at [`epoch`].
pub fn clock() -> SimulatedClock {
    SimulatedClock::new(epoch())
}

/// Org-only profile.
pub fn profile(user: u64, org_rank: u8) -> UserAccessProfile {
    UserAccessProfile::new(UserId(user), AccessLevel::from_rank(org_rank).unwrap())
}

/// Profile with one department assignment.
pub fn department_profile(user: u64, org_rank: u8, dept: u64, dept_rank: u8) -> UserAccessProfile {
    profile(user, org_rank).with_department(
        DepartmentId(dept),
        AccessLevel::from_rank(dept_rank).unwrap(),
    )
}
