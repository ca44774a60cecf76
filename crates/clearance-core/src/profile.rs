//! Base clearance assignment owned by the identity subsystem

use crate::{AccessLevel, DepartmentId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user's administratively assigned clearance.
///
/// Read-only input to the resolver. Absent department entries mean the user
/// holds no department-specific assignment there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccessProfile {
    /// Owner of the profile
    pub user_id: UserId,
    /// Organization-wide base level
    pub org_level: AccessLevel,
    /// Department-specific base levels
    #[serde(default)]
    pub department_levels: BTreeMap<DepartmentId, AccessLevel>,
}

impl UserAccessProfile {
    /// Profile with an org level and no department assignments.
    pub fn new(user_id: UserId, org_level: AccessLevel) -> Self {
        Self {
            user_id,
            org_level,
            department_levels: BTreeMap::new(),
        }
    }

    /// The profile every fail-closed path resolves against.
    pub fn no_access(user_id: UserId) -> Self {
        Self::new(user_id, AccessLevel::NONE)
    }

    /// Add a department assignment.
    pub fn with_department(mut self, department: DepartmentId, level: AccessLevel) -> Self {
        self.department_levels.insert(department, level);
        self
    }

    /// Department-specific base level, if assigned.
    pub fn department_level(&self, department: DepartmentId) -> Option<AccessLevel> {
        self.department_levels.get(&department).copied()
    }

    /// Whether the user belongs to any department.
    pub fn has_department_assignment(&self) -> bool {
        !self.department_levels.is_empty()
    }
}
