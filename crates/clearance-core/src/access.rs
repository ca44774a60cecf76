//! Resolved access and document gating
//!
//! [`EffectiveAccess`] is the resolver's output for one user at one instant.
//! [`AccessFilter`] is the part of it retrieval is allowed to see: levels and
//! department memberships, no identity. Document visibility is decided by the
//! filter alone so that two requesters with equal filters always see the same
//! documents.

use crate::{AccessLevel, DepartmentId, Override, Scope, UserAccessProfile, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Levels and memberships that gate document visibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessFilter {
    /// Effective organization-wide level
    pub org_level: AccessLevel,
    /// Effective level per department the holder can access
    pub departments: BTreeMap<DepartmentId, AccessLevel>,
}

impl AccessFilter {
    /// Filter that admits nothing.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Filter with org level only and no department memberships.
    pub fn org_only(org_level: AccessLevel) -> Self {
        Self {
            org_level,
            departments: BTreeMap::new(),
        }
    }

    /// Level the holder has for documents of `department`.
    ///
    /// Members get `max(org, department)`; everyone else gets the org level.
    pub fn level_for_department(&self, department: DepartmentId) -> AccessLevel {
        self.departments
            .get(&department)
            .copied()
            .map_or(self.org_level, |d| d.max(self.org_level))
    }

    /// Whether the holder may see a document.
    ///
    /// Department-only documents additionally require membership in the
    /// document's department. A department-only document without a department
    /// is never visible.
    pub fn permits(
        &self,
        required: AccessLevel,
        department: Option<DepartmentId>,
        department_only: bool,
    ) -> bool {
        match (department, department_only) {
            (None, true) => false,
            (Some(dept), true) => {
                self.departments.contains_key(&dept)
                    && admits(self.level_for_department(dept), required)
            }
            (Some(dept), false) => admits(self.level_for_department(dept), required),
            (None, false) => admits(self.org_level, required),
        }
    }

    /// Whether this filter is purely organization-wide.
    pub fn is_org_only(&self) -> bool {
        self.departments.is_empty()
    }
}

/// A holder at [`AccessLevel::NONE`] sees nothing, whatever the document requires.
fn admits(held: AccessLevel, required: AccessLevel) -> bool {
    held > AccessLevel::NONE && held.dominates(required)
}

/// A user's resolved access at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveAccess {
    /// Whose access this is
    pub user_id: UserId,
    /// `max(org base, org-wide overrides)`
    pub org_level: AccessLevel,
    /// `max(org, department base, covering overrides)` for every department
    /// where the user holds a base assignment or a department override
    pub department_levels: BTreeMap<DepartmentId, AccessLevel>,
    /// Set when the identity store was unreachable and access failed closed
    pub degraded: bool,
}

impl EffectiveAccess {
    /// Fail-closed access: nothing is visible.
    pub fn fail_closed(user_id: UserId) -> Self {
        Self {
            user_id,
            org_level: AccessLevel::NONE,
            department_levels: BTreeMap::new(),
            degraded: true,
        }
    }

    /// Effective level for `scope`.
    pub fn level_for(&self, scope: &Scope) -> AccessLevel {
        match scope {
            Scope::OrgWide => self.org_level,
            Scope::Department(dept) => self
                .department_levels
                .get(dept)
                .copied()
                .unwrap_or(self.org_level),
        }
    }

    /// Whether any department-specific access exists.
    pub fn has_department_access(&self) -> bool {
        !self.department_levels.is_empty()
    }

    /// Whether some department level strictly exceeds the org level.
    pub fn has_department_elevation(&self) -> bool {
        self.department_levels.values().any(|l| *l > self.org_level)
    }

    /// Identity-free filter used for document gating.
    pub fn filter(&self) -> AccessFilter {
        AccessFilter {
            org_level: self.org_level,
            departments: self.department_levels.clone(),
        }
    }
}

/// `can_access_document` as exposed to the response-generation service.
pub fn can_access_document(
    access: &EffectiveAccess,
    document_level: AccessLevel,
    document_department: Option<DepartmentId>,
    department_only: bool,
) -> bool {
    access
        .filter()
        .permits(document_level, document_department, department_only)
}

/// Everything the UI shows about a user's permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSummary {
    /// Whose summary this is
    pub user_id: UserId,
    /// Base org level from the identity subsystem
    pub org_level: AccessLevel,
    /// Base department levels from the identity subsystem
    pub department_levels: BTreeMap<DepartmentId, AccessLevel>,
    /// Overrides currently in effect
    pub active_overrides: Vec<Override>,
    /// Effective level per scope
    #[serde(with = "scope_entries")]
    pub effective_by_scope: BTreeMap<Scope, AccessLevel>,
}

/// Scope-keyed maps travel as `[{scope, level}]` since JSON keys must be strings.
mod scope_entries {
    use super::{AccessLevel, Scope};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        scope: Scope,
        level: AccessLevel,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Scope, AccessLevel>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(scope, level)| Entry {
                scope: *scope,
                level: *level,
            })
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Scope, AccessLevel>, D::Error> {
        Ok(Vec::<Entry>::deserialize(deserializer)?
            .into_iter()
            .map(|e| (e.scope, e.level))
            .collect())
    }
}

impl PermissionSummary {
    /// Assemble a summary from a profile, the effective overrides and the resolved access.
    pub fn new(
        profile: &UserAccessProfile,
        active_overrides: Vec<Override>,
        access: &EffectiveAccess,
    ) -> Self {
        let mut effective_by_scope = BTreeMap::new();
        effective_by_scope.insert(Scope::OrgWide, access.org_level);
        for (dept, level) in &access.department_levels {
            effective_by_scope.insert(Scope::Department(*dept), *level);
        }
        Self {
            user_id: profile.user_id,
            org_level: profile.org_level,
            department_levels: profile.department_levels.clone(),
            active_overrides,
            effective_by_scope,
        }
    }
}
