//! Grant and resolution scope

use crate::DepartmentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Organization-wide or a single department.
///
/// Determines which documents a grant unlocks and which department a level
/// is resolved for. An org-wide grant is a superset of every department grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Applies across the whole organization.
    OrgWide,
    /// Applies to one department only.
    Department(DepartmentId),
}

impl Scope {
    /// Whether a grant held at `self` contributes when resolving `target`.
    pub fn covers(&self, target: &Scope) -> bool {
        match (self, target) {
            (Scope::OrgWide, _) => true,
            (Scope::Department(held), Scope::Department(wanted)) => held == wanted,
            (Scope::Department(_), Scope::OrgWide) => false,
        }
    }

    /// Department this scope names, if any.
    pub fn department(&self) -> Option<DepartmentId> {
        match self {
            Scope::OrgWide => None,
            Scope::Department(id) => Some(*id),
        }
    }

    /// Short label used in logs and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::OrgWide => "org_wide",
            Scope::Department(_) => "department",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::OrgWide => f.write_str("org_wide"),
            Scope::Department(id) => write!(f, "department:{}", id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_wide_covers_every_department() {
        assert!(Scope::OrgWide.covers(&Scope::Department(DepartmentId(7))));
        assert!(Scope::OrgWide.covers(&Scope::OrgWide));
    }

    #[test]
    fn department_only_covers_itself() {
        let d3 = Scope::Department(DepartmentId(3));
        assert!(d3.covers(&Scope::Department(DepartmentId(3))));
        assert!(!d3.covers(&Scope::Department(DepartmentId(4))));
        assert!(!d3.covers(&Scope::OrgWide));
    }
}
