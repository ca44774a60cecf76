//! Security-scoped cache keys
//!
//! A key is derived from the normalized query and the requester's
//! [`CacheScope`], never from identity:
//!
//! ```text
//! key = namespace ":" kind ":" hex(blake3(material))
//! material = TAG || len(query) || query || kind || org_rank || n || (dept_id, dept_rank)*n
//! ```
//!
//! The material encoding is injective: every variable-length field is
//! length-prefixed and every fixed-width field has a fixed width. Two scopes
//! share a key only if they are field-for-field equal, up to a BLAKE3
//! collision.
//!
//! Retrieval filters candidates with [`CacheScope::filter`], so everything a
//! cached entry holds was selected by exactly the scope that keys it.

use clearance_core::{AccessFilter, AccessLevel, DepartmentId, EffectiveAccess};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Domain separation tag for key material.
const KEY_MATERIAL_TAG: &[u8] = b"clearance-scope-key-v1";

/// When department scoping applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    /// Department scope whenever the requester has any department access.
    #[default]
    Conservative,
    /// Department scope only for departments where the requester's level
    /// exceeds their org level. Department-only documents of other
    /// departments are then not retrieved.
    ElevatedOnly,
}

/// Access-control partition a cached entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheScope {
    /// Purely organization-wide requester.
    Org {
        /// Effective org level
        org_level: AccessLevel,
    },
    /// Requester whose answer set may depend on department documents.
    Department {
        /// Effective org level
        org_level: AccessLevel,
        /// Sorted `(department, effective level)` pairs
        departments: Vec<(DepartmentId, AccessLevel)>,
    },
}

impl CacheScope {
    /// Scope of `access` under `policy`.
    pub fn for_access(access: &EffectiveAccess, policy: ScopePolicy) -> Self {
        let departments: Vec<(DepartmentId, AccessLevel)> = access
            .department_levels
            .iter()
            .filter(|(_, level)| match policy {
                ScopePolicy::Conservative => true,
                ScopePolicy::ElevatedOnly => **level > access.org_level,
            })
            .map(|(dept, level)| (*dept, *level))
            .collect();

        if departments.is_empty() {
            CacheScope::Org {
                org_level: access.org_level,
            }
        } else {
            CacheScope::Department {
                org_level: access.org_level,
                departments,
            }
        }
    }

    /// `org` or `dept`.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheScope::Org { .. } => "org",
            CacheScope::Department { .. } => "dept",
        }
    }

    /// Effective org level of the scope.
    pub fn org_level(&self) -> AccessLevel {
        match self {
            CacheScope::Org { org_level } | CacheScope::Department { org_level, .. } => *org_level,
        }
    }

    /// Document filter equivalent to this scope.
    pub fn filter(&self) -> AccessFilter {
        match self {
            CacheScope::Org { org_level } => AccessFilter::org_only(*org_level),
            CacheScope::Department {
                org_level,
                departments,
            } => AccessFilter {
                org_level: *org_level,
                departments: departments.iter().copied().collect::<BTreeMap<_, _>>(),
            },
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Org { org_level } => write!(f, "org@{}", org_level.rank()),
            CacheScope::Department {
                org_level,
                departments,
            } => {
                write!(f, "dept@{}[", org_level.rank())?;
                for (idx, (dept, level)) in departments.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}={}", dept.0, level.rank())?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Injective byte encoding of `(query, scope)`.
pub fn key_material(normalized_query: &str, scope: &CacheScope) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_MATERIAL_TAG.len() + normalized_query.len() + 32);
    out.extend_from_slice(KEY_MATERIAL_TAG);
    out.extend_from_slice(&(normalized_query.len() as u64).to_be_bytes());
    out.extend_from_slice(normalized_query.as_bytes());

    match scope {
        CacheScope::Org { org_level } => {
            out.push(0);
            out.push(org_level.rank());
        }
        CacheScope::Department {
            org_level,
            departments,
        } => {
            out.push(1);
            out.push(org_level.rank());
            out.extend_from_slice(&(departments.len() as u64).to_be_bytes());
            for (dept, level) in departments {
                out.extend_from_slice(&dept.0.to_be_bytes());
                out.push(level.rank());
            }
        }
    }
    out
}

/// `scope_key(normalizedQuery, scope)` under `namespace`.
pub fn scope_key(namespace: &str, normalized_query: &str, scope: &CacheScope) -> String {
    let digest = blake3::hash(&key_material(normalized_query, scope));
    format!("{namespace}:{}:{}", scope.kind(), hex::encode(digest.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearance_core::UserId;
    use proptest::prelude::*;

    fn access(user: u64, org: AccessLevel, depts: &[(u64, AccessLevel)]) -> EffectiveAccess {
        EffectiveAccess {
            user_id: UserId(user),
            org_level: org,
            department_levels: depts.iter().map(|(d, l)| (DepartmentId(*d), *l)).collect(),
            degraded: false,
        }
    }

    #[test]
    fn org_and_department_requesters_get_distinct_keys() {
        let org_only = access(1, AccessLevel::INTERNAL, &[]);
        let member = access(2, AccessLevel::INTERNAL, &[(10, AccessLevel::INTERNAL)]);

        let a = CacheScope::for_access(&org_only, ScopePolicy::Conservative);
        let b = CacheScope::for_access(&member, ScopePolicy::Conservative);
        assert_eq!(a.kind(), "org");
        assert_eq!(b.kind(), "dept");

        let ka = scope_key("retrieval", "revenue report", &a);
        let kb = scope_key("retrieval", "revenue report", &b);
        assert!(ka.starts_with("retrieval:org:"));
        assert!(kb.starts_with("retrieval:dept:"));
        assert_ne!(ka, kb);
    }

    #[test]
    fn identity_does_not_enter_the_key() {
        let a = access(1, AccessLevel::CONFIDENTIAL, &[(4, AccessLevel::MAX)]);
        let b = access(2, AccessLevel::CONFIDENTIAL, &[(4, AccessLevel::MAX)]);
        assert_eq!(
            scope_key("retrieval", "q", &CacheScope::for_access(&a, ScopePolicy::Conservative)),
            scope_key("retrieval", "q", &CacheScope::for_access(&b, ScopePolicy::Conservative)),
        );
    }

    #[test]
    fn elevated_only_policy_keeps_unelevated_members_org_scoped() {
        let member = access(2, AccessLevel::INTERNAL, &[(10, AccessLevel::INTERNAL)]);
        let elevated = access(3, AccessLevel::INTERNAL, &[(10, AccessLevel::CONFIDENTIAL)]);
        assert_eq!(
            CacheScope::for_access(&member, ScopePolicy::ElevatedOnly).kind(),
            "org"
        );
        assert_eq!(
            CacheScope::for_access(&elevated, ScopePolicy::ElevatedOnly).kind(),
            "dept"
        );
    }

    #[test]
    fn scope_filter_round_trips_department_levels() {
        let member = access(2, AccessLevel::GENERAL, &[(10, AccessLevel::CONFIDENTIAL)]);
        let scope = CacheScope::for_access(&member, ScopePolicy::Conservative);
        assert_eq!(scope.filter(), member.filter());
    }

    fn level() -> impl Strategy<Value = AccessLevel> {
        (0u8..=AccessLevel::MAX.rank()).prop_map(|r| AccessLevel::from_rank(r).unwrap())
    }

    fn scope() -> impl Strategy<Value = CacheScope> {
        prop_oneof![
            level().prop_map(|org_level| CacheScope::Org { org_level }),
            (level(), proptest::collection::btree_map(any::<u64>(), level(), 1..4)).prop_map(
                |(org_level, depts)| CacheScope::Department {
                    org_level,
                    departments: depts.into_iter().map(|(d, l)| (DepartmentId(d), l)).collect(),
                }
            ),
        ]
    }

    proptest! {
        #[test]
        fn equal_scopes_share_keys(s in scope(), q in "[a-z ]{0,16}") {
            let twin = s.clone();
            prop_assert_eq!(scope_key("ns", &q, &s), scope_key("ns", &q, &twin));
        }

        #[test]
        fn key_material_is_injective(
            a in scope(), b in scope(),
            qa in "[a-z0-9 ]{0,12}", qb in "[a-z0-9 ]{0,12}",
        ) {
            let same_input = a == b && qa == qb;
            prop_assert_eq!(key_material(&qa, &a) == key_material(&qb, &b), same_input);
            prop_assert_eq!(scope_key("ns", &qa, &a) == scope_key("ns", &qb, &b), same_input);
        }
    }
}
