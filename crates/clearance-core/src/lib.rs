//! # Clearance Core - Layer 1: Access Model
//!
//! **Purpose**: Define clearance levels, time-bound overrides, the override
//! request state machine, and the effective permission resolver.
//!
//! # Architecture Constraints
//!
//! - YES Pure domain types and transitions
//! - YES Pure resolution over a fully loaded profile and override set
//! - YES Effect trait definitions for collaborators (identity, clock, notifications)
//! - NO persistence (that's `clearance-store`)
//! - NO caching or retrieval (that's `clearance-cache` / `clearance-retrieval`)
//!
//! ## Core Concepts
//!
//! - **AccessLevel**: total order, higher dominates lower, 0 is "no access"
//! - **Override**: effective iff active and its window contains "now"
//! - **OverrideRequest**: `Pending → Approved | Denied | Cancelled | Expired`,
//!   with escalation widening the approver set
//! - **Fail closed**: any doubt resolves to the lower level

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Resolved access, document gating and permission summaries
pub mod access;

/// Collaborator effect traits
pub mod effects;

/// Unified error type
pub mod errors;

/// Time-bound elevation grants
pub mod grant;

/// Identifier newtypes
pub mod identifiers;

/// Ordered clearance ranks
pub mod level;

/// Base clearance assignment
pub mod profile;

/// Override request state machine
pub mod request;

/// Effective permission resolver
pub mod resolver;

/// Org-wide / department scope
pub mod scope;

/// Physical clock effect
pub mod time;

pub use access::{can_access_document, AccessFilter, EffectiveAccess, PermissionSummary};
pub use effects::{
    AccessEvent, IdentityEffects, IdentityError, NotificationEffects, OverrideSource,
    TracingNotifier,
};
pub use errors::{AccessError, AccessResult};
pub use grant::{NewOverride, Override};
pub use identifiers::{DepartmentId, DocumentId, OverrideId, RequestId, UserId};
pub use level::AccessLevel;
pub use profile::UserAccessProfile;
pub use request::{Decision, NewOverrideRequest, OverrideRequest, RequestState, RequestStatus};
pub use resolver::{resolve, resolve_all, AccessSnapshot, PermissionResolver};
pub use scope::Scope;
pub use time::{PhysicalClock, SimulatedClock, SystemClock};
