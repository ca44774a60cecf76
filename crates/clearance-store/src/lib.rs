//! # Clearance Store - Layer 2: Durable Access State
//!
//! **Purpose**: Persist overrides and override requests, run their lifecycle
//! transitions transactionally, and sweep them on a schedule.
//!
//! Every mutation is an [`AccessFact`]. Facts are committed in batches through
//! [`AccessStore`]: staged against the in-memory ledger, appended to the
//! [`FactJournal`], then installed, under a single write lock. The journal is
//! replayed on open, so state survives restarts.
//!
//! # Architecture Constraints
//!
//! - YES Override and request persistence, indexes, lifecycle operations
//! - YES Implements `OverrideSource` for the resolver
//! - NO access resolution (that's `clearance-core`)
//! - NO caching (that's `clearance-cache`)

#![forbid(unsafe_code)]

/// Store error type
pub mod errors;

/// Fact types
pub mod facts;

/// Journal backends
pub mod journal;

/// Ledger and indexes
pub mod ledger;

/// Maintenance sweep
pub mod maintenance;

/// Override store
pub mod overrides;

/// Transactional store
pub mod store;

/// Request workflow
pub mod workflow;

pub use errors::{StoreError, StoreResult};
pub use facts::{AccessFact, FactBatch, ACCESS_FACT_TYPE_ID};
pub use journal::{FactJournal, FileJournal, MemoryJournal};
pub use ledger::AccessLedger;
pub use maintenance::{MaintenanceSweep, SweepReport};
pub use overrides::OverrideStore;
pub use store::{AccessStore, LedgerView};
pub use workflow::{RequestWorkflow, WorkflowPolicy};
