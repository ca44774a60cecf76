//! # Clearance Agent - Layer 3: Runtime Composition
//!
//! **Purpose**: Assemble the access model, durable store, scoped cache and
//! adaptive retrieval into one service, and keep its maintenance running.
//!
//! # Architecture Constraints
//!
//! - YES Explicit dependency assembly through [`ClearanceRuntimeBuilder`]
//! - YES The request-facing [`ClearanceService`]: `query`,
//!   `can_access_document`, `permission_summary` and the override operations
//! - YES Configuration loading and validation
//! - YES Background maintenance on a [`TaskRegistry`]
//! - NO access rules, persistence or cache keying (lower layers own those)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let runtime = ClearanceRuntimeBuilder::new(ClearanceConfig::load(path).await?)
//!     .with_identity(directory)
//!     .with_search(search)
//!     .build()
//!     .await?;
//! runtime.start_maintenance();
//! let response = runtime.service().query("q3 revenue", UserId(42)).await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Service configuration
pub mod config;

/// Static identity directory
pub mod directory;

/// Startup errors
pub mod errors;

/// Query response shape
pub mod response;

/// Runtime assembly
pub mod runtime;

/// Request-facing service
pub mod service;

/// Background task registry
pub mod task_registry;

pub use config::{
    CacheBackendKind, CacheSection, ClearanceConfig, DirectorySection, MaintenanceSection,
    QualityMetricKind, RespSection, RetrievalSection, StoreSection, WorkflowSection,
    DEFAULT_KEY_ENV,
};
pub use directory::StaticDirectory;
pub use errors::{AgentError, Result};
pub use response::QueryResponse;
pub use runtime::{ClearanceRuntime, ClearanceRuntimeBuilder};
pub use service::{ClearanceService, ServiceParts};
pub use task_registry::TaskRegistry;
