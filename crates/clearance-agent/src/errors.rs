//! Runtime assembly errors
//!
//! Request-path failures stay [`AccessError`]s; this type covers startup:
//! reading and validating configuration, opening the journal and wiring the
//! cache.

use clearance_cache::CacheError;
use clearance_core::AccessError;
use clearance_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while assembling or running the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration is malformed or inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File in question
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A TOML document did not parse
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// File in question
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A required collaborator was not supplied to the builder
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Durable store failed to open
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cache could not be configured
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Access-control operation failed
    #[error(transparent)]
    Access(#[from] AccessError),
}
