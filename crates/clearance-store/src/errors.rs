//! Store error type

use clearance_core::AccessError;
use std::path::PathBuf;

/// Errors raised below the store API.
///
/// Validation failures carry the domain [`AccessError`] unchanged; everything
/// else folds into [`AccessError::Storage`] at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A fact batch was rejected against current state.
    #[error(transparent)]
    Rejected(#[from] AccessError),

    /// Journal file could not be read or written.
    #[error("Journal I/O failed on {path}: {source}")]
    Io {
        /// Journal location
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// A journal record could not be encoded.
    #[error("Failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),

    /// An append failed and could not be rolled back, so the batch may or
    /// may not be in the journal.
    #[error("Journal append on {path} is indeterminate: {reason}")]
    Indeterminate {
        /// Journal location
        path: PathBuf,
        /// Append failure and rollback failure
        reason: String,
    },

    /// A journal record could not be decoded or replayed.
    #[error("Journal record {line} is corrupt: {reason}")]
    Corrupt {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl StoreError {
    /// Whether a failed append may still have left the batch in the journal.
    ///
    /// Encoding and validation fail before any byte is written.
    pub fn append_may_have_persisted(&self) -> bool {
        !matches!(self, Self::Rejected(_) | Self::Encode(_))
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(inner) => inner,
            other => AccessError::storage(other.to_string()),
        }
    }
}

/// Result type for store internals.
pub type StoreResult<T> = Result<T, StoreError>;
