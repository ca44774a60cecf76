//! # Clearance Cache - Layer 2: Security-Scoped Result Cache
//!
//! **Purpose**: Cache retrieval results without leaking them across
//! clearance boundaries.
//!
//! # Architecture Constraints
//!
//! - YES Keys derived from normalized query and cache scope, never identity
//! - YES Interchangeable backends behind [`CacheBackend`]
//! - YES Backend errors absorbed at [`ScopedCache`]: outage means miss
//! - NO access resolution (that's `clearance-core`)
//! - NO retrieval (that's `clearance-retrieval`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Cache backend effect and errors
pub mod backend;

/// Single-flight coalescing
pub mod coalesce;

/// Per-user conversation history
pub mod conversation;

/// At-rest value encryption
pub mod encryption;

/// In-process backend
pub mod memory;

/// Query normalization
pub mod normalize;

/// RESP2 networked backend
pub mod resp;

/// Cache scope and scoped key derivation
pub mod scope_key;

/// Error-absorbing namespaced front
pub mod scoped;

pub use backend::{CacheBackend, CacheError};
pub use coalesce::SingleFlight;
pub use conversation::{conversation_key, ConversationLog, ConversationTurn};
pub use encryption::ValueCipher;
pub use memory::{MemoryCacheBackend, DEFAULT_MAX_ENTRIES};
pub use normalize::normalize_query;
pub use resp::{RespCacheBackend, RespConfig};
pub use scope_key::{key_material, scope_key, CacheScope, ScopePolicy};
pub use scoped::{CacheNamespace, CacheStats, NamespacePolicy, ScopedCache, ScopedCacheConfig};
