//! # Clearance Retrieval - Layer 2: Adaptive Retrieval
//!
//! **Purpose**: Quality-adaptive nearest-neighbour retrieval, filtered by the
//! requester's clearance.
//!
//! # Architecture Constraints
//!
//! - YES Bounded k-escalation and a single optional rerank pass
//! - YES Every collaborator call bounded by a timeout
//! - YES Candidates re-checked against the [`clearance_core::AccessFilter`]
//! - NO caching (that's `clearance-cache`, driven by `clearance-agent`)
//! - NO embedding or rerank model internals

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Adaptive retrieval orchestrator
pub mod adaptive;

/// Typed retrieval failures
pub mod errors;

/// Result-set quality metrics
pub mod quality;

/// Vector search and rerank effects
pub mod search;

pub use adaptive::{max_access_level, AdaptiveRetriever, RetrievalConfig, RetrievalOutcome};
pub use errors::RetrievalFailure;
pub use quality::QualityMetric;
pub use search::{DocumentCandidate, RerankEffects, SearchError, VectorSearchEffects};
