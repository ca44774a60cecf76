//! # Clearance Testkit - Layer 8: Test Doubles
//!
//! Scripted collaborators and fixtures shared by the clearance test suites.
//! Nothing here is meant for production builds.

#![allow(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]

/// Cache backend that is always down
pub mod cache;

/// Fixed instants and profile builders
pub mod fixtures;

/// In-memory identity directory
pub mod identity;

/// Notification recorder
pub mod notifier;

/// Scripted vector search and reranker
pub mod search;

pub use cache::FailingCacheBackend;
pub use fixtures::{clock, department_profile, epoch, profile};
pub use identity::DirectoryStub;
pub use notifier::RecordingNotifier;
pub use search::{candidate, department_candidate, ScriptedReranker, ScriptedSearch};
