//! Clearance ranks
//!
//! Access levels form a total order. A higher rank dominates every lower one,
//! so the effective level of a user is always a `max` over contributing grants.
//! Rank 0 is reserved for "no access" and is what every fail-closed path returns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered clearance rank.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccessLevel(u8);

impl AccessLevel {
    /// No access at all. Never granted, only computed.
    pub const NONE: AccessLevel = AccessLevel(0);
    /// Documents any member of the organization may read.
    pub const GENERAL: AccessLevel = AccessLevel(1);
    /// Internal documents.
    pub const INTERNAL: AccessLevel = AccessLevel(2);
    /// Confidential documents.
    pub const CONFIDENTIAL: AccessLevel = AccessLevel(3);
    /// Highest sensitivity tier.
    pub const HIGHLY_CONFIDENTIAL: AccessLevel = AccessLevel(4);

    /// Highest rank this deployment recognizes.
    pub const MAX: AccessLevel = Self::HIGHLY_CONFIDENTIAL;

    /// Build a level from its numeric rank, rejecting ranks above [`AccessLevel::MAX`].
    pub fn from_rank(rank: u8) -> Option<Self> {
        (rank <= Self::MAX.0).then_some(Self(rank))
    }

    /// Numeric rank.
    pub fn rank(self) -> u8 {
        self.0
    }

    /// Whether this level can be handed out by a grant (1..=MAX).
    pub fn is_grantable(self) -> bool {
        self.0 >= Self::GENERAL.0 && self.0 <= Self::MAX.0
    }

    /// Whether a holder of `self` may read something that requires `required`.
    pub fn dominates(self, required: AccessLevel) -> bool {
        self >= required
    }

    /// Human readable tier name.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "none",
            1 => "general",
            2 => "internal",
            3 => "confidential",
            4 => "highly_confidential",
            _ => "unknown",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = crate::AccessError;

    fn try_from(rank: u8) -> Result<Self, Self::Error> {
        Self::from_rank(rank)
            .ok_or_else(|| crate::AccessError::invalid_request(format!("unknown access level {rank}")))
    }
}
