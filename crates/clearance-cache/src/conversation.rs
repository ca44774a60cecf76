//! Conversation history namespace
//!
//! History is per user, so unlike retrieval results it is keyed by identity.
//! The user id is hashed so keys do not expose it.
//!
//! Appends are a read-modify-write on the cache entry. Within one process
//! they are serialized per user; writers in separate processes sharing a
//! networked backend are last-writer-wins and can drop a turn.

use crate::scoped::{CacheNamespace, ScopedCache};
use chrono::{DateTime, Utc};
use clearance_core::{DocumentId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Domain separation tag for conversation keys.
const CONVERSATION_KEY_TAG: &[u8] = b"clearance-conversation-key-v1";

/// Number of append locks users are striped over.
const APPEND_STRIPES: usize = 64;

/// One question and the documents its answer drew on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Raw query text
    pub query: String,
    /// Documents returned for the query
    pub document_ids: Vec<DocumentId>,
    /// When the turn happened
    pub at: DateTime<Utc>,
}

/// Cache key holding `user`'s history.
pub fn conversation_key(user: UserId) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CONVERSATION_KEY_TAG);
    hasher.update(&user.0.to_be_bytes());
    format!(
        "{}:user:{}",
        CacheNamespace::Conversation.as_str(),
        hasher.finalize().to_hex()
    )
}

/// Bounded per-user history on top of a [`ScopedCache`].
#[derive(Debug, Clone)]
pub struct ConversationLog {
    cache: Arc<ScopedCache>,
    max_turns: usize,
    append_locks: Arc<[Mutex<()>]>,
}

impl ConversationLog {
    /// Log keeping the latest `max_turns` turns per user.
    pub fn new(cache: Arc<ScopedCache>, max_turns: usize) -> Self {
        Self {
            cache,
            max_turns: max_turns.max(1),
            append_locks: (0..APPEND_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// History for `user`, oldest first. Empty when nothing is cached.
    pub async fn history(&self, user: UserId) -> Vec<ConversationTurn> {
        self.cache
            .get_json(CacheNamespace::Conversation, &conversation_key(user))
            .await
            .unwrap_or_default()
    }

    /// Append `turn`, dropping the oldest turns beyond the bound.
    pub async fn record(&self, user: UserId, turn: ConversationTurn) {
        let stripe = (user.0 % APPEND_STRIPES as u64) as usize;
        let _append = self.append_locks[stripe].lock().await;

        let mut turns = self.history(user).await;
        turns.push(turn);
        if turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
        }
        self.cache
            .put_json(CacheNamespace::Conversation, &conversation_key(user), &turns)
            .await;
    }

    /// Forget `user`'s history.
    pub async fn clear(&self, user: UserId) {
        self.cache.remove(&conversation_key(user)).await;
    }
}
