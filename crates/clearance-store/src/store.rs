//! Transactional fact store
//!
//! [`AccessStore`] owns the ledger and the journal. A commit stages the batch
//! against the ledger, appends it to the journal, and installs it, all under
//! one write lock. If staging or the append fails, nothing changes in memory.
//!
//! An append that fails after it may have reached the journal leaves memory
//! and journal possibly out of step. The store then refuses every further
//! commit until it is reopened from the journal.

use crate::errors::{StoreError, StoreResult};
use crate::facts::{AccessFact, FactBatch};
use crate::journal::FactJournal;
use crate::ledger::AccessLedger;
use clearance_core::{AccessError, AccessResult, PhysicalClock};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

struct Inner {
    ledger: AccessLedger,
    next_sequence: u64,
    poisoned: Option<u64>,
}

/// Ledger plus journal, shared by the override store and the request workflow.
pub struct AccessStore {
    inner: RwLock<Inner>,
    journal: Arc<dyn FactJournal>,
    clock: Arc<dyn PhysicalClock>,
}

impl AccessStore {
    /// Open a store by replaying `journal`.
    pub async fn open(
        journal: Arc<dyn FactJournal>,
        clock: Arc<dyn PhysicalClock>,
    ) -> StoreResult<Self> {
        let batches = journal.load().await?;
        let mut ledger = AccessLedger::new();
        let mut next_sequence = 1;

        for (idx, batch) in batches.into_iter().enumerate() {
            let staged = ledger.stage(&batch.facts).map_err(|e| StoreError::Corrupt {
                line: idx + 1,
                reason: format!("batch {} does not replay: {e}", batch.sequence),
            })?;
            ledger.install(staged);
            next_sequence = next_sequence.max(batch.sequence + 1);
        }

        tracing::info!(
            overrides = ledger.override_count(),
            requests = ledger.request_count(),
            batches = next_sequence - 1,
            "access store opened"
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                ledger,
                next_sequence,
                poisoned: None,
            }),
            journal,
            clock,
        })
    }

    /// Commit `facts` atomically.
    pub async fn commit(&self, facts: Vec<AccessFact>) -> AccessResult<()> {
        if facts.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().await;
        if let Some(sequence) = inner.poisoned {
            return Err(AccessError::storage(format!(
                "access store must be reopened: journal append of batch {sequence} is unresolved"
            )));
        }
        let staged = inner.ledger.stage(&facts)?;

        let batch = FactBatch::new(inner.next_sequence, self.clock.now(), facts);
        if let Err(err) = self.journal.append(&batch).await {
            if err.append_may_have_persisted() {
                inner.poisoned = Some(batch.sequence);
                tracing::error!(
                    sequence = batch.sequence,
                    error = %err,
                    "journal append failed, store refuses commits until reopened"
                );
            } else {
                tracing::error!(
                    sequence = batch.sequence,
                    error = %err,
                    "journal append failed, batch discarded"
                );
            }
            return Err(err.into());
        }

        tracing::debug!(
            sequence = batch.sequence,
            facts = ?batch.facts.iter().map(AccessFact::fact_type).collect::<Vec<_>>(),
            touched = staged.touched(),
            "committed fact batch"
        );
        inner.next_sequence += 1;
        inner.ledger.install(staged);
        Ok(())
    }

    /// Whether an unresolved journal failure blocks further commits.
    pub async fn is_poisoned(&self) -> bool {
        self.inner.read().await.poisoned.is_some()
    }

    /// Consistent read view of the ledger.
    pub async fn read(&self) -> LedgerView<'_> {
        LedgerView {
            guard: self.inner.read().await,
        }
    }

    /// Clock the store stamps batches with.
    pub fn clock(&self) -> &Arc<dyn PhysicalClock> {
        &self.clock
    }
}

/// Read guard over the ledger. Hold it only for the duration of a lookup.
pub struct LedgerView<'a> {
    guard: RwLockReadGuard<'a, Inner>,
}

impl std::ops::Deref for LedgerView<'_> {
    type Target = AccessLedger;

    fn deref(&self) -> &AccessLedger {
        &self.guard.ledger
    }
}

