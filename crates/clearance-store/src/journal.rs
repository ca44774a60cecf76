//! Fact journal backends
//!
//! The journal is append-only. Each committed [`FactBatch`] is one JSON line
//! in the file backend, written and synced before the batch is applied in
//! memory. A crash mid-write leaves at most one torn trailing line, which is
//! dropped on the next open; the batch it held was never acknowledged.

use crate::errors::{StoreError, StoreResult};
use crate::facts::FactBatch;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Durable sink and source for committed batches.
#[async_trait]
pub trait FactJournal: Send + Sync {
    /// Every committed batch, in commit order.
    async fn load(&self) -> StoreResult<Vec<FactBatch>>;

    /// Durably append one batch. The batch is committed once this returns `Ok`.
    ///
    /// On error the journal should be left as it was before the call. When
    /// that cannot be guaranteed, return [`StoreError::Indeterminate`].
    async fn append(&self, batch: &FactBatch) -> StoreResult<()>;
}

/// Volatile journal for tests and journal-less deployments.
///
/// Shared through an `Arc`, it lets tests reopen a store over the same history.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    batches: Mutex<Vec<FactBatch>>,
}

impl MemoryJournal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed batches.
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    /// Whether nothing was committed yet.
    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

#[async_trait]
impl FactJournal for MemoryJournal {
    async fn load(&self) -> StoreResult<Vec<FactBatch>> {
        Ok(self.batches.lock().clone())
    }

    async fn append(&self, batch: &FactBatch) -> StoreResult<()> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

/// JSON-lines journal on the local filesystem.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    writer: tokio::sync::Mutex<()>,
}

impl FileJournal {
    /// Open (creating if needed) the journal at `path`, dropping a torn tail.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let journal = Self {
            path,
            writer: tokio::sync::Mutex::new(()),
        };
        journal.repair_tail().await?;
        Ok(journal)
    }

    /// Journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StoreResult<String> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    async fn repair_tail(&self) -> StoreResult<()> {
        let contents = self.read_all().await?;
        if contents.is_empty() || contents.ends_with('\n') {
            return Ok(());
        }

        let keep = contents.rfind('\n').map_or(0, |idx| idx + 1);
        tracing::warn!(
            path = %self.path.display(),
            dropped_bytes = contents.len() - keep,
            "dropping torn journal tail"
        );
        self.truncate_to(keep as u64).await
    }

    /// Cut the file back to `len` bytes and sync.
    async fn truncate_to(&self, len: u64) -> StoreResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.set_len(len)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }

    async fn write_synced(&self, file: &mut fs::File, line: &[u8]) -> StoreResult<()> {
        file.write_all(line)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

#[async_trait]
impl FactJournal for FileJournal {
    async fn load(&self) -> StoreResult<Vec<FactBatch>> {
        let _guard = self.writer.lock().await;
        let contents = self.read_all().await?;

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<FactBatch>(line).map_err(|e| StoreError::Corrupt {
                    line: idx + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn append(&self, batch: &FactBatch) -> StoreResult<()> {
        let mut line = serde_json::to_vec(batch)?;
        line.push(b'\n');

        let _guard = self.writer.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        let committed_len = file
            .metadata()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?
            .len();

        let Err(err) = self.write_synced(&mut file, &line).await else {
            return Ok(());
        };
        drop(file);

        match self.truncate_to(committed_len).await {
            Ok(()) => {
                tracing::warn!(
                    path = %self.path.display(),
                    sequence = batch.sequence,
                    error = %err,
                    "journal append failed, rolled back"
                );
                Err(err)
            }
            Err(rollback) => {
                tracing::error!(
                    path = %self.path.display(),
                    sequence = batch.sequence,
                    error = %err,
                    rollback_error = %rollback,
                    "journal append failed and could not be rolled back"
                );
                Err(StoreError::Indeterminate {
                    path: self.path.clone(),
                    reason: format!("{err}; rollback failed: {rollback}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::AccessFact;
    use chrono::Utc;
    use clearance_core::{OverrideId, UserId};

    fn batch(sequence: u64) -> FactBatch {
        FactBatch::new(
            sequence,
            Utc::now(),
            vec![AccessFact::OverrideRevoked {
                override_id: OverrideId::new(),
                revoked_by: UserId(1),
                revoked_at: Utc::now(),
            }],
        )
    }

    #[tokio::test]
    async fn file_journal_round_trips_batches() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(dir.path().join("nested/facts.jsonl"))
            .await
            .unwrap();
        journal.append(&batch(1)).await.unwrap();
        journal.append(&batch(2)).await.unwrap();

        let reopened = FileJournal::open(journal.path().to_path_buf()).await.unwrap();
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.iter().map(|b| b.sequence).collect::<Vec<_>>(), [1, 2]);
    }

    #[tokio::test]
    async fn torn_tail_is_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.jsonl");
        let journal = FileJournal::open(&path).await.unwrap();
        journal.append(&batch(1)).await.unwrap();

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{\"fact_type_id\":\"clear");
        std::fs::write(&path, contents).unwrap();

        let reopened = FileJournal::open(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap().len(), 1);
        reopened.append(&batch(2)).await.unwrap();
        assert_eq!(reopened.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rollback_removes_a_partial_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.jsonl");
        let journal = FileJournal::open(&path).await.unwrap();
        journal.append(&batch(1)).await.unwrap();
        let committed_len = std::fs::metadata(&path).unwrap().len();

        journal.append(&batch(2)).await.unwrap();
        journal.truncate_to(committed_len).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed_len);

        journal.append(&batch(3)).await.unwrap();
        let loaded = journal.load().await.unwrap();
        assert_eq!(loaded.iter().map(|b| b.sequence).collect::<Vec<_>>(), [1, 3]);
    }

    #[test]
    fn only_pre_write_failures_rule_out_persistence() {
        let io = StoreError::io("facts.jsonl", std::io::ErrorKind::Other.into());
        assert!(io.append_may_have_persisted());
        let encode = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(!StoreError::Encode(encode).append_may_have_persisted());
    }

    #[tokio::test]
    async fn corrupt_middle_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let journal = FileJournal::open(&path).await.unwrap();
        assert!(matches!(
            journal.load().await,
            Err(StoreError::Corrupt { line: 1, .. })
        ));
    }
}
