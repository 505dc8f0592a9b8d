//! Persisted sync-state for the historical mailbox cursor.
//!
//! The store holds a single [`SyncCursor`] record. The engine loads it on
//! startup, advances it after each acknowledged mailbox page, and resets it
//! when the operator asks for a full re-sync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tagsync_error::StateResult;
use tracing::debug;

/// Cursor into the relay's bulk historical mailbox.
///
/// `transaction_id` of `None` means no transaction exists yet; the next
/// mailbox call must create one. The id never moves backwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    #[serde(default)]
    pub transaction_id: Option<u64>,
    /// Wall-clock time of the last completed historical sync on this host.
    #[serde(default)]
    pub last_local_sync: Option<DateTime<Utc>>,
    /// Newest datapoint timestamp stored so far.
    #[serde(default)]
    pub last_historical_timestamp: Option<DateTime<Utc>>,
}

impl SyncCursor {
    /// Returns a cursor advanced to `transaction_id`, stamped with the
    /// current time. Timestamps of datapoints are tracked separately via
    /// [`SyncCursor::observe_datapoint`].
    pub fn advanced(&self, transaction_id: u64) -> SyncCursor {
        SyncCursor {
            transaction_id: Some(transaction_id),
            last_local_sync: Some(Utc::now()),
            last_historical_timestamp: self.last_historical_timestamp,
        }
    }

    /// Folds a datapoint timestamp into the cursor; only moves forward.
    pub fn observe_datapoint(&mut self, ts: DateTime<Utc>) {
        match self.last_historical_timestamp {
            Some(prev) if prev >= ts => {}
            _ => self.last_historical_timestamp = Some(ts),
        }
    }
}

/// Persistence boundary for the sync cursor.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Loads the stored cursor, or the default cursor when none exists yet.
    async fn load(&self) -> StateResult<SyncCursor>;

    /// Durably replaces the stored cursor.
    async fn save(&self, cursor: &SyncCursor) -> StateResult<()>;

    /// Drops the stored cursor back to the default.
    async fn reset(&self) -> StateResult<()> {
        self.save(&SyncCursor::default()).await
    }
}

/// File-backed store. The record is a small JSON document; saves go through
/// a temp file in the same directory followed by a rename, so a crash never
/// leaves a half-written record.
#[derive(Debug, Clone)]
pub struct FileSyncStateStore {
    path: PathBuf,
}

impl FileSyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    }
}

#[async_trait]
impl SyncStateStore for FileSyncStateStore {
    async fn load(&self) -> StateResult<SyncCursor> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let cursor: SyncCursor = serde_json::from_slice(&bytes)?;
                debug!(path = %self.path.display(), txid = ?cursor.transaction_id, "loaded sync state");
                Ok(cursor)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no sync state yet, starting fresh");
                Ok(SyncCursor::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, cursor: &SyncCursor) -> StateResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(cursor)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
