//! Status surface published into the local tag store.
//!
//! Status paths are system paths and bypass the sanitizer. Counters publish
//! as dwords, timestamps as RFC 3339 strings (empty until first set).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tagsync_error::SyncResult;
use tagsync_models::StatusSnapshot;
use tagsync_sdk::{QualityCode, TagDataType, TagSink, TagValue};
use tagsync_state::SyncCursor;

pub mod paths {
    pub const LAST_METADATA_SYNC: &str = "_Status/LastMetadataSyncTime";
    pub const LAST_HISTORICAL_SYNC: &str = "_Status/LastHistoricalSyncTime";
    pub const LAST_REALTIME_SYNC: &str = "_Status/LastRealtimeSyncTime";
    pub const LAST_TRANSACTION_ID: &str = "_Status/LastTransactionId";
    pub const LATEST_HISTORICAL_TIMESTAMP: &str = "_Status/LatestHistoricalTimestamp";
    pub const METADATA_SUCCESSFUL: &str = "_Status/MetadataSyncsSuccessful";
    pub const METADATA_FAILED: &str = "_Status/MetadataSyncsFailed";
    pub const HISTORICAL_SUCCESSFUL: &str = "_Status/HistoricalSyncsSuccessful";
    pub const HISTORICAL_FAILED: &str = "_Status/HistoricalSyncsFailed";
    pub const REALTIME_SUCCESSFUL: &str = "_Status/RealtimeSyncsSuccessful";
    pub const REALTIME_FAILED: &str = "_Status/RealtimeSyncsFailed";
    pub const HISTORICAL_POINTS: &str = "_Status/HistoricalPointsProcessed";
    pub const RESET_SYNC: &str = "_Status/ResetSync";
    pub const FORCE_HISTORICAL_SYNC: &str = "_Status/ForceHistoricalSync";
}

const STRING_TAGS: &[&str] = &[
    paths::LAST_METADATA_SYNC,
    paths::LAST_HISTORICAL_SYNC,
    paths::LAST_REALTIME_SYNC,
    paths::LATEST_HISTORICAL_TIMESTAMP,
];

const DWORD_TAGS: &[&str] = &[
    paths::LAST_TRANSACTION_ID,
    paths::METADATA_SUCCESSFUL,
    paths::METADATA_FAILED,
    paths::HISTORICAL_SUCCESSFUL,
    paths::HISTORICAL_FAILED,
    paths::REALTIME_SUCCESSFUL,
    paths::REALTIME_FAILED,
    paths::HISTORICAL_POINTS,
];

/// Pushes counter snapshots and the cursor into the status tags.
pub struct StatusPublisher {
    sink: Arc<dyn TagSink>,
}

impl StatusPublisher {
    pub fn new(sink: Arc<dyn TagSink>) -> Self {
        Self { sink }
    }

    /// Creates every status tag. The write tags (`ResetSync`,
    /// `ForceHistoricalSync`) get their handlers from the engine.
    pub async fn configure(&self) -> SyncResult<()> {
        for path in STRING_TAGS {
            self.sink.configure_tag(path, TagDataType::String).await?;
        }
        for path in DWORD_TAGS {
            self.sink.configure_tag(path, TagDataType::Dword).await?;
        }
        self.sink
            .configure_tag(paths::RESET_SYNC, TagDataType::Boolean)
            .await?;
        self.sink
            .configure_tag(paths::FORCE_HISTORICAL_SYNC, TagDataType::Boolean)
            .await?;
        Ok(())
    }

    pub async fn publish(
        &self,
        snapshot: &StatusSnapshot,
        cursor: &SyncCursor,
    ) -> SyncResult<()> {
        let now = Utc::now();
        self.publish_ts(paths::LAST_METADATA_SYNC, snapshot.last_metadata_sync, now)
            .await?;
        self.publish_ts(
            paths::LAST_HISTORICAL_SYNC,
            snapshot.last_historical_sync,
            now,
        )
        .await?;
        self.publish_ts(paths::LAST_REALTIME_SYNC, snapshot.last_realtime_sync, now)
            .await?;
        self.publish_ts(
            paths::LATEST_HISTORICAL_TIMESTAMP,
            snapshot.latest_historical_point,
            now,
        )
        .await?;

        let txid = cursor.transaction_id.unwrap_or(0) as i64;
        self.publish_dword(paths::LAST_TRANSACTION_ID, txid, now)
            .await?;
        self.publish_dword(paths::METADATA_SUCCESSFUL, snapshot.metadata_success as i64, now)
            .await?;
        self.publish_dword(paths::METADATA_FAILED, snapshot.metadata_failure as i64, now)
            .await?;
        self.publish_dword(
            paths::HISTORICAL_SUCCESSFUL,
            snapshot.historical_success as i64,
            now,
        )
        .await?;
        self.publish_dword(
            paths::HISTORICAL_FAILED,
            snapshot.historical_failure as i64,
            now,
        )
        .await?;
        self.publish_dword(
            paths::REALTIME_SUCCESSFUL,
            snapshot.realtime_success as i64,
            now,
        )
        .await?;
        self.publish_dword(paths::REALTIME_FAILED, snapshot.realtime_failure as i64, now)
            .await?;
        self.publish_dword(
            paths::HISTORICAL_POINTS,
            snapshot.historical_points as i64,
            now,
        )
        .await?;
        Ok(())
    }

    async fn publish_ts(
        &self,
        path: &str,
        ts: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let rendered = ts.map(|t| t.to_rfc3339()).unwrap_or_default();
        self.sink
            .update_value(path, Some(&TagValue::String(rendered)), QualityCode::Good, now)
            .await
    }

    async fn publish_dword(&self, path: &str, value: i64, now: DateTime<Utc>) -> SyncResult<()> {
        self.sink
            .update_value(path, Some(&TagValue::Dword(value)), QualityCode::Good, now)
            .await
    }
}
