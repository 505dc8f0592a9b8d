use crate::quality::QualityCode;
use crate::types::TagDataType;
use crate::value::TagValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tagsync_error::SyncResult;

/// Callback invoked when the local tag store receives a write to a synced
/// tag. Returns the quality the write completed with.
pub type WriteHandler = Arc<dyn Fn(&str, &TagValue) -> QualityCode + Send + Sync>;

/// Adapter over the local hierarchical tag store.
///
/// Paths are slash-separated and rooted at the provider the host assigns to
/// the engine. Creating intermediate folders is the sink's concern; the
/// engine only ever addresses leaf tags.
#[async_trait]
pub trait TagSink: Send + Sync {
    /// Ensures a tag exists at `path` with the given type, creating it and
    /// any missing parent folders. Re-configuring an existing tag with the
    /// same type is a no-op.
    async fn configure_tag(&self, path: &str, data_type: TagDataType) -> SyncResult<()>;

    /// Sets or replaces the documentation string of an existing tag.
    async fn set_tag_description(&self, path: &str, description: &str) -> SyncResult<()>;

    /// Publishes a value with quality and timestamp to an existing tag.
    /// `None` keeps the tag's current value and only updates the quality.
    async fn update_value(
        &self,
        path: &str,
        value: Option<&TagValue>,
        quality: QualityCode,
        timestamp: DateTime<Utc>,
    ) -> SyncResult<()>;

    /// Routes writes landing on `path` to `handler`.
    async fn register_write_handler(&self, path: &str, handler: WriteHandler) -> SyncResult<()>;
}
