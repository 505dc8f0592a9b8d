//! Historical sync loop: drains the relay's bulk mailbox into the sink.
//!
//! The persisted cursor makes the drain resumable: the transaction id is
//! only advanced after a batch has been fully forwarded, and a crash between
//! forward and save means redelivery, never loss.

use crate::cache::MetadataCache;
use crate::mapper::{self, PathOptions};
use crate::overrides::ForcedRealtimeSet;
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tagsync_error::SyncResult;
use tagsync_models::{ExecutionCounters, Settings};
use tagsync_sdk::{coerce_value, HistoricalSyncBatch, TagQuality, TagSink, TelemetryClient};
use tagsync_state::{SyncCursor, SyncStateStore};
use tracing::{debug, info, instrument, warn};

pub struct HistoricalSync {
    settings: Settings,
    client: Arc<dyn TelemetryClient>,
    sink: Arc<dyn TagSink>,
    cache: Arc<MetadataCache>,
    counters: Arc<ExecutionCounters>,
    overrides: Arc<ForcedRealtimeSet>,
    store: Arc<dyn SyncStateStore>,
    in_progress: AtomicBool,
    /// In-memory cursor; `None` until first loaded from the store.
    cursor: Mutex<Option<SyncCursor>>,
    /// (device, tag) pairs already warned about a missing cache entry.
    warned_unmapped: DashSet<(String, String)>,
}

impl HistoricalSync {
    pub fn new(
        settings: Settings,
        client: Arc<dyn TelemetryClient>,
        sink: Arc<dyn TagSink>,
        cache: Arc<MetadataCache>,
        counters: Arc<ExecutionCounters>,
        overrides: Arc<ForcedRealtimeSet>,
        store: Arc<dyn SyncStateStore>,
    ) -> Self {
        Self {
            settings,
            client,
            sink,
            cache,
            counters,
            overrides,
            store,
            in_progress: AtomicBool::new(false),
            cursor: Mutex::new(None),
            warned_unmapped: DashSet::new(),
        }
    }

    /// Current in-memory cursor, when loaded.
    pub fn cursor(&self) -> Option<SyncCursor> {
        self.cursor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Drops the cursor back to the zero state, durably and in memory.
    pub async fn reset(&self) -> SyncResult<()> {
        self.store.reset().await?;
        *self.cursor.lock().unwrap_or_else(|p| p.into_inner()) = Some(SyncCursor::default());
        info!("historical sync cursor reset");
        Ok(())
    }

    /// Scheduler entry point. Does nothing before the first full metadata
    /// build, or in global-live mode without combined live data.
    pub async fn tick(&self) {
        if !self.counters.initial_build_completed() {
            return;
        }
        if self.settings.sync.force_live && !self.settings.sync.combine_live_data {
            return;
        }
        match self.run().await {
            Ok(points) => {
                self.counters.record_historical_success();
                if points > 0 {
                    debug!(points, "historical sync forwarded datapoints");
                }
            }
            Err(e) => {
                self.counters.record_historical_failure();
                warn!(error = %e, "historical sync failed");
            }
        }
    }

    /// Drains the mailbox until `more_available` clears. Returns the number
    /// of datapoints forwarded.
    #[instrument(skip_all)]
    pub async fn run(&self) -> SyncResult<u64> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            debug!("historical sync already running, skipping");
            return Ok(0);
        }
        let result = self.run_inner().await;
        self.in_progress.store(false, Ordering::Release);
        result
    }

    async fn run_inner(&self) -> SyncResult<u64> {
        let auth = self.settings.auth.to_auth_info();
        let mut cursor = match self.cursor() {
            Some(c) => c,
            None => {
                let loaded = self.store.load().await?;
                self.store_cursor(loaded.clone());
                loaded
            }
        };

        let mut total_points: u64 = 0;
        loop {
            let create = cursor.transaction_id.is_none();
            let batch = self
                .client
                .sync_historical(&auth, cursor.transaction_id, create)
                .await?;
            let more = batch.more_available;
            let batch_txid = batch.transaction_id;

            total_points += self.forward_batch(&batch, &mut cursor).await?;

            // commit point: the batch is fully in the sink
            let advanced = match cursor.transaction_id {
                Some(current) if batch_txid <= current => false,
                _ => true,
            };
            if advanced {
                let next = cursor.advanced(batch_txid);
                if let Err(e) = self.store.save(&next).await {
                    // in-memory advance still happens; redelivery on restart
                    warn!(error = %e, txid = batch_txid, "could not persist sync cursor");
                }
                cursor = next;
                self.store_cursor(cursor.clone());
            }

            if !more {
                break;
            }
        }

        self.counters.add_historical_points(total_points);
        self.store_cursor(cursor);
        Ok(total_points)
    }

    /// Forwards every record of a batch to the sink. Coercion faults skip
    /// the single record, unknown tag types skip the tag.
    async fn forward_batch(
        &self,
        batch: &HistoricalSyncBatch,
        cursor: &mut SyncCursor,
    ) -> SyncResult<u64> {
        let opts = self.path_options();
        let combine = self.settings.sync.combine_live_data;
        let mut points: u64 = 0;

        for device in &batch.devices {
            for tag in &device.tags {
                if self.overrides.is_forced(&device.device_name, &tag.tag_name) && !combine {
                    continue;
                }

                let cached = self.cache.tag(&device.device_name, &tag.tag_name);
                // tags with historical logging switched off are not historized
                if cached.as_ref().is_some_and(|t| !t.log_enabled) {
                    debug!(
                        device = %device.device_name,
                        tag = %tag.tag_name,
                        "logging disabled for tag, dropping its records"
                    );
                    continue;
                }
                let data_type = match tag.data_type.or(cached.as_ref().map(|t| t.data_type)) {
                    Some(dt) => dt,
                    None => {
                        warn!(
                            device = %device.device_name,
                            tag = %tag.tag_name,
                            "tag has no known type, skipping its records"
                        );
                        continue;
                    }
                };
                let path = match &cached {
                    Some(t) => mapper::local_path(&device.device_name, t, &opts),
                    None => {
                        self.warn_unmapped_once(&device.device_name, &tag.tag_name);
                        mapper::local_path_by_name(&device.device_name, &tag.tag_name, &opts)
                    }
                };

                for record in &tag.records {
                    let value = match coerce_value(&record.value, data_type) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(
                                device = %device.device_name,
                                tag = %tag.tag_name,
                                error = %e,
                                "skipping record with uncoercible value"
                            );
                            continue;
                        }
                    };
                    let quality = record
                        .quality
                        .as_deref()
                        .map(TagQuality::from_name)
                        .unwrap_or(TagQuality::GOOD)
                        .quality_code();
                    self.sink
                        .update_value(&path, Some(&value), quality, record.timestamp)
                        .await?;
                    cursor.observe_datapoint(record.timestamp);
                    self.counters.observe_historical_point(record.timestamp);
                    points += 1;
                }
            }
        }
        Ok(points)
    }

    fn warn_unmapped_once(&self, device_name: &str, tag_name: &str) {
        let key = (device_name.to_string(), tag_name.to_string());
        if self.warned_unmapped.insert(key) {
            warn!(
                device = %device_name,
                tag = %tag_name,
                "tag not in metadata cache, using ungrouped path"
            );
        }
    }

    fn store_cursor(&self, cursor: SyncCursor) {
        *self.cursor.lock().unwrap_or_else(|p| p.into_inner()) = Some(cursor);
    }

    fn path_options(&self) -> PathOptions {
        PathOptions {
            sort_tags_by_group: self.settings.sync.sort_tags_by_group,
            tag_name_check_disabled: self.settings.sync.tag_name_check_disabled,
        }
    }
}
