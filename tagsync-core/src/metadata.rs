//! Metadata sync loop: rebuilds the device/tag directory from the relay.
//!
//! A rebuild walks `Idle -> FetchingDirectory -> FetchingTags -> Committing
//! -> Idle`, entering `Retrying` whenever a transport fault leaves work
//! behind. Device-scoped faults (unavailable, bad credentials, timeouts)
//! never trigger a retry; the device keeps its previous tag set and the
//! fault is logged on transition only.

use crate::cache::MetadataCache;
use crate::mapper::{self, PathOptions};
use crate::overrides::{self, ForcedRealtimeSet};
use backoff::backoff::Backoff;
use chrono::Utc;
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagsync_error::{ApiError, SyncError, SyncResult};
use tagsync_models::{ExecutionCounters, Settings};
use tagsync_sdk::retry::build_exponential_backoff;
use tagsync_sdk::{
    AuthInfo, QualityCode, RemoteDevice, RemoteTag, TagDataType, TagSink, TagValue,
    TelemetryClient, WriteHandler,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a rebuild currently is. `Retrying` carries the attempt that just
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    FetchingDirectory,
    FetchingTags,
    Committing,
    Retrying { attempt: u32 },
}

pub struct MetadataSync {
    settings: Settings,
    client: Arc<dyn TelemetryClient>,
    sink: Arc<dyn TagSink>,
    cache: Arc<MetadataCache>,
    counters: Arc<ExecutionCounters>,
    overrides: Arc<ForcedRealtimeSet>,
    in_progress: AtomicBool,
    /// Unix millis of the last successful rebuild, 0 = never.
    last_refresh_ms: AtomicI64,
    phase: Mutex<SyncPhase>,
}

impl MetadataSync {
    pub fn new(
        settings: Settings,
        client: Arc<dyn TelemetryClient>,
        sink: Arc<dyn TagSink>,
        cache: Arc<MetadataCache>,
        counters: Arc<ExecutionCounters>,
        overrides: Arc<ForcedRealtimeSet>,
    ) -> Self {
        Self {
            settings,
            client,
            sink,
            cache,
            counters,
            overrides,
            in_progress: AtomicBool::new(false),
            last_refresh_ms: AtomicI64::new(0),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = phase;
    }

    /// True when the cached directory is older than the refresh interval.
    pub fn needs_refresh(&self) -> bool {
        let last = self.last_refresh_ms.load(Ordering::Relaxed);
        if last == 0 {
            return true;
        }
        let age_ms = Utc::now().timestamp_millis().saturating_sub(last);
        age_ms >= (self.settings.sync.metadata_refresh_secs as i64).saturating_mul(1000)
    }

    /// Scheduler entry point. Skips quietly when no refresh is due or a
    /// rebuild is already running.
    pub async fn tick(&self, token: &CancellationToken) {
        if !self.needs_refresh() {
            return;
        }
        if let Err(e) = self.rebuild(token).await {
            warn!(error = %e, "metadata rebuild did not complete");
        }
    }

    /// Runs one full rebuild, retrying transport faults with exponential
    /// backoff. The first-ever build retries without an attempt cap; later
    /// rebuilds stop after the configured cap and leave the cache at its
    /// last good snapshot.
    #[instrument(skip_all)]
    pub async fn rebuild(&self, token: &CancellationToken) -> SyncResult<()> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            debug!("metadata rebuild already in progress, skipping tick");
            return Ok(());
        }
        let result = self.rebuild_inner(token).await;
        self.set_phase(SyncPhase::Idle);
        self.in_progress.store(false, Ordering::Release);
        result
    }

    async fn rebuild_inner(&self, token: &CancellationToken) -> SyncResult<()> {
        let auth = self.settings.auth.to_auth_info();
        if !auth.is_complete() {
            self.counters.record_metadata_failure();
            return Err(SyncError::InvalidState(
                "relay credentials are not configured".into(),
            ));
        }

        let policy = self.settings.sync.metadata_retry;
        let max_attempts = policy.max_attempts.unwrap_or(u32::MAX).max(1);
        let initial_build = !self.counters.initial_build_completed();
        let mut backoff = build_exponential_backoff(&policy);

        let mut need_directory = true;
        // devices whose tag fetch still has to happen (or be retried)
        let mut pending: Vec<RemoteDevice> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if need_directory {
                self.set_phase(SyncPhase::FetchingDirectory);
                match self.client.list_devices(&auth).await {
                    Ok(mut devices) => {
                        // spread clusters of offline devices across the fan-out
                        devices.shuffle(&mut rand::thread_rng());
                        self.cache.replace_devices(devices.clone());
                        pending = devices;
                        need_directory = false;
                    }
                    Err(e) => {
                        self.counters.record_metadata_failure();
                        warn!(error = %e, attempt, "device directory fetch failed");
                        if !self.backoff_or_give_up(
                            token,
                            &mut backoff,
                            attempt,
                            max_attempts,
                            initial_build,
                        )
                        .await?
                        {
                            return Err(e.into());
                        }
                        continue;
                    }
                }
            }

            self.set_phase(SyncPhase::FetchingTags);
            let (fetched, failed) = self.fetch_tag_sets(&auth, &pending, token).await;

            self.set_phase(SyncPhase::Committing);
            for (device, tags) in fetched {
                if let Err(e) = self.commit_device(&device, tags).await {
                    self.counters.record_metadata_failure();
                    return Err(e);
                }
            }

            if failed.is_empty() {
                self.counters.record_metadata_success();
                self.counters.mark_initial_build_completed();
                self.last_refresh_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                info!(devices = self.cache.device_count(), "metadata rebuild complete");
                return Ok(());
            }

            self.counters.record_metadata_failure();
            warn!(
                failed = failed.len(),
                attempt, "tag fetch failed for some devices"
            );
            // only the failed devices get retried
            pending = failed;
            if !self
                .backoff_or_give_up(token, &mut backoff, attempt, max_attempts, initial_build)
                .await?
            {
                return Err(SyncError::Msg(format!(
                    "metadata rebuild gave up with {} device(s) unfetched",
                    pending.len()
                )));
            }
        }
    }

    /// Waits out the backoff before the next attempt. Returns false when the
    /// attempt cap is reached (never on the first-ever build).
    async fn backoff_or_give_up(
        &self,
        token: &CancellationToken,
        backoff: &mut backoff::ExponentialBackoff,
        attempt: u32,
        max_attempts: u32,
        initial_build: bool,
    ) -> SyncResult<bool> {
        if !initial_build && attempt >= max_attempts {
            return Ok(false);
        }
        self.set_phase(SyncPhase::Retrying { attempt });
        let delay = backoff.next_backoff().unwrap_or(Duration::from_millis(
            self.settings.sync.metadata_retry.max_interval_ms,
        ));
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(true),
            _ = token.cancelled() => Err(SyncError::InvalidState(
                "metadata rebuild cancelled".into(),
            )),
        }
    }

    /// Fans out per-device tag fetches with a launch stagger and a per-fetch
    /// timeout. Returns committed successes and the devices to retry;
    /// device-scoped faults are consumed here and belong to neither list.
    async fn fetch_tag_sets(
        &self,
        auth: &AuthInfo,
        devices: &[RemoteDevice],
        token: &CancellationToken,
    ) -> (Vec<(RemoteDevice, Vec<RemoteTag>)>, Vec<RemoteDevice>) {
        let stagger = Duration::from_millis(self.settings.sync.device_fetch_stagger_ms);
        let fetch_timeout = Duration::from_millis(self.settings.sync.device_fetch_timeout_ms);

        let futures = devices.iter().enumerate().map(|(i, device)| {
            let client = Arc::clone(&self.client);
            async move {
                tokio::time::sleep(stagger.saturating_mul(i as u32)).await;
                let result = tokio::select! {
                    r = tokio::time::timeout(fetch_timeout, client.list_tags(auth, device)) => {
                        match r {
                            Ok(inner) => inner,
                            Err(_) => Err(ApiError::Timeout(fetch_timeout)),
                        }
                    }
                    _ = token.cancelled() => Err(ApiError::Transport("cancelled".into())),
                };
                (device.clone(), result)
            }
        });

        let mut ok = Vec::new();
        let mut retry = Vec::new();
        for (device, result) in join_all(futures).await {
            match result {
                Ok(tags) => {
                    if self.cache.mark_unavailable(&device.name, false) {
                        info!(device = %device.name, "device reachable again");
                    }
                    ok.push((device, tags));
                }
                Err(e) if e.is_device_fault() => {
                    self.log_device_fault(&device.name, &e);
                }
                Err(e) => {
                    debug!(device = %device.name, error = %e, "tag fetch will be retried");
                    retry.push(device);
                }
            }
        }
        (ok, retry)
    }

    fn log_device_fault(&self, device_name: &str, error: &ApiError) {
        let transitioned = self.cache.mark_unavailable(device_name, true);
        if !transitioned {
            return;
        }
        match error {
            ApiError::DeviceUnavailable => {
                warn!(device = %device_name, "device is unavailable")
            }
            ApiError::CredentialsIncorrect => {
                warn!(device = %device_name, "device credentials are incorrect")
            }
            ApiError::DeviceTimeout => {
                warn!(device = %device_name, "device did not respond")
            }
            ApiError::DeviceUnreachable { code } => {
                warn!(device = %device_name, code, "relay could not reach device")
            }
            other => warn!(device = %device_name, error = %other, "device fault"),
        }
    }

    /// Commits a device's fresh tag set: swap in the cache, then push tag
    /// configuration and the override write handlers to the sink.
    async fn commit_device(&self, device: &RemoteDevice, tags: Vec<RemoteTag>) -> SyncResult<()> {
        let opts = self.path_options();
        self.cache.replace_tags(&device.name, tags.clone());

        let device_override = overrides::device_override_path(&device.name);
        self.sink
            .configure_tag(&device_override, TagDataType::Boolean)
            .await?;
        self.sink
            .register_write_handler(&device_override, self.device_override_handler(&device.name))
            .await?;

        for tag in tags {
            let path = mapper::local_path(&device.name, &tag, &opts);
            self.sink.configure_tag(&path, tag.data_type).await?;
            if let Some(desc) = &tag.description {
                self.sink.set_tag_description(&path, desc).await?;
            }
            self.sink
                .register_write_handler(&path, self.write_back_handler(&device.name, &tag.name))
                .await?;
            let override_path = overrides::tag_override_path(&path);
            self.sink
                .configure_tag(&override_path, TagDataType::Boolean)
                .await?;
            self.sink
                .register_write_handler(
                    &override_path,
                    self.tag_override_handler(&device.name, &tag.name),
                )
                .await?;
        }
        debug!(device = %device.name, tags = self.cache.tags(&device.name).len(), "device committed");
        Ok(())
    }

    /// Forwards local writes on a synced tag back to the gateway. The write
    /// is dispatched asynchronously; a forwarding failure is logged and not
    /// surfaced to the writer.
    fn write_back_handler(&self, device_name: &str, tag_name: &str) -> WriteHandler {
        let client = Arc::clone(&self.client);
        let auth = self.settings.auth.to_auth_info();
        let device = device_name.to_string();
        let tag = tag_name.to_string();
        Arc::new(move |_path, value| {
            let client = Arc::clone(&client);
            let auth = auth.clone();
            let device = device.clone();
            let tag = tag.clone();
            let value = value.clone();
            tokio::spawn(async move {
                if let Err(e) = client.write_tag(&auth, &device, &tag, &value).await {
                    warn!(device = %device, tag = %tag, error = %e, "write-back to gateway failed");
                }
            });
            QualityCode::Good
        })
    }

    fn device_override_handler(&self, device_name: &str) -> WriteHandler {
        let overrides = Arc::clone(&self.overrides);
        let device = device_name.to_string();
        Arc::new(move |_path, value| match value {
            TagValue::Boolean(forced) => {
                overrides.set_device(&device, *forced);
                QualityCode::Good
            }
            _ => QualityCode::Bad,
        })
    }

    fn tag_override_handler(&self, device_name: &str, tag_name: &str) -> WriteHandler {
        let overrides = Arc::clone(&self.overrides);
        let device = device_name.to_string();
        let tag = tag_name.to_string();
        Arc::new(move |_path, value| match value {
            TagValue::Boolean(forced) => {
                overrides.set_tag(&device, &tag, *forced);
                QualityCode::Good
            }
            _ => QualityCode::Bad,
        })
    }

    fn path_options(&self) -> PathOptions {
        PathOptions {
            sort_tags_by_group: self.settings.sync.sort_tags_by_group,
            tag_name_check_disabled: self.settings.sync.tag_name_check_disabled,
        }
    }
}
