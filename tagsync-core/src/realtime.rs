//! Realtime sync loop: polls live values through the relay proxy.
//!
//! In global-live mode every cached device is polled; otherwise only devices
//! and tags with a live-poll override. A transport outage re-publishes the
//! last known values once with `Stale` quality, so consumers can tell a
//! stale value from one that was never read.

use crate::cache::MetadataCache;
use crate::mapper::{self, PathOptions};
use crate::overrides::ForcedRealtimeSet;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tagsync_error::ApiError;
use tagsync_models::{ExecutionCounters, Settings};
use tagsync_sdk::{
    coerce_value, AuthInfo, QualityCode, RemoteDevice, TagQuality, TagSink, TagValue,
    TelemetryClient,
};
use tracing::{debug, info, instrument, warn};

enum DeviceOutcome {
    Synced,
    DeviceFault,
    TransportFailure,
}

pub struct RealtimeSync {
    settings: Settings,
    client: Arc<dyn TelemetryClient>,
    sink: Arc<dyn TagSink>,
    cache: Arc<MetadataCache>,
    counters: Arc<ExecutionCounters>,
    overrides: Arc<ForcedRealtimeSet>,
    /// Last value forwarded per device, keyed by local path.
    last_values: DashMap<String, HashMap<String, TagValue>>,
    /// Devices already stale-marked during the current outage.
    stale_outage: DashSet<String>,
}

impl RealtimeSync {
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
            last_values: DashMap::new(),
            stale_outage: DashSet::new(),
        }
    }

    /// Scheduler entry point. Does nothing before the first full metadata
    /// build or when nothing is selected for live polling.
    #[instrument(skip_all)]
    pub async fn tick(&self) {
        if !self.counters.initial_build_completed() {
            return;
        }
        let targets = self.poll_targets();
        if targets.is_empty() {
            return;
        }

        let auth = self.settings.auth.to_auth_info();
        let fetch_timeout = Duration::from_millis(self.settings.sync.device_fetch_timeout_ms);

        let polls = targets.iter().map(|(device, filter)| {
            self.poll_device(&auth, device, filter.as_ref(), fetch_timeout)
        });
        let outcomes = join_all(polls).await;

        let any_transport_failure = outcomes
            .iter()
            .any(|o| matches!(o, DeviceOutcome::TransportFailure));
        if any_transport_failure {
            self.counters.record_realtime_failure();
        } else {
            self.counters.record_realtime_success();
        }
    }

    /// Devices to poll this tick, each with an optional tag-name filter
    /// (`None` = every tag).
    fn poll_targets(&self) -> Vec<(RemoteDevice, Option<HashSet<String>>)> {
        let mut targets = Vec::new();
        for device in self.cache.devices() {
            if self.settings.sync.force_live || self.overrides.device_forced(&device.name) {
                targets.push((device, None));
                continue;
            }
            let forced: HashSet<String> = self
                .overrides
                .forced_tags_for(&device.name)
                .into_iter()
                .collect();
            if !forced.is_empty() {
                targets.push((device, Some(forced)));
            }
        }
        targets
    }

    async fn poll_device(
        &self,
        auth: &AuthInfo,
        device: &RemoteDevice,
        filter: Option<&HashSet<String>>,
        fetch_timeout: Duration,
    ) -> DeviceOutcome {
        let result = match tokio::time::timeout(
            fetch_timeout,
            self.client.instant_values(auth, device),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(ApiError::Timeout(fetch_timeout)),
        };

        match result {
            Ok(values) => {
                if self.cache.mark_unavailable(&device.name, false) {
                    info!(device = %device.name, "device reachable again");
                }
                self.stale_outage.remove(&device.name);
                self.forward_values(device, values, filter).await;
                DeviceOutcome::Synced
            }
            Err(e) if e.is_device_fault() => {
                if self.cache.mark_unavailable(&device.name, true) {
                    warn!(device = %device.name, error = %e, "device fault during live poll");
                }
                DeviceOutcome::DeviceFault
            }
            Err(e) => {
                warn!(device = %device.name, error = %e, "live poll transport failure");
                self.mark_stale_once(&device.name).await;
                DeviceOutcome::TransportFailure
            }
        }
    }

    async fn forward_values(
        &self,
        device: &RemoteDevice,
        values: Vec<tagsync_sdk::InstantValue>,
        filter: Option<&HashSet<String>>,
    ) {
        let opts = self.path_options();
        let now = Utc::now();
        let tags = self.cache.tags(&device.name);

        for value in values {
            if let Some(requested) = filter {
                if !requested.contains(&value.tag_name) {
                    continue;
                }
            }
            let Some(tag) = tags.get(&value.tag_name) else {
                debug!(device = %device.name, tag = %value.tag_name, "live value for unknown tag, skipping");
                continue;
            };
            // whole-device polls honor the remote classification; an explicit
            // tag-level override arrives as a filter entry and wins
            if filter.is_none() && !tag.realtime_enabled {
                continue;
            }
            let coerced = match coerce_value(&value.value, tag.data_type) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        device = %device.name,
                        tag = %value.tag_name,
                        error = %e,
                        "skipping uncoercible live value"
                    );
                    continue;
                }
            };
            let quality = value
                .quality
                .map(TagQuality::from)
                .unwrap_or(TagQuality::GOOD)
                .quality_code();
            let timestamp = value.timestamp.unwrap_or(now);
            let path = mapper::local_path(&device.name, tag, &opts);
            if let Err(e) = self.sink.update_value(&path, Some(&coerced), quality, timestamp).await
            {
                warn!(path = %path, error = %e, "sink rejected live value");
                continue;
            }
            self.last_values
                .entry(device.name.clone())
                .or_default()
                .insert(path, coerced);
        }
    }

    /// Re-publishes the device's last known values with `Stale` quality,
    /// once per outage.
    async fn mark_stale_once(&self, device_name: &str) {
        if !self.stale_outage.insert(device_name.to_string()) {
            return;
        }
        let snapshot: Vec<(String, TagValue)> = self
            .last_values
            .get(device_name)
            .map(|m| m.iter().map(|(p, v)| (p.clone(), v.clone())).collect())
            .unwrap_or_default();
        let now = Utc::now();
        for (path, value) in snapshot {
            if let Err(e) = self
                .sink
                .update_value(&path, Some(&value), QualityCode::Stale, now)
                .await
            {
                warn!(path = %path, error = %e, "could not stale-mark tag");
            }
        }
    }

    fn path_options(&self) -> PathOptions {
        PathOptions {
            sort_tags_by_group: self.settings.sync.sort_tags_by_group,
            tag_name_check_disabled: self.settings.sync.tag_name_check_disabled,
        }
    }
}
