use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Lock-free runtime counters shared by the sync loops.
///
/// Everything here is observational; nothing is persisted. Timestamps are
/// stored as unix milliseconds, 0 meaning "never".
#[derive(Debug, Default)]
pub struct ExecutionCounters {
    metadata_success: AtomicU64,
    metadata_failure: AtomicU64,
    historical_success: AtomicU64,
    historical_failure: AtomicU64,
    realtime_success: AtomicU64,
    realtime_failure: AtomicU64,
    historical_points: AtomicU64,

    last_metadata_sync_ms: AtomicI64,
    last_historical_sync_ms: AtomicI64,
    last_realtime_sync_ms: AtomicI64,
    latest_historical_point_ms: AtomicI64,

    /// Set once the first full metadata build commits. Survives counter
    /// resets so the historical/realtime gates stay open.
    initial_build_completed: AtomicBool,
}

impl ExecutionCounters {
    pub fn record_metadata_success(&self) {
        self.metadata_success.fetch_add(1, Ordering::Relaxed);
        self.last_metadata_sync_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_metadata_failure(&self) {
        self.metadata_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_historical_success(&self) {
        self.historical_success.fetch_add(1, Ordering::Relaxed);
        self.last_historical_sync_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_historical_failure(&self) {
        self.historical_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_realtime_success(&self) {
        self.realtime_success.fetch_add(1, Ordering::Relaxed);
        self.last_realtime_sync_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_realtime_failure(&self) {
        self.realtime_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_historical_points(&self, n: u64) {
        self.historical_points.fetch_add(n, Ordering::Relaxed);
    }

    /// Records the newest datapoint timestamp seen in a historical batch.
    /// Only moves forward.
    pub fn observe_historical_point(&self, ts: DateTime<Utc>) {
        let millis = ts.timestamp_millis();
        self.latest_historical_point_ms
            .fetch_max(millis, Ordering::Relaxed);
    }

    pub fn mark_initial_build_completed(&self) {
        self.initial_build_completed.store(true, Ordering::Release);
    }

    pub fn initial_build_completed(&self) -> bool {
        self.initial_build_completed.load(Ordering::Acquire)
    }

    pub fn metadata_failures(&self) -> u64 {
        self.metadata_failure.load(Ordering::Relaxed)
    }

    pub fn historical_failures(&self) -> u64 {
        self.historical_failure.load(Ordering::Relaxed)
    }

    /// Zeroes every counter and timestamp. The initial-build flag is kept;
    /// a reset must not re-close the historical and realtime gates.
    pub fn reset(&self) {
        self.metadata_success.store(0, Ordering::Relaxed);
        self.metadata_failure.store(0, Ordering::Relaxed);
        self.historical_success.store(0, Ordering::Relaxed);
        self.historical_failure.store(0, Ordering::Relaxed);
        self.realtime_success.store(0, Ordering::Relaxed);
        self.realtime_failure.store(0, Ordering::Relaxed);
        self.historical_points.store(0, Ordering::Relaxed);
        self.last_metadata_sync_ms.store(0, Ordering::Relaxed);
        self.last_historical_sync_ms.store(0, Ordering::Relaxed);
        self.last_realtime_sync_ms.store(0, Ordering::Relaxed);
        self.latest_historical_point_ms.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            metadata_success: self.metadata_success.load(Ordering::Relaxed),
            metadata_failure: self.metadata_failure.load(Ordering::Relaxed),
            historical_success: self.historical_success.load(Ordering::Relaxed),
            historical_failure: self.historical_failure.load(Ordering::Relaxed),
            realtime_success: self.realtime_success.load(Ordering::Relaxed),
            realtime_failure: self.realtime_failure.load(Ordering::Relaxed),
            historical_points: self.historical_points.load(Ordering::Relaxed),
            last_metadata_sync: millis_to_ts(self.last_metadata_sync_ms.load(Ordering::Relaxed)),
            last_historical_sync: millis_to_ts(
                self.last_historical_sync_ms.load(Ordering::Relaxed),
            ),
            last_realtime_sync: millis_to_ts(self.last_realtime_sync_ms.load(Ordering::Relaxed)),
            latest_historical_point: millis_to_ts(
                self.latest_historical_point_ms.load(Ordering::Relaxed),
            ),
            initial_build_completed: self.initial_build_completed(),
        }
    }
}

fn millis_to_ts(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        None
    } else {
        Utc.timestamp_millis_opt(millis).single()
    }
}

/// Point-in-time view of the counters, published to the status tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub metadata_success: u64,
    pub metadata_failure: u64,
    pub historical_success: u64,
    pub historical_failure: u64,
    pub realtime_success: u64,
    pub realtime_failure: u64,
    pub historical_points: u64,
    pub last_metadata_sync: Option<DateTime<Utc>>,
    pub last_historical_sync: Option<DateTime<Utc>>,
    pub last_realtime_sync: Option<DateTime<Utc>>,
    pub latest_historical_point: Option<DateTime<Utc>>,
    pub initial_build_completed: bool,
}
