//! Engine orchestrator: owns the shared state, spawns the three loops and
//! the control task, and exposes the operator surface (force, reset, stop).

use crate::cache::MetadataCache;
use crate::historical::HistoricalSync;
use crate::metadata::MetadataSync;
use crate::overrides::ForcedRealtimeSet;
use crate::realtime::RealtimeSync;
use crate::status::{paths, StatusPublisher};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagsync_error::{SyncError, SyncResult};
use tagsync_models::{ExecutionCounters, Settings};
use tagsync_sdk::{QualityCode, TagSink, TagValue, TelemetryClient, WriteHandler};
use tagsync_state::SyncStateStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct SyncEngine {
    settings: Settings,
    sink: Arc<dyn TagSink>,
    cache: Arc<MetadataCache>,
    counters: Arc<ExecutionCounters>,
    overrides: Arc<ForcedRealtimeSet>,
    metadata: Arc<MetadataSync>,
    historical: Arc<HistoricalSync>,
    realtime: Arc<RealtimeSync>,
    status: Arc<StatusPublisher>,
    token: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    force_historical: Arc<Notify>,
    reset_requested: Arc<Notify>,
}

impl SyncEngine {
    pub fn new(
        settings: Settings,
        client: Arc<dyn TelemetryClient>,
        sink: Arc<dyn TagSink>,
        store: Arc<dyn SyncStateStore>,
    ) -> Self {
        let cache = Arc::new(MetadataCache::new());
        let counters = Arc::new(ExecutionCounters::default());
        let overrides = Arc::new(ForcedRealtimeSet::new());

        let metadata = Arc::new(MetadataSync::new(
            settings.clone(),
            Arc::clone(&client),
            Arc::clone(&sink),
            Arc::clone(&cache),
            Arc::clone(&counters),
            Arc::clone(&overrides),
        ));
        let historical = Arc::new(HistoricalSync::new(
            settings.clone(),
            Arc::clone(&client),
            Arc::clone(&sink),
            Arc::clone(&cache),
            Arc::clone(&counters),
            Arc::clone(&overrides),
            store,
        ));
        let realtime = Arc::new(RealtimeSync::new(
            settings.clone(),
            Arc::clone(&client),
            Arc::clone(&sink),
            Arc::clone(&cache),
            Arc::clone(&counters),
            Arc::clone(&overrides),
        ));
        let status = Arc::new(StatusPublisher::new(Arc::clone(&sink)));

        Self {
            settings,
            sink,
            cache,
            counters,
            overrides,
            metadata,
            historical,
            realtime,
            status,
            token: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            force_historical: Arc::new(Notify::new()),
            reset_requested: Arc::new(Notify::new()),
        }
    }

    pub fn cache(&self) -> Arc<MetadataCache> {
        Arc::clone(&self.cache)
    }

    pub fn counters(&self) -> Arc<ExecutionCounters> {
        Arc::clone(&self.counters)
    }

    pub fn overrides(&self) -> Arc<ForcedRealtimeSet> {
        Arc::clone(&self.overrides)
    }

    pub fn metadata(&self) -> Arc<MetadataSync> {
        Arc::clone(&self.metadata)
    }

    pub fn historical(&self) -> Arc<HistoricalSync> {
        Arc::clone(&self.historical)
    }

    /// Configures the status surface and spawns the three sync loops plus
    /// the control task.
    pub async fn start(&self) -> SyncResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SyncError::InvalidState("engine already running".into()));
        }
        let token = CancellationToken::new();
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = token.clone();

        self.status.configure().await?;
        self.register_control_handlers().await?;

        let mut handles = Vec::with_capacity(4);

        {
            let metadata = Arc::clone(&self.metadata);
            let status = Arc::clone(&self.status);
            let historical = Arc::clone(&self.historical);
            let counters = Arc::clone(&self.counters);
            let period = Duration::from_secs(self.settings.sync.metadata_poll_secs.max(1));
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            let tick = metadata.tick(&token);
                            if supervise("metadata", tick, &token).await.is_err() {
                                break;
                            }
                            publish_status(&status, &counters, &historical).await;
                        }
                    }
                }
            }));
        }

        {
            let historical = Arc::clone(&self.historical);
            let status = Arc::clone(&self.status);
            let counters = Arc::clone(&self.counters);
            let force = Arc::clone(&self.force_historical);
            let period = Duration::from_secs(self.settings.sync.historical_poll_secs.max(1));
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            if supervise("historical", historical.tick(), &token).await.is_err() {
                                break;
                            }
                            publish_status(&status, &counters, &historical).await;
                        }
                        _ = force.notified() => {
                            info!("historical sync forced outside schedule");
                            if supervise("historical", historical.tick(), &token).await.is_err() {
                                break;
                            }
                            publish_status(&status, &counters, &historical).await;
                        }
                    }
                }
            }));
        }

        {
            let realtime = Arc::clone(&self.realtime);
            let status = Arc::clone(&self.status);
            let counters = Arc::clone(&self.counters);
            let historical = Arc::clone(&self.historical);
            let period = Duration::from_secs(self.settings.sync.realtime_poll_secs.max(1));
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            if supervise("realtime", realtime.tick(), &token).await.is_err() {
                                break;
                            }
                            publish_status(&status, &counters, &historical).await;
                        }
                    }
                }
            }));
        }

        {
            let historical = Arc::clone(&self.historical);
            let counters = Arc::clone(&self.counters);
            let status = Arc::clone(&self.status);
            let reset = Arc::clone(&self.reset_requested);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = reset.notified() => {
                            if let Err(e) = historical.reset().await {
                                warn!(error = %e, "sync state reset failed");
                            }
                            counters.reset();
                            publish_status(&status, &counters, &historical).await;
                            info!("sync state and counters reset");
                        }
                    }
                }
            }));
        }

        *self.handles.lock().unwrap_or_else(|p| p.into_inner()) = handles;
        info!("sync engine started");
        Ok(())
    }

    /// Graceful shutdown: cancels the loops and waits for in-flight ticks.
    pub async fn stop(&self) {
        self.current_token().cancel();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "sync loop ended abnormally");
                }
            }
        }
        self.running.store(false, Ordering::Release);
        info!("sync engine stopped");
    }

    /// Immediate shutdown: cancels and aborts without draining.
    pub fn abort(&self) {
        self.current_token().cancel();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in handles {
            handle.abort();
        }
        self.running.store(false, Ordering::Release);
        info!("sync engine aborted");
    }

    /// Triggers one historical tick outside the schedule.
    pub fn force_historical_sync(&self) {
        self.force_historical.notify_one();
    }

    /// Zeroes the persisted cursor and the counters. The initial-build flag
    /// is kept so the loops stay gated open.
    pub async fn reset_sync_state(&self) -> SyncResult<()> {
        self.historical.reset().await?;
        self.counters.reset();
        publish_status(&self.status, &self.counters, &self.historical).await;
        Ok(())
    }

    async fn register_control_handlers(&self) -> SyncResult<()> {
        let reset = Arc::clone(&self.reset_requested);
        let reset_handler: WriteHandler = Arc::new(move |_path, value| match value {
            TagValue::Boolean(true) => {
                reset.notify_one();
                QualityCode::Good
            }
            TagValue::Boolean(false) => QualityCode::Good,
            _ => QualityCode::Bad,
        });
        self.sink
            .register_write_handler(paths::RESET_SYNC, reset_handler)
            .await?;

        let force = Arc::clone(&self.force_historical);
        let force_handler: WriteHandler = Arc::new(move |_path, value| match value {
            TagValue::Boolean(true) => {
                force.notify_one();
                QualityCode::Good
            }
            TagValue::Boolean(false) => QualityCode::Good,
            _ => QualityCode::Bad,
        });
        self.sink
            .register_write_handler(paths::FORCE_HISTORICAL_SYNC, force_handler)
            .await
    }

    fn current_token(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Runs one loop tick, treating an escaping panic as a programming fault:
/// it is logged as a bug and the whole engine is cancelled.
async fn supervise<F>(loop_name: &str, tick: F, token: &CancellationToken) -> Result<(), ()>
where
    F: Future<Output = ()>,
{
    match AssertUnwindSafe(tick).catch_unwind().await {
        Ok(()) => Ok(()),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            error!(
                loop_name,
                panic = %msg,
                "BUG: sync loop tick panicked, shutting the engine down"
            );
            token.cancel();
            Err(())
        }
    }
}

async fn publish_status(
    status: &StatusPublisher,
    counters: &ExecutionCounters,
    historical: &HistoricalSync,
) {
    let cursor = historical.cursor().unwrap_or_default();
    if let Err(e) = status.publish(&counters.snapshot(), &cursor).await {
        warn!(error = %e, "status publish failed");
    }
}
