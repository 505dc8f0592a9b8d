mod common;

use common::*;
use std::sync::Arc;
use tagsync_core::metadata::{MetadataSync, SyncPhase};
use tagsync_core::{ForcedRealtimeSet, MetadataCache};
use tagsync_models::ExecutionCounters;
use tagsync_sdk::{TagDataType, TagValue};
use tokio_util::sync::CancellationToken;

struct Fixture {
    client: Arc<FakeClient>,
    sink: Arc<FakeSink>,
    cache: Arc<MetadataCache>,
    counters: Arc<ExecutionCounters>,
    overrides: Arc<ForcedRealtimeSet>,
    sync: MetadataSync,
}

fn fixture(settings: tagsync_models::Settings) -> Fixture {
    init_tracing();
    let client = Arc::new(FakeClient::new());
    let sink = Arc::new(FakeSink::new());
    let cache = Arc::new(MetadataCache::new());
    let counters = Arc::new(ExecutionCounters::default());
    let overrides = Arc::new(ForcedRealtimeSet::new());
    let sync = MetadataSync::new(
        settings,
        client.clone(),
        sink.clone(),
        cache.clone(),
        counters.clone(),
        overrides.clone(),
    );
    Fixture {
        client,
        sink,
        cache,
        counters,
        overrides,
        sync,
    }
}

#[tokio::test]
async fn initial_build_populates_cache_and_sink() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01"), device("press-02")]);
    f.client.set_tags(
        "press-01",
        vec![
            tag("press-01", "speed", TagDataType::Float),
            tag("press-01", "count", TagDataType::Integer),
        ],
    );
    f.client
        .set_tags("press-02", vec![tag("press-02", "temp", TagDataType::Float)]);

    f.sync.rebuild(&CancellationToken::new()).await.unwrap();

    assert_eq!(f.cache.device_count(), 2);
    assert_eq!(f.cache.tags("press-01").len(), 2);
    assert_eq!(f.cache.tags("press-02").len(), 1);

    assert!(f.sink.is_configured("press-01/speed"));
    assert!(f.sink.is_configured("press-02/temp"));
    assert!(f.sink.is_configured("press-01/_config/AllRealtime"));
    assert!(f.sink.is_configured("press-01/speed_ForceRealtimeData"));
    assert_eq!(
        f.sink.descriptions.lock().unwrap().get("press-01/speed"),
        Some(&"speed on press-01".to_string())
    );

    let snap = f.counters.snapshot();
    assert!(snap.initial_build_completed);
    assert_eq!(snap.metadata_success, 1);
    assert_eq!(snap.metadata_failure, 0);
    assert!(snap.last_metadata_sync.is_some());
    assert_eq!(f.sync.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn override_write_handlers_flip_forced_set() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();

    f.sink
        .write("press-01/_config/AllRealtime", TagValue::Boolean(true));
    assert!(f.overrides.device_forced("press-01"));
    f.sink
        .write("press-01/_config/AllRealtime", TagValue::Boolean(false));
    assert!(!f.overrides.device_forced("press-01"));

    f.sink
        .write("press-01/speed_ForceRealtimeData", TagValue::Boolean(true));
    assert!(f.overrides.is_forced("press-01", "speed"));
    assert!(!f.overrides.is_forced("press-01", "count"));
}

// a sink fault during commit aborts the rebuild and counts as a failure
#[tokio::test]
async fn sink_failure_during_commit_records_a_failure() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);
    f.sink
        .fail_configure
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = f.sync.rebuild(&CancellationToken::new()).await;

    assert!(result.is_err());
    assert_eq!(f.counters.snapshot().metadata_failure, 1);
    assert!(!f.counters.initial_build_completed());
}

#[tokio::test]
async fn writes_on_synced_tags_forward_to_the_gateway() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();

    let quality = f.sink.write("press-01/speed", TagValue::Float(42.5));
    assert_eq!(quality, Some(tagsync_sdk::QualityCode::Good));

    // forwarding runs on a spawned task
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while f.client.writes.lock().unwrap().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "write was never forwarded"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let writes = f.client.writes.lock().unwrap().clone();
    assert_eq!(
        writes,
        vec![(
            "press-01".to_string(),
            "speed".to_string(),
            TagValue::Float(42.5)
        )]
    );
}

// a failed device keeps its previous tag set while the others refresh
#[tokio::test]
async fn device_fault_is_isolated() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("good"), device("flaky")]);
    f.client
        .set_tags("good", vec![tag("good", "a", TagDataType::Float)]);
    f.client
        .set_tags("flaky", vec![tag("flaky", "old", TagDataType::Float)]);
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();
    assert_eq!(f.cache.tags("flaky").len(), 1);

    // second rebuild: flaky now reports unavailable, good grows a tag
    f.client.set_tags(
        "good",
        vec![
            tag("good", "a", TagDataType::Float),
            tag("good", "b", TagDataType::Boolean),
        ],
    );
    f.client.set_tag_fault("flaky", Some(Fault::Unavailable));
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();

    assert_eq!(f.cache.tags("good").len(), 2);
    assert!(f.cache.tags("flaky").contains_key("old"));
    assert!(f.cache.is_unavailable("flaky"));
    // device faults do not fail the rebuild
    assert_eq!(f.counters.snapshot().metadata_success, 2);
}

// persistent transport failure after the initial build: the attempt cap
// stops the tick and the failure counter advances by exactly the cap
#[tokio::test]
async fn transport_failure_stops_after_capped_attempts() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();
    assert!(f.counters.initial_build_completed());

    f.client.set_tag_fault("press-01", Some(Fault::Transport));
    let before = f.counters.snapshot();
    let result = f.sync.rebuild(&CancellationToken::new()).await;
    assert!(result.is_err());

    let after = f.counters.snapshot();
    assert_eq!(after.metadata_failure - before.metadata_failure, 5);
    assert_eq!(after.metadata_success, before.metadata_success);
    // cache left at the last good snapshot
    assert!(f.cache.tags("press-01").contains_key("speed"));
}

// the first-ever build ignores the attempt cap
#[tokio::test]
async fn initial_build_retries_past_the_cap() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);
    // more directory failures than the cap allows post-initial
    f.client
        .fail_directory_times
        .store(8, std::sync::atomic::Ordering::SeqCst);

    f.sync.rebuild(&CancellationToken::new()).await.unwrap();

    assert!(f.counters.initial_build_completed());
    assert_eq!(f.counters.metadata_failures(), 8);
    assert_eq!(f.cache.device_count(), 1);
}

// retry passes re-fetch only what failed
#[tokio::test]
async fn retry_refetches_only_failed_devices() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("good"), device("flaky")]);
    f.client
        .set_tags("good", vec![tag("good", "a", TagDataType::Float)]);
    f.client
        .set_tags("flaky", vec![tag("flaky", "x", TagDataType::Float)]);
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();

    let tag_calls_before = f.client.tag_calls.load(std::sync::atomic::Ordering::SeqCst);
    f.client.set_tag_fault("flaky", Some(Fault::Transport));
    let _ = f.sync.rebuild(&CancellationToken::new()).await;
    let tag_calls = f.client.tag_calls.load(std::sync::atomic::Ordering::SeqCst) - tag_calls_before;

    // first attempt touches both devices, the 4 retries only the flaky one
    assert_eq!(tag_calls, 2 + 4);
    // but the directory is fetched once per rebuild entry, not per retry
    assert_eq!(
        f.client.directory_calls.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[tokio::test]
async fn refresh_interval_gates_the_tick() {
    let f = fixture(test_settings(|s| s.metadata_refresh_secs = 3600));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);

    let token = CancellationToken::new();
    assert!(f.sync.needs_refresh());
    f.sync.tick(&token).await;
    assert_eq!(f.counters.snapshot().metadata_success, 1);

    // a second tick right away is a no-op
    assert!(!f.sync.needs_refresh());
    f.sync.tick(&token).await;
    assert_eq!(f.counters.snapshot().metadata_success, 1);
    assert_eq!(
        f.client.directory_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn unavailable_device_recovers_with_transition() {
    let f = fixture(test_settings(|_| {}));
    f.client.set_devices(vec![device("press-01")]);
    f.client
        .set_tags("press-01", vec![tag("press-01", "speed", TagDataType::Float)]);
    f.client.set_tag_fault("press-01", Some(Fault::BadCredentials));
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();
    assert!(f.cache.is_unavailable("press-01"));

    f.client.set_tag_fault("press-01", None);
    f.sync.rebuild(&CancellationToken::new()).await.unwrap();
    assert!(!f.cache.is_unavailable("press-01"));
}
