#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use tagsync_error::{ApiError, ApiResult, StateResult, SyncResult};
use tagsync_models::settings::{Auth, Inner, SyncOptions};
use tagsync_models::Settings;
use tagsync_sdk::{
    AuthInfo, DeviceHistory, HistoricalRecord, HistoricalSyncBatch, InstantValue, QualityCode,
    RemoteDevice, RemoteTag, RetryPolicy, TagDataType, TagGroups, TagHistory, TagSink, TagValue,
    TelemetryClient, WriteHandler,
};
use tagsync_state::{SyncCursor, SyncStateStore};

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Settings with complete credentials and retry intervals short enough for
/// tests.
pub fn test_settings(mutate: impl FnOnce(&mut SyncOptions)) -> Settings {
    let mut sync = SyncOptions {
        device_fetch_stagger_ms: 0,
        device_fetch_timeout_ms: 1_000,
        metadata_retry: RetryPolicy {
            max_attempts: Some(5),
            initial_interval_ms: 1,
            max_interval_ms: 2,
            randomization_factor: 0.0,
            multiplier: 1.0,
            max_elapsed_time_ms: None,
        },
        ..Default::default()
    };
    mutate(&mut sync);
    Settings::from(Inner {
        auth: Auth {
            account: "acme".into(),
            username: "ops".into(),
            password: "secret".into(),
            developer_token: "tok".into(),
            device_username: "adm".into(),
            device_password: "adm".into(),
        },
        sync,
        paths: Default::default(),
    })
}

pub fn device(name: &str) -> RemoteDevice {
    RemoteDevice {
        id: 1,
        name: name.into(),
        encoded_name: name.into(),
        status: "online".into(),
        description: None,
        custom_attributes: vec![],
    }
}

pub fn tag(device_name: &str, name: &str, data_type: TagDataType) -> RemoteTag {
    RemoteTag {
        id: 1,
        name: name.into(),
        device_name: device_name.into(),
        description: Some(format!("{name} on {device_name}")),
        data_type,
        log_enabled: true,
        realtime_enabled: true,
        groups: TagGroups::default(),
        value: serde_json::Value::Null,
        quality: None,
    }
}

pub fn record(value: serde_json::Value, quality: &str, ts: DateTime<Utc>) -> HistoricalRecord {
    HistoricalRecord {
        timestamp: ts,
        value,
        quality: Some(quality.into()),
    }
}

pub fn batch(
    txid: u64,
    more: bool,
    device_name: &str,
    tags: Vec<(&str, TagDataType, Vec<HistoricalRecord>)>,
) -> HistoricalSyncBatch {
    HistoricalSyncBatch {
        transaction_id: txid,
        more_available: more,
        devices: vec![DeviceHistory {
            device_id: 1,
            device_name: device_name.into(),
            tags: tags
                .into_iter()
                .map(|(name, dt, records)| TagHistory {
                    tag_id: 1,
                    tag_name: name.into(),
                    data_type: Some(dt),
                    records,
                })
                .collect(),
        }],
    }
}

/// Unconditional failure injected for one device's proxy calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Unavailable,
    BadCredentials,
}

impl Fault {
    fn to_error(self) -> ApiError {
        match self {
            Fault::Transport => ApiError::Transport("connection refused".into()),
            Fault::Unavailable => ApiError::DeviceUnavailable,
            Fault::BadCredentials => ApiError::CredentialsIncorrect,
        }
    }
}

/// In-memory relay with programmable faults and call counters.
#[derive(Default)]
pub struct FakeClient {
    pub devices: Mutex<Vec<RemoteDevice>>,
    pub tags: Mutex<HashMap<String, Vec<RemoteTag>>>,
    pub instant: Mutex<HashMap<String, Vec<InstantValue>>>,
    pub mailbox: Mutex<VecDeque<HistoricalSyncBatch>>,

    /// Fail the next N directory fetches with a transport error.
    pub fail_directory_times: AtomicUsize,
    /// Per-device fault for `list_tags`.
    pub tag_faults: Mutex<HashMap<String, Fault>>,
    /// Per-device fault for `instant_values`.
    pub instant_faults: Mutex<HashMap<String, Fault>>,
    /// Fail every `sync_historical` call with a transport error.
    pub fail_historical: AtomicBool,

    pub directory_calls: AtomicUsize,
    pub tag_calls: AtomicUsize,
    pub instant_calls: AtomicUsize,
    pub historical_calls: Mutex<Vec<(Option<u64>, bool)>>,
    pub writes: Mutex<Vec<(String, String, TagValue)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_devices(&self, devices: Vec<RemoteDevice>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_tags(&self, device_name: &str, tags: Vec<RemoteTag>) {
        self.tags
            .lock()
            .unwrap()
            .insert(device_name.into(), tags);
    }

    pub fn set_instant(&self, device_name: &str, values: Vec<InstantValue>) {
        self.instant
            .lock()
            .unwrap()
            .insert(device_name.into(), values);
    }

    pub fn push_batch(&self, batch: HistoricalSyncBatch) {
        self.mailbox.lock().unwrap().push_back(batch);
    }

    pub fn set_tag_fault(&self, device_name: &str, fault: Option<Fault>) {
        let mut faults = self.tag_faults.lock().unwrap();
        match fault {
            Some(f) => faults.insert(device_name.into(), f),
            None => faults.remove(device_name),
        };
    }

    pub fn set_instant_fault(&self, device_name: &str, fault: Option<Fault>) {
        let mut faults = self.instant_faults.lock().unwrap();
        match fault {
            Some(f) => faults.insert(device_name.into(), f),
            None => faults.remove(device_name),
        };
    }

    pub fn historical_calls(&self) -> Vec<(Option<u64>, bool)> {
        self.historical_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryClient for FakeClient {
    async fn list_devices(&self, _auth: &AuthInfo) -> ApiResult<Vec<RemoteDevice>> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_directory_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_directory_times.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::Transport("directory unreachable".into()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn list_tags(&self, _auth: &AuthInfo, device: &RemoteDevice) -> ApiResult<Vec<RemoteTag>> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.tag_faults.lock().unwrap().get(&device.name) {
            return Err(fault.to_error());
        }
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(&device.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn instant_values(
        &self,
        _auth: &AuthInfo,
        device: &RemoteDevice,
    ) -> ApiResult<Vec<InstantValue>> {
        self.instant_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.instant_faults.lock().unwrap().get(&device.name) {
            return Err(fault.to_error());
        }
        Ok(self
            .instant
            .lock()
            .unwrap()
            .get(&device.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn sync_historical(
        &self,
        _auth: &AuthInfo,
        last_transaction_id: Option<u64>,
        create_transaction: bool,
    ) -> ApiResult<HistoricalSyncBatch> {
        self.historical_calls
            .lock()
            .unwrap()
            .push((last_transaction_id, create_transaction));
        if self.fail_historical.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("mailbox unreachable".into()));
        }
        let next = self.mailbox.lock().unwrap().pop_front();
        Ok(next.unwrap_or(HistoricalSyncBatch {
            transaction_id: last_transaction_id.unwrap_or(0),
            more_available: false,
            devices: vec![],
        }))
    }

    async fn write_tag(
        &self,
        _auth: &AuthInfo,
        device_name: &str,
        tag_name: &str,
        value: &TagValue,
    ) -> ApiResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((device_name.into(), tag_name.into(), value.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub path: String,
    pub value: Option<TagValue>,
    pub quality: QualityCode,
    pub timestamp: DateTime<Utc>,
}

/// Recording tag store.
#[derive(Default)]
pub struct FakeSink {
    pub configured: Mutex<HashMap<String, TagDataType>>,
    pub descriptions: Mutex<HashMap<String, String>>,
    pub updates: Mutex<Vec<Update>>,
    pub handlers: Mutex<HashMap<String, WriteHandler>>,
    pub fail_configure: AtomicBool,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates_for(&self, path: &str) -> Vec<Update> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.path == path)
            .cloned()
            .collect()
    }

    pub fn last_update(&self, path: &str) -> Option<Update> {
        self.updates_for(path).into_iter().last()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn is_configured(&self, path: &str) -> bool {
        self.configured.lock().unwrap().contains_key(path)
    }

    /// Simulates a host write landing on a tag, dispatching to the
    /// registered handler.
    pub fn write(&self, path: &str, value: TagValue) -> Option<QualityCode> {
        let handler = self.handlers.lock().unwrap().get(path).cloned();
        handler.map(|h| h(path, &value))
    }
}

#[async_trait]
impl TagSink for FakeSink {
    async fn configure_tag(&self, path: &str, data_type: TagDataType) -> SyncResult<()> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err("tag store rejected configuration".into());
        }
        self.configured.lock().unwrap().insert(path.into(), data_type);
        Ok(())
    }

    async fn set_tag_description(&self, path: &str, description: &str) -> SyncResult<()> {
        self.descriptions
            .lock()
            .unwrap()
            .insert(path.into(), description.into());
        Ok(())
    }

    async fn update_value(
        &self,
        path: &str,
        value: Option<&TagValue>,
        quality: QualityCode,
        timestamp: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.updates.lock().unwrap().push(Update {
            path: path.into(),
            value: value.cloned(),
            quality,
            timestamp,
        });
        Ok(())
    }

    async fn register_write_handler(&self, path: &str, handler: WriteHandler) -> SyncResult<()> {
        self.handlers.lock().unwrap().insert(path.into(), handler);
        Ok(())
    }
}

/// In-memory state store with an optional save fault.
#[derive(Default)]
pub struct MemStore {
    pub cursor: Mutex<SyncCursor>,
    pub fail_save: AtomicBool,
    pub save_count: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self) -> SyncCursor {
        self.cursor.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncStateStore for MemStore {
    async fn load(&self) -> StateResult<SyncCursor> {
        Ok(self.cursor.lock().unwrap().clone())
    }

    async fn save(&self, cursor: &SyncCursor) -> StateResult<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        *self.cursor.lock().unwrap() = cursor.clone();
        Ok(())
    }
}
