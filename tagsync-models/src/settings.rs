use config::{Config, File};
use serde::{self, Deserialize};
use std::{ops::Deref, sync::Arc};
use tagsync_error::SyncResult;
use tagsync_sdk::{AuthInfo, RetryPolicy};

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(config_path: String) -> SyncResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path.as_str()).required(false))
            .add_source(
                config::Environment::with_prefix("TAGSYNC")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }
}

impl From<Inner> for Settings {
    fn from(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Inner {
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub paths: Paths,
}

/// Relay account and device credentials.
///
/// The account triple plus the developer token authenticate against the
/// relay; the device credentials are forwarded to gateways by the proxy
/// endpoints.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Auth {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub developer_token: String,
    #[serde(default)]
    pub device_username: String,
    #[serde(default)]
    pub device_password: String,
}

impl Auth {
    pub fn to_auth_info(&self) -> AuthInfo {
        AuthInfo {
            account: self.account.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            developer_token: self.developer_token.clone(),
            device_username: self.device_username.clone(),
            device_password: self.device_password.clone(),
        }
    }
}

/// Engine behavior knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncOptions {
    /// Bulk historical mailbox poll interval (in seconds)
    #[serde(default = "SyncOptions::historical_poll_secs_default")]
    pub historical_poll_secs: u64,
    /// Live-value poll interval for forced-realtime tags (in seconds)
    #[serde(default = "SyncOptions::realtime_poll_secs_default")]
    pub realtime_poll_secs: u64,
    /// How often the metadata loop checks whether a refresh is due (in seconds)
    #[serde(default = "SyncOptions::metadata_poll_secs_default")]
    pub metadata_poll_secs: u64,
    /// Age after which the cached device/tag directory is rebuilt (in seconds)
    #[serde(default = "SyncOptions::metadata_refresh_secs_default")]
    pub metadata_refresh_secs: u64,
    /// Per-device timeout for proxy fetches during a metadata rebuild (in milliseconds)
    #[serde(default = "SyncOptions::device_fetch_timeout_ms_default")]
    pub device_fetch_timeout_ms: u64,
    /// Delay between launching successive per-device fetches (in milliseconds)
    #[serde(default = "SyncOptions::device_fetch_stagger_ms_default")]
    pub device_fetch_stagger_ms: u64,
    /// Read every tag live instead of draining the historical mailbox
    #[serde(default)]
    pub force_live: bool,
    /// Keep historical sync running for tags that are also read live
    #[serde(default)]
    pub combine_live_data: bool,
    /// Insert a group folder segment into local tag paths
    #[serde(default)]
    pub sort_tags_by_group: bool,
    /// Skip remote tag name validation and sanitize locally instead of
    /// rejecting
    #[serde(default)]
    pub tag_name_check_disabled: bool,
    /// Retry policy for failed metadata rebuilds
    #[serde(default)]
    pub metadata_retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            historical_poll_secs: SyncOptions::historical_poll_secs_default(),
            realtime_poll_secs: SyncOptions::realtime_poll_secs_default(),
            metadata_poll_secs: SyncOptions::metadata_poll_secs_default(),
            metadata_refresh_secs: SyncOptions::metadata_refresh_secs_default(),
            device_fetch_timeout_ms: SyncOptions::device_fetch_timeout_ms_default(),
            device_fetch_stagger_ms: SyncOptions::device_fetch_stagger_ms_default(),
            force_live: false,
            combine_live_data: false,
            sort_tags_by_group: false,
            tag_name_check_disabled: false,
            metadata_retry: RetryPolicy::default(),
        }
    }
}

impl SyncOptions {
    fn historical_poll_secs_default() -> u64 {
        60
    }

    fn realtime_poll_secs_default() -> u64 {
        10
    }

    fn metadata_poll_secs_default() -> u64 {
        30
    }

    fn metadata_refresh_secs_default() -> u64 {
        3600
    }

    fn device_fetch_timeout_ms_default() -> u64 {
        15000
    }

    fn device_fetch_stagger_ms_default() -> u64 {
        100
    }
}

/// Filesystem locations the engine persists into.
#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    /// Sync-state record (last acknowledged transaction id)
    #[serde(default = "Paths::state_file_default")]
    pub state_file: String,
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            state_file: Paths::state_file_default(),
        }
    }
}

impl Paths {
    fn state_file_default() -> String {
        "./data/sync-state.json".into()
    }
}
