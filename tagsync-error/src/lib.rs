//! Error taxonomy shared across the tagsync workspace.
//!
//! The split mirrors the failure domains of the engine: [`ApiError`] for
//! everything reported by (or on the way to) the cloud relay, [`StateError`]
//! for the persisted sync-state store, and [`SyncError`] as the top-level
//! type the engine and its loops return.

use anyhow::Error as AnyhowError;
use config::ConfigError;
use std::{io::Error as IoError, time::Duration};
use thiserror::Error;
use tokio::task::JoinError;

pub type SyncResult<T, E = SyncError> = Result<T, E>;
pub type ApiResult<T, E = ApiError> = Result<T, E>;
pub type StateResult<T, E = StateError> = Result<T, E>;

/// Failures reported by the relay APIs or the transport beneath them.
///
/// Transport failures are always retried on the next scheduled tick.
/// Device-scoped faults are isolated to the affected device and never abort
/// a sync cycle.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("device is unavailable or offline")]
    DeviceUnavailable,
    #[error("device credentials are incorrect or not configured on the device")]
    CredentialsIncorrect,
    #[error("device did not respond in time")]
    DeviceTimeout,
    #[error("relay could not reach the device (code {code})")]
    DeviceUnreachable { code: i32 },
    #[error("relay api error ({code}): {message}")]
    Api { code: i32, message: String },
}

impl ApiError {
    /// True for faults scoped to a single device rather than the relay or
    /// the transport. These are handled per-device and never retried within
    /// the same cycle.
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            ApiError::DeviceUnavailable
                | ApiError::CredentialsIncorrect
                | ApiError::DeviceTimeout
                | ApiError::DeviceUnreachable { .. }
        )
    }
}

/// Failures from the persisted sync-state store.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("{0}")]
    Io(#[from] IoError),
    #[error("sync state record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Top-level error type for the synchronization engine.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    State(#[from] StateError),
    #[error("{0}")]
    Join(#[from] JoinError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("{0}")]
    Msg(String),
}

impl From<String> for SyncError {
    #[inline]
    fn from(e: String) -> Self {
        SyncError::Msg(e)
    }
}

impl From<&str> for SyncError {
    #[inline]
    fn from(e: &str) -> Self {
        SyncError::Msg(e.to_string())
    }
}
