use crate::model::{HistoricalSyncBatch, InstantValue, RemoteDevice, RemoteTag};
use crate::value::TagValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tagsync_error::ApiResult;

/// Credentials presented to the relay on every call.
///
/// The account triple authenticates against the relay itself; the device
/// credentials are forwarded by the proxy endpoints to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub account: String,
    pub username: String,
    pub password: String,
    pub developer_token: String,
    #[serde(default)]
    pub device_username: String,
    #[serde(default)]
    pub device_password: String,
}

impl AuthInfo {
    /// True when every relay-level field is non-empty. Device credentials
    /// are optional; proxy calls fail per-device when they are wrong.
    pub fn is_complete(&self) -> bool {
        !self.account.is_empty()
            && !self.username.is_empty()
            && !self.password.is_empty()
            && !self.developer_token.is_empty()
    }
}

/// Transport-agnostic view of the relay's two APIs.
///
/// `list_devices`, `list_tags`, `instant_values` and `write_tag` go through
/// the live proxy and talk to one gateway at a time; `sync_historical`
/// drains the account-wide bulk mailbox.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    /// Lists every gateway registered under the account.
    async fn list_devices(&self, auth: &AuthInfo) -> ApiResult<Vec<RemoteDevice>>;

    /// Fetches the tag metadata of one gateway via the proxy.
    async fn list_tags(&self, auth: &AuthInfo, device: &RemoteDevice) -> ApiResult<Vec<RemoteTag>>;

    /// Reads the current value of every tag on one gateway via the proxy.
    async fn instant_values(
        &self,
        auth: &AuthInfo,
        device: &RemoteDevice,
    ) -> ApiResult<Vec<InstantValue>>;

    /// Drains one page of the bulk historical mailbox.
    ///
    /// `last_transaction_id` acknowledges the previously received page;
    /// `None` together with `create_transaction` starts a fresh transaction
    /// from the oldest buffered data.
    async fn sync_historical(
        &self,
        auth: &AuthInfo,
        last_transaction_id: Option<u64>,
        create_transaction: bool,
    ) -> ApiResult<HistoricalSyncBatch>;

    /// Writes a value to a tag on one gateway via the proxy.
    async fn write_tag(
        &self,
        auth: &AuthInfo,
        device_name: &str,
        tag_name: &str,
        value: &TagValue,
    ) -> ApiResult<()>;
}
