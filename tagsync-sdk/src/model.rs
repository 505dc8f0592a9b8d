use crate::types::TagDataType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A gateway device registered under the relay account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDevice {
    pub id: u64,
    pub name: String,
    /// URL-safe form of the name, used by proxy endpoints.
    #[serde(default)]
    pub encoded_name: String,
    /// Reachability as reported by the directory, e.g. "online".
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub custom_attributes: Vec<String>,
}

/// Group membership flags carried by a remote tag. Gateways expose four
/// fixed groups; membership drives the optional group path segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroups {
    #[serde(default)]
    pub a: bool,
    #[serde(default)]
    pub b: bool,
    #[serde(default)]
    pub c: bool,
    #[serde(default)]
    pub d: bool,
}

impl TagGroups {
    /// Concatenated letters of the groups this tag belongs to, in fixed
    /// A-B-C-D order. Empty when the tag is in no group.
    pub fn letters(&self) -> String {
        let mut out = String::with_capacity(4);
        if self.a {
            out.push('A');
        }
        if self.b {
            out.push('B');
        }
        if self.c {
            out.push('C');
        }
        if self.d {
            out.push('D');
        }
        out
    }
}

/// A tag as described by the relay's metadata endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTag {
    pub id: u64,
    pub name: String,
    pub device_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub data_type: TagDataType,
    /// Gateway logs this tag into the historical mailbox.
    #[serde(default)]
    pub log_enabled: bool,
    /// Gateway allows live reads of this tag.
    #[serde(default)]
    pub realtime_enabled: bool,
    #[serde(default)]
    pub groups: TagGroups,
    /// Current raw value at metadata fetch time.
    #[serde(default)]
    pub value: JsonValue,
    /// Current raw quality word at metadata fetch time.
    #[serde(default)]
    pub quality: Option<u16>,
}

/// A single live value from the proxy's instant-values endpoint. The quality
/// arrives as a raw word and may be absent entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantValue {
    pub tag_name: String,
    pub value: JsonValue,
    #[serde(default)]
    pub quality: Option<u16>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One timestamped datapoint from the bulk historical mailbox. Quality comes
/// as a lowercase name here, unlike the live endpoint's raw word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRecord {
    pub timestamp: DateTime<Utc>,
    pub value: JsonValue,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Historical datapoints for one tag, with the tag identity the mailbox
/// reported them under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagHistory {
    pub tag_id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub data_type: Option<TagDataType>,
    #[serde(default)]
    pub records: Vec<HistoricalRecord>,
}

/// Historical datapoints grouped by the device that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHistory {
    pub device_id: u64,
    pub device_name: String,
    #[serde(default)]
    pub tags: Vec<TagHistory>,
}

/// One page of the bulk historical mailbox.
///
/// `transaction_id` acknowledges everything up to and including this page;
/// passing it back on the next call releases the data server-side.
/// `more_available` signals that another page should be fetched immediately
/// rather than waiting for the next poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalSyncBatch {
    pub transaction_id: u64,
    #[serde(default)]
    pub more_available: bool,
    #[serde(default)]
    pub devices: Vec<DeviceHistory>,
}

impl HistoricalSyncBatch {
    /// Total number of datapoints across every device and tag in the batch.
    pub fn datapoint_count(&self) -> u64 {
        self.devices
            .iter()
            .flat_map(|d| d.tags.iter())
            .map(|t| t.records.len() as u64)
            .sum()
    }
}
