//! Core abstractions for the tagsync engine.
//!
//! This crate defines the tag data model, value and quality types, the
//! [`client::TelemetryClient`] trait implemented by relay transports, and the
//! [`sink::TagSink`] trait implemented by the local tag store adapter.

pub mod client;
pub mod model;
pub mod quality;
pub mod retry;
pub mod sink;
pub mod types;
pub mod value;

pub use client::{AuthInfo, TelemetryClient};
pub use model::{
    DeviceHistory, HistoricalRecord, HistoricalSyncBatch, InstantValue, RemoteDevice, RemoteTag,
    TagGroups, TagHistory,
};
pub use quality::{QualityCode, SubStatus, TagQuality};
pub use retry::RetryPolicy;
pub use sink::{TagSink, WriteHandler};
pub use types::TagDataType;
pub use value::{coerce_value, TagValue, TagValueCastError};
