//! Synchronization engine core.
//!
//! Three independently scheduled loops (metadata, historical, realtime)
//! share a metadata cache and a set of counters, coordinated by the
//! [`engine::SyncEngine`] orchestrator. Hosts supply the transport
//! (`TelemetryClient`) and the local tag store adapter (`TagSink`).

pub mod cache;
pub mod engine;
pub mod historical;
pub mod logging;
pub mod mapper;
pub mod metadata;
pub mod overrides;
pub mod realtime;
pub mod status;

pub use cache::MetadataCache;
pub use engine::SyncEngine;
pub use overrides::ForcedRealtimeSet;
