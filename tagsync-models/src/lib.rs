pub mod metrics;
pub mod settings;

pub use metrics::{ExecutionCounters, StatusSnapshot};
pub use settings::{Auth, Inner, Paths, Settings, SyncOptions};
