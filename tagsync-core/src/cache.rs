use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tagsync_sdk::{RemoteDevice, RemoteTag};

/// Shared snapshot of one device's tags, keyed by remote tag name.
pub type TagSet = Arc<HashMap<String, RemoteTag>>;

/// In-memory directory of devices and their tags.
///
/// Readers always see a complete snapshot: the device directory is swapped
/// as one `Arc` under a lock that is never held across `.await`, and each
/// device's tag set is replaced as a whole. A rebuild that fails for one
/// device leaves that device's previous tag set in place.
#[derive(Debug, Default)]
pub struct MetadataCache {
    devices: RwLock<Arc<HashMap<String, RemoteDevice>>>,
    tags: DashMap<String, TagSet>,
    unavailable: DashSet<String>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole device directory in one swap. Tag sets are kept;
    /// they are refreshed per device as their fetches complete.
    pub fn replace_devices(&self, devices: Vec<RemoteDevice>) {
        let map: HashMap<String, RemoteDevice> =
            devices.into_iter().map(|d| (d.name.clone(), d)).collect();
        let snapshot = Arc::new(map);
        let mut guard = self
            .devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = snapshot;
    }

    /// Replaces one device's tag set in one swap.
    pub fn replace_tags(&self, device_name: &str, tags: Vec<RemoteTag>) {
        let map: HashMap<String, RemoteTag> =
            tags.into_iter().map(|t| (t.name.clone(), t)).collect();
        self.tags.insert(device_name.to_string(), Arc::new(map));
    }

    pub fn device(&self, name: &str) -> Option<RemoteDevice> {
        self.directory().get(name).cloned()
    }

    /// Snapshot of every known device.
    pub fn devices(&self) -> Vec<RemoteDevice> {
        self.directory().values().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.directory().len()
    }

    /// The tag set of one device. Unknown devices yield an empty set rather
    /// than an error.
    pub fn tags(&self, device_name: &str) -> TagSet {
        self.tags
            .get(device_name)
            .map(|e| Arc::clone(e.value()))
            .unwrap_or_default()
    }

    pub fn tag(&self, device_name: &str, tag_name: &str) -> Option<RemoteTag> {
        self.tags(device_name).get(tag_name).cloned()
    }

    /// Flags a device (un)available. Returns true when the flag actually
    /// transitioned, so callers can log only on state changes.
    pub fn mark_unavailable(&self, device_name: &str, unavailable: bool) -> bool {
        if unavailable {
            self.unavailable.insert(device_name.to_string())
        } else {
            self.unavailable.remove(device_name).is_some()
        }
    }

    pub fn is_unavailable(&self, device_name: &str) -> bool {
        self.unavailable.contains(device_name)
    }

    fn directory(&self) -> Arc<HashMap<String, RemoteDevice>> {
        let guard = self
            .devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }
}
