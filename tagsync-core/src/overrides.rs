use dashmap::DashSet;

/// Boolean tag that forces every tag of a device to live polling.
pub fn device_override_path(device_name: &str) -> String {
    format!("{device_name}/_config/AllRealtime")
}

/// Boolean sibling tag that forces one synced tag to live polling.
pub fn tag_override_path(tag_path: &str) -> String {
    format!("{tag_path}_ForceRealtimeData")
}

/// Live-poll overrides, mutated by write handlers on the override tags and
/// consulted by the historical and realtime loops each tick.
///
/// Keys are raw remote names, not sanitized local paths; both loops resolve
/// overrides before mapping identities.
#[derive(Debug, Default)]
pub struct ForcedRealtimeSet {
    devices: DashSet<String>,
    tags: DashSet<(String, String)>,
}

impl ForcedRealtimeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces (or unforces) live polling for every tag of a device.
    pub fn set_device(&self, device_name: &str, forced: bool) {
        if forced {
            self.devices.insert(device_name.to_string());
        } else {
            self.devices.remove(device_name);
        }
    }

    /// Forces (or unforces) live polling for one tag.
    pub fn set_tag(&self, device_name: &str, tag_name: &str, forced: bool) {
        let key = (device_name.to_string(), tag_name.to_string());
        if forced {
            self.tags.insert(key);
        } else {
            self.tags.remove(&key);
        }
    }

    pub fn device_forced(&self, device_name: &str) -> bool {
        self.devices.contains(device_name)
    }

    /// True when the device or the specific tag is forced live.
    pub fn is_forced(&self, device_name: &str, tag_name: &str) -> bool {
        self.device_forced(device_name)
            || self
                .tags
                .contains(&(device_name.to_string(), tag_name.to_string()))
    }

    /// Tag-level overrides for one device, excluding device-level forcing.
    pub fn forced_tags_for(&self, device_name: &str) -> Vec<String> {
        self.tags
            .iter()
            .filter(|e| e.key().0 == device_name)
            .map(|e| e.key().1.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.tags.is_empty()
    }
}
