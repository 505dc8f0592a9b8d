//! Maps remote tag identities onto local tag-store paths.
//!
//! Everything here is a pure function; path layout decisions come in via
//! [`PathOptions`]. Status and override paths are system paths and never go
//! through the sanitizer.

use tagsync_sdk::RemoteTag;

/// Path construction knobs, taken from settings at loop start.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOptions {
    /// Insert a group folder (`A`..`ABCD`) between device and tag.
    pub sort_tags_by_group: bool,
    /// Pass remote names through unchanged instead of sanitizing.
    pub tag_name_check_disabled: bool,
}

/// Replaces characters the local tag store rejects. The first character must
/// be alphanumeric or `_`; later characters may also be space or one of
/// `-:()`. Everything else becomes `_`. Total over all inputs and
/// idempotent.
pub fn sanitize_tag_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let ok = if i == 0 {
            c.is_alphanumeric() || c == '_'
        } else {
            c.is_alphanumeric() || matches!(c, '_' | ' ' | '-' | ':' | '(' | ')')
        };
        out.push(if ok { c } else { '_' });
    }
    out
}

/// Local path for a tag whose metadata is in the cache, honoring group
/// sorting when the tag belongs to at least one group.
pub fn local_path(device_name: &str, tag: &RemoteTag, opts: &PathOptions) -> String {
    let name = leaf_name(&tag.name, opts);
    if opts.sort_tags_by_group {
        let letters = tag.groups.letters();
        if !letters.is_empty() {
            return format!("{device_name}/{letters}/{name}");
        }
    }
    format!("{device_name}/{name}")
}

/// Ungrouped fallback path for a tag name the cache does not know. Used by
/// the historical loop when a mailbox record arrives for a tag that has not
/// been through a metadata build yet.
pub fn local_path_by_name(device_name: &str, tag_name: &str, opts: &PathOptions) -> String {
    format!("{device_name}/{}", leaf_name(tag_name, opts))
}

fn leaf_name(name: &str, opts: &PathOptions) -> String {
    if opts.tag_name_check_disabled {
        name.to_string()
    } else {
        sanitize_tag_name(name)
    }
}
