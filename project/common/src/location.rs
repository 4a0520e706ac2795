use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookmark entry as read from the external bookmark list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub uri: String,
    /// Label written after the URI on the bookmark line, if any.
    pub raw_name: Option<String>,
}

impl Bookmark {
    pub fn new<U: Into<String>>(uri: U, raw_name: Option<String>) -> Self {
        Bookmark {
            uri: uri.into(),
            raw_name,
        }
    }
}

/// One remote location tracked by the orchestrator.
///
/// The `uri` is the identity of the location and cannot change once the value
/// is built; only the settings fields and the failure bookkeeping are mutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    uri: String,
    pub display_name: String,
    pub enabled: bool,
    pub alias_name: Option<String>,
    pub fail_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl Location {
    pub fn new<U: Into<String>, N: Into<String>>(uri: U, display_name: N) -> Self {
        Location {
            uri: uri.into(),
            display_name: display_name.into(),
            enabled: true,
            alias_name: None,
            fail_count: 0,
            last_attempt: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Apply persisted per-location settings on top of the defaults.
    pub fn apply_settings(&mut self, settings: &LocationSettings) {
        self.enabled = settings.enabled.unwrap_or(true);
        self.alias_name = settings.effective_alias_name();
    }
}

/// Persisted per-location settings, keyed by URI in [`LocationSettingsMap`].
///
/// `symlinkPath` and `customMountPoint` are the keys older settings files used;
/// the first is an alias of `aliasName`, the second only acts as a fallback name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, alias = "symlinkPath", skip_serializing_if = "Option::is_none")]
    pub alias_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_mount_point: Option<String>,
}

impl LocationSettings {
    pub fn effective_alias_name(&self) -> Option<String> {
        [&self.alias_name, &self.custom_mount_point]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }
}

pub type LocationSettingsMap = BTreeMap<String, LocationSettings>;

/// What the mount subsystem reports for a URI right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ObservedMountState {
    Unmounted,
    /// `root` is `None` when the provider knows the URI is mounted but cannot
    /// expose a local path for it.
    Mounted { root: Option<PathBuf> },
}

impl ObservedMountState {
    pub fn is_mounted(&self) -> bool {
        matches!(self, ObservedMountState::Mounted { .. })
    }
}
