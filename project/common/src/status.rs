use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// Coarse health signal derived from the mounted/enabled counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Health {
    AllGood,
    Partial,
    NoneMounted,
    NothingConfigured,
}

impl Health {
    pub fn from_counts(mounted: usize, enabled: usize) -> Self {
        match (mounted, enabled) {
            (_, 0) => Health::NothingConfigured,
            (0, _) => Health::NoneMounted,
            (m, e) if m >= e => Health::AllGood,
            _ => Health::Partial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub mounted: usize,
    pub enabled: usize,
    pub health: Health,
    pub check_interval_minutes: u64,
}

impl StatusSnapshot {
    pub fn new(mounted: usize, enabled: usize, check_interval_minutes: u64) -> Self {
        StatusSnapshot {
            mounted,
            enabled,
            health: Health::from_counts(mounted, enabled),
            check_interval_minutes,
        }
    }

    /// Text used by status lines, e.g. `2/3 mounted • Check every 5min`.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} mounted \u{2022} Check every {}min",
            self.mounted, self.enabled, self.check_interval_minutes
        )
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        StatusSnapshot::new(0, 0, 0)
    }
}

/// Per-location line shown by `automount list` and `GET /locations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStatus {
    #[serde(flatten)]
    pub location: Location,
    pub mounted: bool,
    pub mount_root: Option<PathBuf>,
    pub alias: Option<PathBuf>,
    pub retry_pending: bool,
    pub in_flight: bool,
}
