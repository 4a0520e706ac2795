use serde::{Deserialize, Serialize};

use crate::status::{Health, StatusSnapshot};

/// Events published by the orchestrator for notification and UI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum MountEvent {
    MountSucceeded {
        uri: String,
    },
    MountFailedRetrying {
        uri: String,
        attempt: u32,
        max: u32,
    },
    MountFailedTerminal {
        uri: String,
        message: String,
    },
    /// A manual mount request found the location already mounted.
    AlreadyMounted {
        uri: String,
    },
    Unmounted {
        uri: String,
    },
    /// Unmount was requested for a location with no active mount.
    NotMounted {
        uri: String,
    },
    UnmountFailed {
        uri: String,
        message: String,
    },
    /// The mount itself is fine, only its alias could not be created or removed.
    AliasFailed {
        uri: String,
        message: String,
    },
    StatusChanged {
        mounted: usize,
        enabled: usize,
        health: Health,
    },
    CheckSummary {
        total: usize,
        mounted: usize,
    },
    MountAllRequested {
        count: usize,
    },
    UnmountAllRequested {
        count: usize,
    },
}

impl MountEvent {
    pub fn status_changed(snapshot: &StatusSnapshot) -> Self {
        MountEvent::StatusChanged {
            mounted: snapshot.mounted,
            enabled: snapshot.enabled,
            health: snapshot.health,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match self {
            MountEvent::MountSucceeded { uri }
            | MountEvent::MountFailedRetrying { uri, .. }
            | MountEvent::MountFailedTerminal { uri, .. }
            | MountEvent::AlreadyMounted { uri }
            | MountEvent::Unmounted { uri }
            | MountEvent::NotMounted { uri }
            | MountEvent::UnmountFailed { uri, .. }
            | MountEvent::AliasFailed { uri, .. } => Some(uri),
            MountEvent::StatusChanged { .. }
            | MountEvent::CheckSummary { .. }
            | MountEvent::MountAllRequested { .. }
            | MountEvent::UnmountAllRequested { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            MountEvent::MountFailedRetrying { .. }
                | MountEvent::MountFailedTerminal { .. }
                | MountEvent::UnmountFailed { .. }
                | MountEvent::AliasFailed { .. }
        )
    }
}
