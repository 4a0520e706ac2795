//! The mount subsystem seam.
//!
//! The orchestrator never mounts anything itself; it asks a [`MountProvider`]
//! and reacts to the result. [`GioMountProvider`] drives GIO/gvfs through the
//! `gio` tool, tests plug in their own implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use common::ObservedMountState;

use crate::error::MountError;

pub mod gio;

pub use gio::GioMountProvider;

#[async_trait]
pub trait MountProvider: Send + Sync {
    async fn is_mounted(&self, uri: &str) -> bool;

    /// Local root of the mount backing `uri`, if it is mounted and exposed locally.
    async fn mount_root_path(&self, uri: &str) -> Option<PathBuf>;

    async fn mount(&self, uri: &str) -> Result<(), MountError>;

    /// Must return [`MountError::NotMounted`] when there is nothing to unmount.
    async fn unmount(&self, uri: &str) -> Result<(), MountError>;

    async fn observe(&self, uri: &str) -> ObservedMountState {
        if !self.is_mounted(uri).await {
            return ObservedMountState::Unmounted;
        }
        ObservedMountState::Mounted {
            root: self.mount_root_path(uri).await,
        }
    }
}
