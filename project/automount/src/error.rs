use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a [`MountProvider`](crate::provider::MountProvider).
#[derive(Debug, Error)]
pub enum MountError {
    /// The mount subsystem could not even be asked, e.g. the helper binary is missing.
    #[error("mount provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("{0}")]
    MountFailed(String),

    #[error("{0}")]
    UnmountFailed(String),

    /// Unmount found no active mount for the URI.
    #[error("location is not mounted")]
    NotMounted,
}

#[derive(Debug, Error)]
pub enum AliasError {
    #[error("failed to create alias {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove alias {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("alias {path:?} is already used by {owner}; set an explicit alias name")]
    Collision { path: PathBuf, owner: String },

    #[error("{path:?} exists and is not a symlink, refusing to replace it")]
    Occupied { path: PathBuf },

    #[error("invalid alias name {0:?}")]
    InvalidName(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BookmarkError {
    #[error("failed to read bookmarks from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
