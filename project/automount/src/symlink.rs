//! Human-friendly aliases for mount roots.
//!
//! Every mounted location gets a symlink `base_dir/<alias name>` pointing at the
//! local root of its mount. The manager keeps a registry of the aliases it
//! created, keyed by URI, to find stale ones after renames and to refuse a
//! second location claiming a name already in use.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use common::Location;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::AliasError;

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("invalid alias character pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("invalid underscore pattern"));

/// Make `name` usable as a single file name.
pub fn sanitize_alias_name(name: &str) -> String {
    let name = INVALID_CHARS.replace_all(name, "_");
    let name = WHITESPACE.replace_all(&name, "_");
    let name = UNDERSCORES.replace_all(&name, "_");
    name.trim_matches('_').to_string()
}

/// File name of the alias: the explicit override, else the sanitized display name.
pub fn resolve_alias_name(location: &Location) -> Result<String, AliasError> {
    if let Some(explicit) = location.alias_name.as_deref() {
        let explicit = explicit.trim();
        let mut components = Path::new(explicit).components();
        return match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !explicit.contains('/') => Ok(explicit.to_string()),
            _ => Err(AliasError::InvalidName(explicit.to_string())),
        };
    }

    [location.display_name.as_str(), location.uri()]
        .into_iter()
        .map(sanitize_alias_name)
        .find(|name| !name.is_empty())
        .ok_or_else(|| AliasError::InvalidName(location.display_name.clone()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOutcome {
    Unchanged,
    Created,
    Replaced,
}

pub struct SymlinkManager {
    base_dir: RwLock<PathBuf>,
    /// URI -> alias path this manager created. Derived state, never authoritative.
    registry: Mutex<HashMap<String, PathBuf>>,
}

impl SymlinkManager {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        SymlinkManager {
            base_dir: RwLock::new(base_dir.into()),
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.read().clone()
    }

    pub fn set_base_dir<P: Into<PathBuf>>(&self, base_dir: P) {
        let base_dir = base_dir.into();
        let mut current = self.base_dir.write();
        if *current != base_dir {
            info!("Alias directory changed from {current:?} to {base_dir:?}");
            *current = base_dir;
        }
    }

    pub fn alias_path(&self, location: &Location) -> Result<PathBuf, AliasError> {
        Ok(self.base_dir().join(resolve_alias_name(location)?))
    }

    pub fn recorded(&self, uri: &str) -> Option<PathBuf> {
        self.registry.lock().get(uri).cloned()
    }

    fn owner_of(&self, path: &Path, except: &str) -> Option<String> {
        self.registry
            .lock()
            .iter()
            .find(|(uri, p)| p.as_path() == path && uri.as_str() != except)
            .map(|(uri, _)| uri.clone())
    }

    /// Make sure the alias of `location` exists and points at `target`.
    pub async fn ensure(&self, location: &Location, target: &Path) -> Result<AliasOutcome, AliasError> {
        let uri = location.uri();
        let path = self.alias_path(location)?;

        // Claim the path before touching the filesystem so a concurrent ensure
        // for another location cannot slip in between the check and the write.
        let previous = {
            let mut registry = self.registry.lock();
            if let Some((owner, _)) = registry
                .iter()
                .find(|(other, p)| **p == path && other.as_str() != uri)
            {
                return Err(AliasError::Collision {
                    path,
                    owner: owner.clone(),
                });
            }
            registry.insert(uri.to_string(), path.clone())
        };

        if let Some(old) = previous.filter(|old| *old != path) {
            match remove_symlink(&old).await {
                Ok(true) => info!("Removed stale alias {old:?} of {uri}"),
                Ok(false) => {}
                Err(e) => warn!("{e}"),
            }
        }

        let res = self.write_link(&path, target).await;
        match &res {
            Ok(AliasOutcome::Unchanged) => {}
            Ok(outcome) => info!("Alias {path:?} -> {target:?} ({outcome:?})"),
            Err(_) => {
                self.registry.lock().remove(uri);
            }
        }
        res
    }

    async fn write_link(&self, path: &Path, target: &Path) -> Result<AliasOutcome, AliasError> {
        let create_err = |source| AliasError::Create {
            path: path.to_path_buf(),
            source,
        };
        let remove_err = |source| AliasError::Remove {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(create_err)?;
        }

        let outcome = match fs::symlink_metadata(path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                if points_at(path, target).await {
                    return Ok(AliasOutcome::Unchanged);
                }
                fs::remove_file(path).await.map_err(remove_err)?;
                AliasOutcome::Replaced
            }
            // Only an empty directory, such as a leftover mount point, is replaced.
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir(path).await.map_err(|_| AliasError::Occupied {
                    path: path.to_path_buf(),
                })?;
                AliasOutcome::Replaced
            }
            Ok(_) => {
                return Err(AliasError::Occupied {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => AliasOutcome::Created,
            Err(source) => return Err(create_err(source)),
        };

        match fs::symlink(target, path).await {
            Ok(()) => Ok(outcome),
            // Another pass created the same link in the meantime.
            Err(e) if e.kind() == ErrorKind::AlreadyExists && points_at(path, target).await => {
                Ok(AliasOutcome::Unchanged)
            }
            Err(source) => Err(create_err(source)),
        }
    }

    /// Remove the alias of `location`. Returns whether a symlink was deleted.
    ///
    /// Both the recorded path and the one computed from current settings are
    /// checked. Entries that are not symlinks, or that belong to another
    /// location, are left alone.
    pub async fn remove(&self, location: &Location) -> Result<bool, AliasError> {
        let uri = location.uri();
        let mut candidates: Vec<PathBuf> = self.registry.lock().remove(uri).into_iter().collect();
        match self.alias_path(location) {
            Ok(path) if !candidates.contains(&path) => candidates.push(path),
            Ok(_) => {}
            Err(e) => debug!("No computed alias for {uri}: {e}"),
        }

        let mut removed = false;
        for path in candidates {
            if let Some(owner) = self.owner_of(&path, uri) {
                debug!("Alias {path:?} belongs to {owner}, not removing it for {uri}");
                continue;
            }
            if remove_symlink(&path).await? {
                info!("Removed alias {path:?} of {uri}");
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Remove the aliases of all `locations` and anything else still registered.
    pub async fn remove_all(&self, locations: &[Location]) -> Vec<(String, AliasError)> {
        let mut errors = Vec::new();
        for location in locations {
            if let Err(e) = self.remove(location).await {
                errors.push((location.uri().to_string(), e));
            }
        }
        let leftovers: Vec<(String, PathBuf)> = self.registry.lock().drain().collect();
        for (uri, path) in leftovers {
            if let Err(e) = remove_symlink(&path).await {
                errors.push((uri, e));
            }
        }
        errors
    }
}

async fn points_at(path: &Path, target: &Path) -> bool {
    fs::read_link(path).await.is_ok_and(|current| current == target)
}

async fn remove_symlink(path: &Path) -> Result<bool, AliasError> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path)
            .await
            .map(|_| true)
            .map_err(|source| AliasError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        Ok(_) => {
            warn!("{path:?} is not a symlink, leaving it in place");
            Ok(false)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(AliasError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
