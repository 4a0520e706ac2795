use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use common::{LocationSettings, LocationSettingsMap};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::error::ConfigError;

const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 5;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECONDS: u64 = 30;
const DEFAULT_STARTUP_DELAY_SECONDS: u64 = 5;
const DEFAULT_STARTUP_GRACE_SECONDS: u64 = 10;
const DEFAULT_SETTINGS_POLL_SECONDS: u64 = 2;
const DEFAULT_MOUNT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:7421";

/// `~/.config/automount/config.yaml`
pub fn default_config_path() -> PathBuf {
    config_home().join("automount").join("config.yaml")
}

fn config_home() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| expand_home(Path::new("~/.config"), dirs::home_dir()))
}

/// Replace a leading `~` component with `home`. Paths without it are returned unchanged.
pub fn expand_home<H: AsRef<Path>>(path: &Path, home: Option<H>) -> PathBuf {
    let mut components = path.components();
    match (components.next(), home) {
        (Some(Component::Normal(first)), Some(home)) if first == "~" => {
            home.as_ref().join(components.as_path())
        }
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPrefs {
    pub enabled: bool,
    pub success: bool,
    pub error: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        NotificationPrefs {
            enabled: true,
            success: true,
            error: true,
        }
    }
}

impl NotificationPrefs {
    pub fn allows(&self, is_error: bool) -> bool {
        self.enabled && if is_error { self.error } else { self.success }
    }
}

/// Daemon options read from the YAML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    pub check_interval_minutes: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub alias_base_directory: PathBuf,
    pub bookmarks_file: PathBuf,
    pub location_settings_file: PathBuf,
    pub startup_delay_seconds: u64,
    pub startup_grace_seconds: u64,
    pub settings_poll_seconds: u64,
    pub mount_timeout_seconds: u64,
    pub control_addr: Option<SocketAddr>,
    pub notifications: NotificationPrefs,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
            alias_base_directory: PathBuf::from("~/NetworkMounts"),
            bookmarks_file: PathBuf::from("~/.config/gtk-3.0/bookmarks"),
            location_settings_file: PathBuf::from("~/.config/automount/locations.json"),
            startup_delay_seconds: DEFAULT_STARTUP_DELAY_SECONDS,
            startup_grace_seconds: DEFAULT_STARTUP_GRACE_SECONDS,
            settings_poll_seconds: DEFAULT_SETTINGS_POLL_SECONDS,
            mount_timeout_seconds: DEFAULT_MOUNT_TIMEOUT_SECONDS,
            control_addr: DEFAULT_CONTROL_ADDR.parse().ok(),
            notifications: NotificationPrefs::default(),
        }
    }
}

impl Options {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.saturating_mul(60))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_seconds)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_seconds)
    }

    pub fn settings_poll(&self) -> Duration {
        Duration::from_secs(self.settings_poll_seconds)
    }

    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_seconds)
    }

    /// Replace out-of-range values by their defaults and expand `~` in paths.
    pub fn normalized(mut self) -> Self {
        if self.check_interval_minutes == 0 {
            warn!("checkIntervalMinutes must be at least 1, using {DEFAULT_CHECK_INTERVAL_MINUTES}");
            self.check_interval_minutes = DEFAULT_CHECK_INTERVAL_MINUTES;
        }
        if self.retry_delay_seconds == 0 {
            warn!("retryDelaySeconds must be at least 1, using {DEFAULT_RETRY_DELAY_SECONDS}");
            self.retry_delay_seconds = DEFAULT_RETRY_DELAY_SECONDS;
        }
        if self.settings_poll_seconds == 0 {
            self.settings_poll_seconds = DEFAULT_SETTINGS_POLL_SECONDS;
        }
        if self.mount_timeout_seconds == 0 {
            self.mount_timeout_seconds = DEFAULT_MOUNT_TIMEOUT_SECONDS;
        }
        let home = dirs::home_dir();
        self.alias_base_directory = expand_home(&self.alias_base_directory, home.as_ref());
        self.bookmarks_file = expand_home(&self.bookmarks_file, home.as_ref());
        self.location_settings_file = expand_home(&self.location_settings_file, home.as_ref());
        self
    }
}

pub fn parse_options(content: &str, path: &Path) -> Result<Options, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Options::default().normalized());
    }
    let options: Options = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(options.normalized())
}

pub fn parse_location_settings(content: &str, path: &Path) -> Result<LocationSettingsMap, ConfigError> {
    if content.trim().is_empty() {
        return Ok(LocationSettingsMap::new());
    }
    serde_json::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read the options file. A missing file means defaults.
pub async fn read_options(path: &Path) -> Result<Options, ConfigError> {
    match fs::read_to_string(path).await {
        Ok(content) => parse_options(&content, path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Options::default().normalized()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read the per-location settings blob. A missing file means no overrides.
pub async fn read_location_settings(path: &Path) -> Result<LocationSettingsMap, ConfigError> {
    match fs::read_to_string(path).await {
        Ok(content) => parse_location_settings(&content, path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LocationSettingsMap::new()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub async fn write_location_settings(
    path: &Path,
    settings: &LocationSettingsMap,
) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let content = serde_json::to_string_pretty(settings).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    // Write next to the target and rename so readers never see half a file.
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await.map_err(write_err)?;
    fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

/// Edit the settings of one URI in place. A malformed blob is reported, never overwritten.
pub async fn update_location_settings<F>(path: &Path, uri: &str, edit: F) -> Result<(), ConfigError>
where
    F: FnOnce(&mut LocationSettings),
{
    let mut settings = read_location_settings(path).await?;
    edit(settings.entry(uri.to_string()).or_default());
    write_location_settings(path, &settings).await
}

/// Everything a reconciliation pass needs from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub options: Options,
    pub locations: LocationSettingsMap,
}

/// Source of configuration, re-read at the start of every pass.
///
/// Loading never fails: unreadable or malformed input falls back to defaults.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> Settings;
}

/// Settings backed by the YAML config file and the JSON location blob it names.
#[derive(Debug, Clone)]
pub struct FileSettings {
    config_path: PathBuf,
}

impl FileSettings {
    pub fn new<P: Into<PathBuf>>(config_path: P) -> Self {
        FileSettings {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[async_trait]
impl SettingsSource for FileSettings {
    async fn load(&self) -> Settings {
        let options = read_options(&self.config_path).await.unwrap_or_else(|e| {
            warn!("{e}, falling back to default options");
            Options::default().normalized()
        });
        let locations = read_location_settings(&options.location_settings_file)
            .await
            .unwrap_or_else(|e| {
                warn!("{e}, ignoring per-location settings");
                LocationSettingsMap::new()
            });
        Settings { options, locations }
    }
}
