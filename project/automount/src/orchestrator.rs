//! Reconciliation of bookmarked locations against the mount subsystem.
//!
//! [`MountOrchestrator::reconcile`] is the single entry point every trigger goes
//! through: reload the bookmarks and settings, observe each location, keep
//! aliases in line with what is mounted and start mount attempts for enabled
//! locations that are not. Passes may overlap; a per-URI in-flight set makes
//! sure no two mount or unmount operations for the same URI run at once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use common::{Bookmark, Location, LocationStatus, MountEvent, ObservedMountState, StatusSnapshot};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bookmarks::BookmarkSource;
use crate::config::{Options, SettingsSource};
use crate::error::{AliasError, MountError};
use crate::provider::MountProvider;
use crate::retry::RetryScheduler;
use crate::store::BookmarkStore;
use crate::symlink::SymlinkManager;

const EVENT_CAPACITY: usize = 256;

/// What started a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Periodic,
    Manual,
    SettingsChanged,
}

impl Trigger {
    pub fn is_startup(&self) -> bool {
        matches!(self, Trigger::Startup)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Startup => "startup",
            Trigger::Periodic => "periodic",
            Trigger::Manual => "manual",
            Trigger::SettingsChanged => "settings changed",
        };
        f.write_str(name)
    }
}

/// Who asked for a mount attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOrigin {
    Pass { startup: bool },
    Retry,
    Manual,
}

impl AttemptOrigin {
    /// Automatic attempts are dropped silently when the location is disabled meanwhile.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, AttemptOrigin::Manual)
    }

    pub fn is_startup(&self) -> bool {
        matches!(self, AttemptOrigin::Pass { startup: true })
    }
}

impl fmt::Display for AttemptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptOrigin::Pass { startup: true } => "startup pass",
            AttemptOrigin::Pass { startup: false } => "pass",
            AttemptOrigin::Retry => "retry",
            AttemptOrigin::Manual => "manual",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Mounted,
    AlreadyMounted,
    /// Another operation for the URI was running; nothing was done.
    InFlight,
    Failed { retry_scheduled: bool },
    /// The mount completed but the location was disabled or removed meanwhile.
    Superseded,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    Unmounted,
    NotMounted,
    InFlight,
    Failed,
    Unknown,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub trigger: Trigger,
    pub total: usize,
    pub enabled: usize,
    /// Enabled locations observed mounted before any attempt of this pass.
    pub mounted: usize,
    /// Enabled locations skipped because an operation was already running.
    pub in_flight: Vec<String>,
    pub attempts: Vec<(String, AttemptOutcome)>,
}

impl ReconcileReport {
    pub fn attempt(&self, uri: &str) -> Option<AttemptOutcome> {
        self.attempts
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, outcome)| *outcome)
    }
}

/// Releases the URI from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    uri: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.uri);
    }
}

struct Inner {
    provider: Arc<dyn MountProvider>,
    bookmarks: Arc<dyn BookmarkSource>,
    settings: Arc<dyn SettingsSource>,
    symlinks: SymlinkManager,
    retries: RetryScheduler,
    store: RwLock<BookmarkStore>,
    options: RwLock<Options>,
    in_flight: Mutex<HashSet<String>>,
    /// Last alias error reported per URI, a persisting problem is reported once.
    alias_errors: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<MountEvent>,
    status: watch::Sender<StatusSnapshot>,
    startup: AtomicBool,
    /// Set by `shutdown`; no alias is created afterwards.
    stopped: AtomicBool,
}

/// Shared handle to the orchestration engine. Clones drive the same state.
#[derive(Clone)]
pub struct MountOrchestrator {
    inner: Arc<Inner>,
}

impl MountOrchestrator {
    pub fn new(
        provider: Arc<dyn MountProvider>,
        bookmarks: Arc<dyn BookmarkSource>,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        let options = Options::default().normalized();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(StatusSnapshot::new(0, 0, options.check_interval_minutes));
        MountOrchestrator {
            inner: Arc::new(Inner {
                provider,
                bookmarks,
                settings,
                symlinks: SymlinkManager::new(options.alias_base_directory.clone()),
                retries: RetryScheduler::new(),
                store: RwLock::new(BookmarkStore::new()),
                options: RwLock::new(options),
                in_flight: Mutex::new(HashSet::new()),
                alias_errors: Mutex::new(HashMap::new()),
                events,
                status,
                startup: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MountEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status.subscribe()
    }

    /// Options as of the last reload.
    pub fn options(&self) -> Options {
        self.inner.options.read().clone()
    }

    pub fn locations(&self) -> Vec<Location> {
        self.inner.store.read().locations().to_vec()
    }

    pub fn location(&self, uri: &str) -> Option<Location> {
        self.inner.store.read().get(uri).cloned()
    }

    /// Alias currently recorded for `uri`.
    pub fn alias_path(&self, uri: &str) -> Option<PathBuf> {
        self.inner.symlinks.recorded(uri)
    }

    pub fn retry_pending(&self, uri: &str) -> bool {
        self.inner.retries.is_pending(uri)
    }

    pub fn pending_retry_delay(&self, uri: &str) -> Option<Duration> {
        self.inner.retries.pending_delay(uri)
    }

    pub fn is_in_flight(&self, uri: &str) -> bool {
        self.inner.in_flight.lock().contains(uri)
    }

    pub fn is_startup_in_progress(&self) -> bool {
        self.inner.startup.load(Ordering::SeqCst)
    }

    /// End the startup window: success notifications are no longer suppressed.
    pub async fn finish_startup(&self) {
        if self.inner.startup.swap(false, Ordering::SeqCst) {
            info!("Startup finished");
        }
        self.refresh_status().await;
    }

    /// Run one reconciliation pass and wait for the mount attempts it started.
    pub async fn reconcile(&self, trigger: Trigger) -> ReconcileReport {
        if trigger.is_startup() {
            self.inner.startup.store(true, Ordering::SeqCst);
        }
        debug!("Starting {trigger} pass");
        self.reload().await;

        let locations = self.locations();
        let enabled = locations.iter().filter(|l| l.enabled).count();
        let mut report = ReconcileReport {
            trigger,
            total: locations.len(),
            enabled,
            mounted: 0,
            in_flight: Vec::new(),
            attempts: Vec::new(),
        };
        let origin = AttemptOrigin::Pass {
            startup: trigger.is_startup(),
        };

        let mut started = Vec::new();
        for location in &locations {
            let uri = location.uri();
            // Hold the marker while observing so a mount finishing in between
            // cannot have its fresh alias removed by a stale observation.
            let Some(guard) = self.try_begin(uri) else {
                debug!("{uri} has an operation in flight, skipping");
                if location.enabled {
                    report.in_flight.push(uri.to_string());
                }
                continue;
            };
            match self.inner.provider.observe(uri).await {
                ObservedMountState::Mounted { root } => {
                    if location.enabled {
                        report.mounted += 1;
                    }
                    self.sync_alias(location, root.as_deref()).await;
                }
                ObservedMountState::Unmounted => {
                    self.drop_alias(location).await;
                    if location.enabled {
                        drop(guard);
                        let this = self.clone();
                        let key = uri.to_string();
                        let handle = tokio::spawn(async move { this.attempt_mount(&key, origin).await });
                        started.push((uri.to_string(), handle));
                    }
                }
            }
        }

        self.publish_status(report.mounted, enabled);
        if trigger == Trigger::Manual {
            self.emit(MountEvent::CheckSummary {
                total: enabled,
                mounted: report.mounted,
            });
        }

        report.attempts = join_all(started).await;
        // Attempts and overlapping operations may have published newer counts
        // while this pass was still observing.
        self.refresh_status().await;
        info!(
            "{trigger} pass: {}/{} mounted, {} attempted, {} in flight",
            report.mounted,
            report.enabled,
            report.attempts.len(),
            report.in_flight.len()
        );
        report
    }

    /// Mount `uri` unless another operation for it is running or it is mounted already.
    pub async fn attempt_mount(&self, uri: &str, origin: AttemptOrigin) -> AttemptOutcome {
        let Some(_guard) = self.try_begin(uri) else {
            debug!("{uri} already has an operation in flight");
            return AttemptOutcome::InFlight;
        };
        let Some(location) = self.location(uri) else {
            debug!("{uri} is not a known location");
            return AttemptOutcome::Unknown;
        };

        if let ObservedMountState::Mounted { root } = self.inner.provider.observe(uri).await {
            debug!("{uri} is already mounted");
            self.inner.retries.cancel(uri);
            self.sync_alias(&location, root.as_deref()).await;
            if origin == AttemptOrigin::Manual {
                self.emit(MountEvent::AlreadyMounted {
                    uri: uri.to_string(),
                });
            }
            return AttemptOutcome::AlreadyMounted;
        }

        info!("Mounting {uri} ({origin})");
        match self.inner.provider.mount(uri).await {
            Ok(()) => self.handle_mount_success(uri, origin).await,
            Err(e) => {
                warn!("Failed to mount {uri}: {e}");
                self.handle_mount_failure(uri, origin, &e.to_string())
            }
        }
    }

    async fn handle_mount_success(&self, uri: &str, origin: AttemptOrigin) -> AttemptOutcome {
        let recorded = self.inner.store.write().record_success(uri, Utc::now());
        self.inner.retries.cancel(uri);
        let Some(location) = recorded else {
            info!("Mounted {uri}, which is no longer bookmarked");
            return AttemptOutcome::Superseded;
        };

        let root = self.inner.provider.mount_root_path(uri).await;
        self.sync_alias(&location, root.as_deref()).await;

        let outcome = if origin.is_automatic() && !location.enabled {
            info!("Mounted {uri}, but it was disabled meanwhile");
            AttemptOutcome::Superseded
        } else {
            info!("Mounted {uri}");
            let quiet = origin.is_startup()
                || (origin == AttemptOrigin::Retry && self.is_startup_in_progress());
            if !quiet {
                self.emit(MountEvent::MountSucceeded {
                    uri: uri.to_string(),
                });
            }
            AttemptOutcome::Mounted
        };
        self.refresh_status().await;
        outcome
    }

    fn handle_mount_failure(&self, uri: &str, origin: AttemptOrigin, message: &str) -> AttemptOutcome {
        let recorded = self.inner.store.write().record_failure(uri, Utc::now());
        let Some(location) = recorded else {
            debug!("{uri} is no longer bookmarked, not retrying");
            return AttemptOutcome::Failed {
                retry_scheduled: false,
            };
        };
        if origin.is_automatic() && !location.enabled {
            debug!("{uri} was disabled meanwhile, not retrying: {message}");
            return AttemptOutcome::Failed {
                retry_scheduled: false,
            };
        }
        let (max_retries, delay) = {
            let options = self.inner.options.read();
            (options.max_retries, options.retry_delay())
        };

        if location.enabled && location.fail_count <= max_retries {
            info!(
                "Retrying {uri} in {delay:?} (attempt {}/{max_retries})",
                location.fail_count
            );
            self.schedule_retry(uri, delay);
            self.emit(MountEvent::MountFailedRetrying {
                uri: uri.to_string(),
                attempt: location.fail_count,
                max: max_retries,
            });
            AttemptOutcome::Failed {
                retry_scheduled: true,
            }
        } else {
            warn!(
                "Giving up on {uri} after {} failed attempts: {message}",
                location.fail_count
            );
            self.emit(MountEvent::MountFailedTerminal {
                uri: uri.to_string(),
                message: message.to_string(),
            });
            AttemptOutcome::Failed {
                retry_scheduled: false,
            }
        }
    }

    fn schedule_retry(&self, uri: &str, delay: Duration) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = uri.to_string();
        self.inner.retries.schedule(uri, delay, async move {
            if let Some(inner) = inner.upgrade() {
                MountOrchestrator { inner }.retry(&key).await;
            }
        });
    }

    async fn retry(&self, uri: &str) {
        match self.location(uri) {
            Some(location) if location.enabled => {
                self.attempt_mount(uri, AttemptOrigin::Retry).await;
            }
            Some(_) => debug!("{uri} was disabled, dropping retry"),
            None => debug!("{uri} is gone, dropping retry"),
        }
    }

    /// Manual mount request for one location.
    pub async fn mount_location(&self, uri: &str) -> AttemptOutcome {
        if self.known_location(uri).await.is_none() {
            return AttemptOutcome::Unknown;
        }
        self.attempt_mount(uri, AttemptOrigin::Manual).await
    }

    /// Unmount `uri`. The alias goes first so nothing points into a dying mount.
    pub async fn unmount(&self, uri: &str) -> UnmountOutcome {
        let Some(_guard) = self.try_begin(uri) else {
            debug!("{uri} already has an operation in flight");
            return UnmountOutcome::InFlight;
        };
        let Some(location) = self.known_location(uri).await else {
            return UnmountOutcome::Unknown;
        };

        if self.inner.retries.cancel(uri) {
            debug!("Cancelled pending retry for {uri}");
        }
        self.drop_alias(&location).await;

        if !self.inner.provider.is_mounted(uri).await {
            info!("{uri} is not mounted");
            self.emit(MountEvent::NotMounted {
                uri: uri.to_string(),
            });
            return UnmountOutcome::NotMounted;
        }

        info!("Unmounting {uri}");
        let outcome = match self.inner.provider.unmount(uri).await {
            Ok(()) => {
                info!("Unmounted {uri}");
                self.emit(MountEvent::Unmounted {
                    uri: uri.to_string(),
                });
                UnmountOutcome::Unmounted
            }
            Err(MountError::NotMounted) => {
                self.emit(MountEvent::NotMounted {
                    uri: uri.to_string(),
                });
                UnmountOutcome::NotMounted
            }
            Err(e) => {
                warn!("Failed to unmount {uri}: {e}");
                self.emit(MountEvent::UnmountFailed {
                    uri: uri.to_string(),
                    message: e.to_string(),
                });
                if let ObservedMountState::Mounted { root } = self.inner.provider.observe(uri).await {
                    self.sync_alias(&location, root.as_deref()).await;
                }
                UnmountOutcome::Failed
            }
        };
        self.refresh_status().await;
        outcome
    }

    pub async fn mount_all_enabled(&self) -> Vec<(String, AttemptOutcome)> {
        self.reload().await;
        let uris: Vec<String> = self
            .inner
            .store
            .read()
            .enabled()
            .map(|l| l.uri().to_string())
            .collect();
        info!("Mounting all {} enabled locations", uris.len());
        self.emit(MountEvent::MountAllRequested { count: uris.len() });

        let started = uris
            .into_iter()
            .map(|uri| {
                let this = self.clone();
                let key = uri.clone();
                let origin = AttemptOrigin::Pass { startup: false };
                (uri, tokio::spawn(async move { this.attempt_mount(&key, origin).await }))
            })
            .collect();
        join_all(started).await
    }

    pub async fn unmount_all(&self) -> Vec<(String, UnmountOutcome)> {
        self.reload().await;
        let mut mounted = Vec::new();
        for location in self.locations() {
            if self.inner.provider.is_mounted(location.uri()).await {
                mounted.push(location.uri().to_string());
            }
        }
        info!("Unmounting all {} mounted locations", mounted.len());
        self.emit(MountEvent::UnmountAllRequested {
            count: mounted.len(),
        });

        let started = mounted
            .into_iter()
            .map(|uri| {
                let this = self.clone();
                let key = uri.clone();
                (uri, tokio::spawn(async move { this.unmount(&key).await }))
            })
            .collect();
        join_all(started).await
    }

    /// Current state of every known location, observed now.
    pub async fn location_statuses(&self) -> Vec<LocationStatus> {
        let mut statuses = Vec::new();
        for location in self.locations() {
            let uri = location.uri().to_string();
            let (mounted, mount_root) = match self.inner.provider.observe(&uri).await {
                ObservedMountState::Mounted { root } => (true, root),
                ObservedMountState::Unmounted => (false, None),
            };
            statuses.push(LocationStatus {
                alias: self.inner.symlinks.recorded(&uri),
                retry_pending: self.inner.retries.is_pending(&uri),
                in_flight: self.is_in_flight(&uri),
                mounted,
                mount_root,
                location,
            });
        }
        statuses
    }

    /// Observe every enabled location and republish the status.
    pub async fn refresh_status(&self) {
        let enabled: Vec<String> = self
            .inner
            .store
            .read()
            .enabled()
            .map(|l| l.uri().to_string())
            .collect();
        let mut mounted = 0;
        for uri in &enabled {
            if self.inner.provider.is_mounted(uri).await {
                mounted += 1;
            }
        }
        self.publish_status(mounted, enabled.len());
    }

    /// Cancel pending retries and remove every alias. Mounts stay as they are.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let cancelled = self.inner.retries.cancel_all();
        let locations = self.locations();
        for (uri, e) in self.inner.symlinks.remove_all(&locations).await {
            warn!("Failed to remove alias of {uri}: {e}");
        }
        info!("Orchestrator stopped, {cancelled} pending retries cancelled");
    }

    async fn reload(&self) {
        let settings = self.inner.settings.load().await;
        let bookmarks = match self.inner.bookmarks.load_locations().await {
            Ok(bookmarks) => Some(bookmarks),
            Err(e) => {
                warn!("{e}, keeping the previous bookmark list");
                None
            }
        };

        self.inner
            .symlinks
            .set_base_dir(settings.options.alias_base_directory.clone());
        *self.inner.options.write() = settings.options;

        let diff = {
            let mut store = self.inner.store.write();
            let bookmarks = bookmarks.unwrap_or_else(|| {
                store
                    .locations()
                    .iter()
                    .map(|l| Bookmark::new(l.uri(), Some(l.display_name.clone())))
                    .collect()
            });
            store.reload(bookmarks, &settings.locations)
        };

        for uri in &diff.inactive {
            if self.inner.retries.cancel(uri) {
                info!("Cancelled pending retry for {uri}");
            }
        }
        for location in &diff.removed {
            info!("{} is no longer bookmarked", location.uri());
            self.inner.alias_errors.lock().remove(location.uri());
            self.drop_alias(location).await;
        }
    }

    async fn known_location(&self, uri: &str) -> Option<Location> {
        if let Some(location) = self.location(uri) {
            return Some(location);
        }
        self.reload().await;
        self.location(uri)
    }

    fn try_begin(&self, uri: &str) -> Option<InFlightGuard<'_>> {
        if !self.inner.in_flight.lock().insert(uri.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.inner.in_flight,
            uri: uri.to_string(),
        })
    }

    async fn sync_alias(&self, location: &Location, root: Option<&Path>) {
        let uri = location.uri();
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("Stopped, not creating an alias for {uri}");
            return;
        }
        let Some(root) = root else {
            debug!("{uri} is mounted without a local path, no alias");
            return;
        };
        match self.inner.symlinks.ensure(location, root).await {
            Ok(_) => {
                self.inner.alias_errors.lock().remove(uri);
            }
            Err(e) => self.alias_failed(uri, &e),
        }
    }

    async fn drop_alias(&self, location: &Location) {
        if let Err(e) = self.inner.symlinks.remove(location).await {
            self.alias_failed(location.uri(), &e);
        }
    }

    fn alias_failed(&self, uri: &str, err: &AliasError) {
        let message = err.to_string();
        let previous = self
            .inner
            .alias_errors
            .lock()
            .insert(uri.to_string(), message.clone());
        if previous.as_deref() == Some(message.as_str()) {
            debug!("{uri}: {message}");
            return;
        }
        warn!("Alias of {uri}: {message}");
        self.emit(MountEvent::AliasFailed {
            uri: uri.to_string(),
            message,
        });
    }

    fn publish_status(&self, mounted: usize, enabled: usize) {
        let interval = self.inner.options.read().check_interval_minutes;
        let snapshot = StatusSnapshot::new(mounted, enabled, interval);
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        if changed {
            info!("Status: {}", snapshot.summary());
            self.emit(MountEvent::status_changed(&snapshot));
        }
    }

    fn emit(&self, event: MountEvent) {
        debug!(?event, "Publishing event");
        // Having no subscriber is fine.
        let _ = self.inner.events.send(event);
    }
}

async fn join_all<T>(started: Vec<(String, JoinHandle<T>)>) -> Vec<(String, T)> {
    let mut results = Vec::with_capacity(started.len());
    for (uri, handle) in started {
        match handle.await {
            Ok(outcome) => results.push((uri, outcome)),
            Err(e) => error!("Operation task for {uri} failed: {e}"),
        }
    }
    results
}
