//! The events that start reconciliation passes in the daemon.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::daemon::sync_loop::{Event, State, WithEvent};
use crate::orchestrator::{MountOrchestrator, Trigger};

/// Repeating timer for periodic passes. The interval can be changed at any
/// time; a changed interval restarts the running countdown.
pub struct PeriodicTrigger {
    interval: watch::Sender<Option<Duration>>,
}

impl PeriodicTrigger {
    pub fn new(interval: Duration) -> Self {
        let (interval, _) = watch::channel(Some(interval));
        PeriodicTrigger { interval }
    }

    /// `None` once stopped.
    pub fn interval(&self) -> Option<Duration> {
        *self.interval.borrow()
    }

    pub fn set_interval(&self, interval: Duration) {
        let changed = self.interval.send_if_modified(|current| {
            if *current == Some(interval) {
                return false;
            }
            *current = Some(interval);
            true
        });
        if changed {
            info!("Periodic check every {interval:?}");
        }
    }

    pub fn stop(&self) {
        self.interval.send_replace(None);
    }

    /// Resolves once the current interval has elapsed. Never resolves while stopped.
    pub async fn tick(&self) {
        let mut rx = self.interval.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            match current {
                Some(period) => {
                    tokio::select! {
                        _ = sleep(period) => return,
                        res = rx.changed() => if res.is_err() {
                            return futures::future::pending().await;
                        },
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        return futures::future::pending().await;
                    }
                }
            }
        }
    }
}

type Fingerprint = Vec<(PathBuf, Option<SystemTime>)>;

/// Polls the modification times of the config file, the location settings
/// blob and the bookmarks file.
pub struct SettingsWatcher {
    config_path: PathBuf,
    orchestrator: MountOrchestrator,
    last: Mutex<Option<Fingerprint>>,
}

impl SettingsWatcher {
    pub fn new(config_path: PathBuf, orchestrator: MountOrchestrator) -> Self {
        SettingsWatcher {
            config_path,
            orchestrator,
            last: Mutex::new(None),
        }
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        let options = self.orchestrator.options();
        vec![
            self.config_path.clone(),
            options.location_settings_file,
            options.bookmarks_file,
        ]
    }

    async fn fingerprint(&self) -> Fingerprint {
        let mut fingerprint = Vec::new();
        for path in self.watched_paths() {
            let modified = tokio::fs::metadata(&path).await.and_then(|m| m.modified()).ok();
            fingerprint.push((path, modified));
        }
        fingerprint
    }

    /// Take the current state of the watched files as seen.
    pub async fn prime(&self) {
        let fingerprint = self.fingerprint().await;
        *self.last.lock() = Some(fingerprint);
    }

    /// Resolves when a watched file changed since the last call.
    pub async fn changed(&self) {
        loop {
            sleep(self.orchestrator.options().settings_poll()).await;
            let current = self.fingerprint().await;
            let changed = {
                let mut last = self.last.lock();
                let changed = last.as_ref().is_some_and(|prev| *prev != current);
                *last = Some(current);
                changed
            };
            if changed {
                info!("Settings changed on disk");
                return;
            }
        }
    }
}

/// Reconcile, then follow a possibly changed check interval.
pub async fn run_pass(state: &State, trigger: Trigger) {
    state.orchestrator.reconcile(trigger).await;
    state
        .periodic
        .set_interval(state.orchestrator.options().check_interval());
}

async fn wait_for_signal(kind: SignalKind) {
    match signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to listen for signal {kind:?}: {e}");
            futures::future::pending::<()>().await;
        }
    }
}

pub struct PeriodicCheck;

impl Event<()> for PeriodicCheck {
    fn listen(state: Arc<State>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        async move { state.periodic.tick().await }.boxed()
    }
}

pub async fn periodic_handler(state: Arc<State>, _data: Box<()>, _event: WithEvent<PeriodicCheck>) {
    run_pass(&state, Trigger::Periodic).await;
}

pub struct SettingsFileChanged;

impl Event<()> for SettingsFileChanged {
    fn listen(state: Arc<State>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        async move { state.watcher.changed().await }.boxed()
    }
}

pub async fn settings_handler(state: Arc<State>, _data: Box<()>, _event: WithEvent<SettingsFileChanged>) {
    run_pass(&state, Trigger::SettingsChanged).await;
}

/// `SIGUSR1` asks for a manual check.
pub struct ManualCheckSignal;

impl Event<()> for ManualCheckSignal {
    fn listen(_state: Arc<State>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        wait_for_signal(SignalKind::user_defined1()).boxed()
    }
}

pub async fn manual_check_handler(
    state: Arc<State>,
    _data: Box<()>,
    _event: WithEvent<ManualCheckSignal>,
) {
    debug!("Received SIGUSR1");
    run_pass(&state, Trigger::Manual).await;
}

/// `SIGHUP` reloads the settings.
pub struct ReloadSignal;

impl Event<()> for ReloadSignal {
    fn listen(_state: Arc<State>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        wait_for_signal(SignalKind::hangup()).boxed()
    }
}

pub async fn reload_handler(state: Arc<State>, _data: Box<()>, _event: WithEvent<ReloadSignal>) {
    debug!("Received SIGHUP");
    run_pass(&state, Trigger::SettingsChanged).await;
}

/// Run the startup pass after `delay`, then close the startup window after `grace`.
pub async fn startup(orchestrator: MountOrchestrator, delay: Duration, grace: Duration) {
    sleep(delay).await;
    orchestrator.reconcile(Trigger::Startup).await;
    sleep(grace).await;
    orchestrator.finish_startup().await;
}
