use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use crate::bookmarks::FileBookmarkSource;
use crate::config::{FileSettings, SettingsSource};
use crate::notify::{LogSink, Notifier};
use crate::orchestrator::MountOrchestrator;
use crate::provider::GioMountProvider;

pub mod client;
pub mod control;
pub mod sync_loop;
pub mod triggers;

use sync_loop::{State, SyncLoop};
use triggers::{PeriodicTrigger, SettingsWatcher};

#[tokio::main]
pub async fn start(config_path: PathBuf) -> Result<(), anyhow::Error> {
    run(config_path, shutdown_signal()).await
}

/// Run the daemon until `shutdown` resolves.
///
/// The bookmarks file, mount timeout and control address are taken from the
/// options at startup; everything else is re-read on every pass.
pub async fn run<S>(config_path: PathBuf, shutdown: S) -> Result<(), anyhow::Error>
where
    S: Future<Output = ()>,
{
    let settings = FileSettings::new(&config_path);
    let options = settings.load().await.options;
    info!("Starting automount with {config_path:?}");

    let orchestrator = MountOrchestrator::new(
        Arc::new(GioMountProvider::new(options.mount_timeout())),
        Arc::new(FileBookmarkSource::new(&options.bookmarks_file)),
        Arc::new(settings),
    );
    let notifier = Notifier::new(orchestrator.clone(), Arc::new(LogSink));
    tokio::spawn(notifier.run(orchestrator.subscribe()));

    let state = Arc::new(State::new(
        orchestrator.clone(),
        PeriodicTrigger::new(options.check_interval()),
        SettingsWatcher::new(config_path, orchestrator.clone()),
    ));
    state.watcher.prime().await;

    let startup = tokio::spawn(triggers::startup(
        orchestrator.clone(),
        options.startup_delay(),
        options.startup_grace(),
    ));
    let control = options.control_addr.map(|addr| {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(addr, state).await {
                error!("{e:#}");
            }
        })
    });

    let sync_loop = SyncLoop::new(state.clone())
        .register_event(triggers::periodic_handler)
        .register_event(triggers::settings_handler)
        .register_event(triggers::manual_check_handler)
        .register_event(triggers::reload_handler);

    tokio::select! {
        _ = sync_loop.run() => {}
        _ = shutdown => info!("Shutting down"),
    }

    state.periodic.stop();
    startup.abort();
    if let Some(control) = control {
        control.abort();
    }
    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
