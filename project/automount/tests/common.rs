use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use automount::MountOrchestrator;
use automount::bookmarks::{BookmarkSource, parse_bookmarks};
use automount::config::{Options, Settings, SettingsSource};
use automount::error::{BookmarkError, MountError};
use automount::provider::MountProvider;
use automount::symlink::sanitize_alias_name;
use common::{Bookmark, LocationSettings, MountEvent};
use parking_lot::Mutex;
use tempfile::{TempDir, tempdir};
use tokio::sync::{Notify, broadcast, watch};

#[derive(Default)]
struct FakeState {
    mounted: HashSet<String>,
    mount_failures: HashMap<String, VecDeque<String>>,
    always_fail: HashMap<String, String>,
    unmount_failures: HashMap<String, String>,
    observe_delays: HashMap<String, Duration>,
    mount_calls: Vec<String>,
    unmount_calls: Vec<String>,
}

/// In-memory mount subsystem. Roots of mounted URIs are real directories so
/// aliases can point at them.
pub struct FakeMountProvider {
    roots_dir: PathBuf,
    state: Mutex<FakeState>,
    held: watch::Sender<bool>,
    pub mount_started: Notify,
}

#[allow(dead_code)]
impl FakeMountProvider {
    pub fn new<P: Into<PathBuf>>(roots_dir: P) -> Self {
        let (held, _) = watch::channel(false);
        FakeMountProvider {
            roots_dir: roots_dir.into(),
            state: Mutex::new(FakeState::default()),
            held,
            mount_started: Notify::new(),
        }
    }

    pub fn root_of(&self, uri: &str) -> PathBuf {
        self.roots_dir.join(sanitize_alias_name(uri))
    }

    /// Mounted behind the orchestrator's back.
    pub fn set_mounted(&self, uri: &str) {
        std::fs::create_dir_all(self.root_of(uri)).unwrap();
        self.state.lock().mounted.insert(uri.to_string());
    }

    pub fn set_unmounted(&self, uri: &str) {
        self.state.lock().mounted.remove(uri);
    }

    pub fn fail_always(&self, uri: &str, message: &str) {
        self.state
            .lock()
            .always_fail
            .insert(uri.to_string(), message.to_string());
    }

    pub fn stop_failing(&self, uri: &str) {
        self.state.lock().always_fail.remove(uri);
    }

    pub fn fail_times(&self, uri: &str, times: usize, message: &str) {
        self.state
            .lock()
            .mount_failures
            .entry(uri.to_string())
            .or_default()
            .extend(std::iter::repeat_n(message.to_string(), times));
    }

    pub fn fail_unmount(&self, uri: &str, message: &str) {
        self.state
            .lock()
            .unmount_failures
            .insert(uri.to_string(), message.to_string());
    }

    /// The next `is_mounted` query for `uri` answers only after `delay`.
    pub fn delay_next_observation(&self, uri: &str, delay: Duration) {
        self.state
            .lock()
            .observe_delays
            .insert(uri.to_string(), delay);
    }

    /// Mount calls block until [`FakeMountProvider::release_mounts`].
    pub fn hold_mounts(&self) {
        self.held.send_replace(true);
    }

    pub fn release_mounts(&self) {
        self.held.send_replace(false);
    }

    pub fn mount_calls(&self, uri: &str) -> usize {
        self.state
            .lock()
            .mount_calls
            .iter()
            .filter(|u| *u == uri)
            .count()
    }

    pub fn unmount_calls(&self, uri: &str) -> usize {
        self.state
            .lock()
            .unmount_calls
            .iter()
            .filter(|u| *u == uri)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        let state = self.state.lock();
        state.mount_calls.len() + state.unmount_calls.len()
    }

    fn next_failure(&self, uri: &str) -> Option<String> {
        let mut state = self.state.lock();
        if let Some(message) = state.always_fail.get(uri) {
            return Some(message.clone());
        }
        state.mount_failures.get_mut(uri).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl MountProvider for FakeMountProvider {
    async fn is_mounted(&self, uri: &str) -> bool {
        let delay = self.state.lock().observe_delays.remove(uri);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().mounted.contains(uri)
    }

    async fn mount_root_path(&self, uri: &str) -> Option<PathBuf> {
        let mounted = self.state.lock().mounted.contains(uri);
        mounted.then(|| self.root_of(uri))
    }

    async fn mount(&self, uri: &str) -> Result<(), MountError> {
        self.state.lock().mount_calls.push(uri.to_string());
        self.mount_started.notify_one();

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        if let Some(message) = self.next_failure(uri) {
            return Err(MountError::MountFailed(message));
        }
        std::fs::create_dir_all(self.root_of(uri)).unwrap();
        self.state.lock().mounted.insert(uri.to_string());
        Ok(())
    }

    async fn unmount(&self, uri: &str) -> Result<(), MountError> {
        let mut state = self.state.lock();
        state.unmount_calls.push(uri.to_string());
        if let Some(message) = state.unmount_failures.get(uri) {
            return Err(MountError::UnmountFailed(message.clone()));
        }
        if !state.mounted.remove(uri) {
            return Err(MountError::NotMounted);
        }
        Ok(())
    }
}

pub struct MemoryBookmarks {
    bookmarks: Mutex<Vec<Bookmark>>,
    unreadable: Mutex<bool>,
}

#[allow(dead_code)]
impl MemoryBookmarks {
    /// Bookmarks in the GTK file format, one `URI [name]` per line.
    pub fn from_lines(content: &str) -> Self {
        MemoryBookmarks {
            bookmarks: Mutex::new(parse_bookmarks(content)),
            unreadable: Mutex::new(false),
        }
    }

    pub fn set_lines(&self, content: &str) {
        *self.bookmarks.lock() = parse_bookmarks(content);
    }

    pub fn set_unreadable(&self, unreadable: bool) {
        *self.unreadable.lock() = unreadable;
    }
}

#[async_trait]
impl BookmarkSource for MemoryBookmarks {
    async fn load_locations(&self) -> Result<Vec<Bookmark>, BookmarkError> {
        if *self.unreadable.lock() {
            return Err(BookmarkError::Read {
                path: PathBuf::from("memory"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }
        Ok(self.bookmarks.lock().clone())
    }
}

pub struct MemorySettings {
    settings: Mutex<Settings>,
}

#[allow(dead_code)]
impl MemorySettings {
    pub fn new(options: Options) -> Self {
        MemorySettings {
            settings: Mutex::new(Settings {
                options,
                ..Default::default()
            }),
        }
    }

    pub fn update_options<F: FnOnce(&mut Options)>(&self, edit: F) {
        edit(&mut self.settings.lock().options);
    }

    pub fn update_location<F: FnOnce(&mut LocationSettings)>(&self, uri: &str, edit: F) {
        edit(
            self.settings
                .lock()
                .locations
                .entry(uri.to_string())
                .or_default(),
        );
    }
}

#[async_trait]
impl SettingsSource for MemorySettings {
    async fn load(&self) -> Settings {
        self.settings.lock().clone()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub provider: Arc<FakeMountProvider>,
    pub bookmarks: Arc<MemoryBookmarks>,
    pub settings: Arc<MemorySettings>,
    pub orchestrator: MountOrchestrator,
    pub events: broadcast::Receiver<MountEvent>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(bookmarks: &str) -> Self {
        Harness::with_options(bookmarks, |_| {})
    }

    pub fn with_options<F: FnOnce(&mut Options)>(bookmarks: &str, edit: F) -> Self {
        let dir = tempdir().unwrap();
        let mut options = Options {
            alias_base_directory: dir.path().join("NetworkMounts"),
            ..Options::default()
        };
        edit(&mut options);

        let provider = Arc::new(FakeMountProvider::new(dir.path().join("gvfs")));
        let bookmarks = Arc::new(MemoryBookmarks::from_lines(bookmarks));
        let settings = Arc::new(MemorySettings::new(options));
        let orchestrator = MountOrchestrator::new(provider.clone(), bookmarks.clone(), settings.clone());
        let events = orchestrator.subscribe();
        Harness {
            dir,
            provider,
            bookmarks,
            settings,
            orchestrator,
            events,
        }
    }

    pub fn alias(&self, name: &str) -> PathBuf {
        self.dir.path().join("NetworkMounts").join(name)
    }

    pub fn link_target(&self, name: &str) -> Option<PathBuf> {
        std::fs::read_link(self.alias(name)).ok()
    }

    pub fn drain_events(&mut self) -> Vec<MountEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the first event matching `pred`, skipping the others.
    pub async fn wait_for<F: Fn(&MountEvent) -> bool>(&mut self, pred: F) -> MountEvent {
        let deadline = Duration::from_secs(3600);
        loop {
            let event = tokio::time::timeout(deadline, self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }
}

#[allow(dead_code)]
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
