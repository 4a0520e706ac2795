use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{Bookmark, Location, LocationSettingsMap};

use crate::bookmarks::display_name;

/// In-memory set of known locations, rebuilt from the bookmark list on every pass.
#[derive(Debug, Default)]
pub struct BookmarkStore {
    locations: Vec<Location>,
}

/// What changed for the orchestrator to clean up after a reload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadDiff {
    /// Locations known before the reload that are no longer bookmarked.
    pub removed: Vec<Location>,
    /// URIs that must not keep a pending retry: disabled ones and removed ones.
    pub inactive: Vec<String>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        BookmarkStore::default()
    }

    /// Replace the location set with `bookmarks`, merging the persisted settings.
    ///
    /// Failure bookkeeping (`fail_count`, `last_attempt`) is carried over by URI,
    /// otherwise every pass would reset the retry budget.
    pub fn reload(&mut self, bookmarks: Vec<Bookmark>, settings: &LocationSettingsMap) -> ReloadDiff {
        let mut previous: HashMap<String, Location> = self
            .locations
            .drain(..)
            .map(|l| (l.uri().to_string(), l))
            .collect();

        let mut next = Vec::with_capacity(bookmarks.len());
        for bookmark in bookmarks {
            let mut location = Location::new(bookmark.uri.clone(), display_name(&bookmark));
            if let Some(s) = settings.get(&bookmark.uri) {
                location.apply_settings(s);
            }
            if let Some(prev) = previous.remove(&bookmark.uri) {
                location.fail_count = prev.fail_count;
                location.last_attempt = prev.last_attempt;
            }
            next.push(location);
        }

        let mut removed: Vec<Location> = previous.into_values().collect();
        removed.sort_by(|a, b| a.uri().cmp(b.uri()));

        let inactive = next
            .iter()
            .filter(|l| !l.enabled)
            .chain(removed.iter())
            .map(|l| l.uri().to_string())
            .collect();

        self.locations = next;
        ReloadDiff { removed, inactive }
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn get(&self, uri: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.uri() == uri)
    }

    pub fn get_mut(&mut self, uri: &str) -> Option<&mut Location> {
        self.locations.iter_mut().find(|l| l.uri() == uri)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter().filter(|l| l.enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Reset the failure counter after a successful mount.
    pub fn record_success(&mut self, uri: &str, at: DateTime<Utc>) -> Option<Location> {
        let location = self.get_mut(uri)?;
        location.fail_count = 0;
        location.last_attempt = Some(at);
        Some(location.clone())
    }

    pub fn record_failure(&mut self, uri: &str, at: DateTime<Utc>) -> Option<Location> {
        let location = self.get_mut(uri)?;
        location.fail_count += 1;
        location.last_attempt = Some(at);
        Some(location.clone())
    }
}
