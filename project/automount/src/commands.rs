//! Subcommands that work on the configuration files directly, without a daemon.
//!
//! A running daemon notices the edits on its next settings poll.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use common::{Location, LocationStatus};
use tabwriter::TabWriter;
use tracing::warn;

use crate::bookmarks::{BookmarkSource, FileBookmarkSource};
use crate::config::{FileSettings, SettingsSource, update_location_settings};
use crate::store::BookmarkStore;
use crate::symlink::resolve_alias_name;

/// Bookmarked locations merged with their settings, as the daemon would see them.
pub async fn load_locations(config_path: &Path) -> Result<Vec<Location>> {
    let settings = FileSettings::new(config_path).load().await;
    let bookmarks = FileBookmarkSource::new(&settings.options.bookmarks_file)
        .load_locations()
        .await?;
    let mut store = BookmarkStore::new();
    store.reload(bookmarks, &settings.locations);
    Ok(store.locations().to_vec())
}

pub async fn list(config_path: &Path) -> Result<()> {
    let locations = load_locations(config_path).await?;
    write_locations(io::stdout(), &locations)?;
    Ok(())
}

pub fn write_locations<W: Write>(out: W, locations: &[Location]) -> io::Result<()> {
    let mut tab_writer = TabWriter::new(out);
    writeln!(&mut tab_writer, "URI\tNAME\tENABLED\tALIAS")?;
    for location in locations {
        let alias = resolve_alias_name(location).unwrap_or_else(|e| format!("({e})"));
        writeln!(
            &mut tab_writer,
            "{}\t{}\t{}\t{}",
            location.uri(),
            location.display_name,
            if location.enabled { "yes" } else { "no" },
            alias
        )?;
    }
    tab_writer.flush()
}

/// Table of a daemon's `GET /locations` reply.
pub fn write_location_statuses<W: Write>(out: W, statuses: &[LocationStatus]) -> io::Result<()> {
    let mut tab_writer = TabWriter::new(out);
    writeln!(&mut tab_writer, "URI\tNAME\tENABLED\tMOUNTED\tFAILS\tALIAS")?;
    for status in statuses {
        let mut mounted = if status.mounted { "yes" } else { "no" }.to_string();
        if status.in_flight {
            mounted.push_str(" (busy)");
        } else if status.retry_pending {
            mounted.push_str(" (retrying)");
        }
        let alias = status
            .alias
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            &mut tab_writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            status.location.uri(),
            status.location.display_name,
            if status.location.enabled { "yes" } else { "no" },
            mounted,
            status.location.fail_count,
            alias
        )?;
    }
    tab_writer.flush()
}

async fn location_settings_file(config_path: &Path, uri: &str) -> Result<std::path::PathBuf> {
    let locations = load_locations(config_path).await?;
    if !locations.iter().any(|l| l.uri() == uri) {
        warn!("{uri} is not bookmarked, the setting applies once it is");
    }
    Ok(FileSettings::new(config_path)
        .load()
        .await
        .options
        .location_settings_file)
}

pub async fn set_enabled(config_path: &Path, uri: &str, enabled: bool) -> Result<()> {
    let path = location_settings_file(config_path, uri).await?;
    update_location_settings(&path, uri, |s| s.enabled = Some(enabled))
        .await
        .with_context(|| format!("failed to update settings of {uri}"))?;
    println!("{uri} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

/// Set or, with `None`, clear the alias name override of `uri`.
pub async fn set_alias(config_path: &Path, uri: &str, name: Option<String>) -> Result<()> {
    let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if let Some(name) = &name {
        let mut candidate = Location::new(uri, name.as_str());
        candidate.alias_name = Some(name.clone());
        if resolve_alias_name(&candidate).is_err() {
            bail!("{name:?} is not a valid alias name, it must be a single file name");
        }
    }

    let path = location_settings_file(config_path, uri).await?;
    update_location_settings(&path, uri, |s| {
        s.alias_name = name.clone();
        s.custom_mount_point = None;
    })
    .await
    .with_context(|| format!("failed to update settings of {uri}"))?;
    match name {
        Some(name) => println!("{uri} is aliased as {name}"),
        None => println!("{uri} uses its display name as alias"),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_locations() {
        let mut media = Location::new("smb://nas/media", "Media Library");
        media.enabled = false;
        let mut backup = Location::new("sftp://backup/srv", "backup/srv");
        backup.alias_name = Some("Backup".to_string());

        let mut out = Vec::new();
        write_locations(&mut out, &[media, backup]).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("URI"));
        assert!(lines[1].contains("Media_Library"));
        assert!(lines[1].contains("no"));
        assert!(lines[2].ends_with("Backup"));
    }

    #[tokio::test]
    async fn test_set_enabled_and_alias() {
        let dir = tempdir().unwrap();
        let bookmarks = dir.path().join("bookmarks");
        let blob = dir.path().join("locations.json");
        let config = dir.path().join("config.yaml");
        std::fs::write(&bookmarks, "smb://nas/media Media\n").unwrap();
        std::fs::write(
            &config,
            format!(
                "bookmarksFile: {}\nlocationSettingsFile: {}\n",
                bookmarks.display(),
                blob.display()
            ),
        )
        .unwrap();

        set_enabled(&config, "smb://nas/media", false).await.unwrap();
        set_alias(&config, "smb://nas/media", Some("Films".to_string()))
            .await
            .unwrap();
        assert!(
            set_alias(&config, "smb://nas/media", Some("../x".to_string()))
                .await
                .is_err()
        );

        let locations = load_locations(&config).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert!(!locations[0].enabled);
        assert_eq!(locations[0].alias_name.as_deref(), Some("Films"));

        set_alias(&config, "smb://nas/media", None).await.unwrap();
        let locations = load_locations(&config).await.unwrap();
        assert_eq!(locations[0].alias_name, None);
    }
}
