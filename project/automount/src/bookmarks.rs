use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::Bookmark;
use tokio::fs;
use tracing::warn;
use url::Url;

use crate::error::BookmarkError;

/// Provides the ordered list of bookmarked remote locations.
#[async_trait]
pub trait BookmarkSource: Send + Sync {
    async fn load_locations(&self) -> Result<Vec<Bookmark>, BookmarkError>;
}

/// GTK file-manager bookmarks, one `URI [name]` entry per line.
#[derive(Debug, Clone)]
pub struct FileBookmarkSource {
    path: PathBuf,
}

impl FileBookmarkSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileBookmarkSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BookmarkSource for FileBookmarkSource {
    async fn load_locations(&self) -> Result<Vec<Bookmark>, BookmarkError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_bookmarks(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(BookmarkError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Keep remote entries only; local `file://` bookmarks are not mountable.
pub fn parse_bookmarks(content: &str) -> Vec<Bookmark> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains("://") && !line.starts_with("file://"))
        .filter_map(|line| {
            let (uri, name) = match line.split_once(' ') {
                Some((uri, name)) => (uri, Some(name.trim()).filter(|n| !n.is_empty())),
                None => (line, None),
            };
            if !seen.insert(uri.to_string()) {
                warn!("Duplicate bookmark {uri}, keeping the first entry");
                return None;
            }
            Some(Bookmark::new(uri, name.map(str::to_string)))
        })
        .collect()
}

/// Label for a bookmark without a name: host plus path, or just the host for a bare share.
pub fn display_name_from_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown");
            let path = url.path();
            if path.len() > 1 {
                format!("{host}{path}")
            } else {
                host.to_string()
            }
        }
        Err(_) => uri.to_string(),
    }
}

pub fn display_name(bookmark: &Bookmark) -> String {
    bookmark
        .raw_name
        .clone()
        .unwrap_or_else(|| display_name_from_uri(&bookmark.uri))
}

#[cfg(test)]
mod test {
    use super::*;

    const BOOKMARKS: &str = "file:///home/jupiter/Documents Documents
smb://nas.local/media Media Library

sftp://backup.example.com/srv/data
ftp://files.example.com/
not-a-uri
smb://nas.local/media Duplicate
";

    #[test]
    fn test_parse_bookmarks() {
        let bookmarks = parse_bookmarks(BOOKMARKS);
        assert_eq!(
            bookmarks,
            vec![
                Bookmark::new("smb://nas.local/media", Some("Media Library".to_string())),
                Bookmark::new("sftp://backup.example.com/srv/data", None),
                Bookmark::new("ftp://files.example.com/", None),
            ]
        );
    }

    #[test]
    fn test_display_name_from_uri() {
        assert_eq!(
            display_name_from_uri("sftp://backup.example.com/srv/data"),
            "backup.example.com/srv/data"
        );
        assert_eq!(display_name_from_uri("ftp://files.example.com/"), "files.example.com");
        assert_eq!(display_name_from_uri("smb:"), "unknown");
        assert_eq!(display_name_from_uri("::nope"), "::nope");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileBookmarkSource::new(dir.path().join("bookmarks"));
        assert!(source.load_locations().await.unwrap().is_empty());
    }
}
