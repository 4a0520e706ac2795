use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use common::ObservedMountState;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::MountProvider;
use crate::error::MountError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mounts through GIO (gvfs) by running the `gio` command line tool.
///
/// `gio info` only succeeds for mounted remote locations and reports the FUSE
/// path gvfs exposes as `local path:`, which is used as the mount root.
#[derive(Debug, Clone)]
pub struct GioMountProvider {
    program: PathBuf,
    timeout: Duration,
}

impl Default for GioMountProvider {
    fn default() -> Self {
        GioMountProvider {
            program: PathBuf::from("gio"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

enum RunError {
    Spawn(std::io::Error),
    TimedOut(Duration),
}

impl GioMountProvider {
    pub fn new(timeout: Duration) -> Self {
        GioMountProvider {
            timeout,
            ..Default::default()
        }
    }

    pub fn with_program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.program = program.into();
        self
    }

    async fn run<I, S>(&self, args: I) -> Result<Output, RunError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        // No terminal to answer credential prompts; rely on the keyring.
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RunError::Spawn(e)),
            Err(_) => Err(RunError::TimedOut(self.timeout)),
        }
    }

    async fn info(&self, uri: &str) -> Option<String> {
        match self.run(["info", uri]).await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                debug!(
                    "gio info {uri}: {}",
                    error_message(uri, &output.stderr)
                );
                None
            }
            Err(RunError::Spawn(e)) => {
                debug!("failed to run {:?}: {e}", self.program);
                None
            }
            Err(RunError::TimedOut(t)) => {
                debug!("gio info {uri} timed out after {t:?}");
                None
            }
        }
    }
}

#[async_trait]
impl MountProvider for GioMountProvider {
    async fn is_mounted(&self, uri: &str) -> bool {
        self.info(uri).await.is_some()
    }

    async fn mount_root_path(&self, uri: &str) -> Option<PathBuf> {
        self.info(uri).await.and_then(|info| parse_local_path(&info))
    }

    async fn observe(&self, uri: &str) -> ObservedMountState {
        match self.info(uri).await {
            Some(info) => ObservedMountState::Mounted {
                root: parse_local_path(&info),
            },
            None => ObservedMountState::Unmounted,
        }
    }

    async fn mount(&self, uri: &str) -> Result<(), MountError> {
        match self.run(["mount", uri]).await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(MountError::MountFailed(error_message(uri, &output.stderr))),
            Err(RunError::Spawn(e)) => Err(MountError::ProviderUnavailable(format!(
                "failed to run {:?}: {e}",
                self.program
            ))),
            Err(RunError::TimedOut(t)) => {
                Err(MountError::MountFailed(format!("timed out after {t:?}")))
            }
        }
    }

    async fn unmount(&self, uri: &str) -> Result<(), MountError> {
        match self.run(["mount", "-u", uri]).await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                let message = error_message(uri, &output.stderr);
                if is_not_mounted(&message) {
                    Err(MountError::NotMounted)
                } else {
                    Err(MountError::UnmountFailed(message))
                }
            }
            Err(RunError::Spawn(e)) => Err(MountError::ProviderUnavailable(format!(
                "failed to run {:?}: {e}",
                self.program
            ))),
            Err(RunError::TimedOut(t)) => {
                Err(MountError::UnmountFailed(format!("timed out after {t:?}")))
            }
        }
    }
}

/// Extract the `local path:` attribute from `gio info` output.
pub fn parse_local_path(info: &str) -> Option<PathBuf> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("local path:"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

/// Turn `gio: smb://host/share/: Some error` into `Some error`.
fn error_message(uri: &str, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let line = stderr
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("unknown error");
    let line = line.strip_prefix("gio:").map(str::trim).unwrap_or(line);
    let trimmed_uri = uri.trim_end_matches('/');
    [format!("{trimmed_uri}/:"), format!("{trimmed_uri}:")]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .unwrap_or(line)
        .to_string()
}

fn is_not_mounted(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("not mounted") || message.contains("containing mount")
}

#[cfg(test)]
mod test {
    use super::*;

    const INFO: &str = "display name: media on nas
edit name: media on nas
name: /
type: directory
uri: smb://nas/media/
local path: /run/user/1000/gvfs/smb-share:server=nas,share=media
attributes:
  standard::type: 2
";

    #[test]
    fn test_parse_local_path() {
        assert_eq!(
            parse_local_path(INFO),
            Some(PathBuf::from("/run/user/1000/gvfs/smb-share:server=nas,share=media"))
        );
        assert_eq!(parse_local_path("uri: smb://nas/media/\n"), None);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(
                "smb://nas/media",
                b"gio: smb://nas/media/: The specified location is not mounted\n"
            ),
            "The specified location is not mounted"
        );
        assert_eq!(error_message("smb://nas/media", b""), "unknown error");
    }

    #[test]
    fn test_not_mounted_detection() {
        assert!(is_not_mounted("The specified location is not mounted"));
        assert!(is_not_mounted("Containing mount for file smb://nas/media not found"));
        assert!(!is_not_mounted("Permission denied"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_provider_unavailable() {
        let provider = GioMountProvider::default().with_program("/nonexistent/gio-binary");
        let err = provider.mount("smb://nas/media").await.unwrap_err();
        assert!(matches!(err, MountError::ProviderUnavailable(_)));
        assert_eq!(
            provider.observe("smb://nas/media").await,
            ObservedMountState::Unmounted
        );
    }
}
