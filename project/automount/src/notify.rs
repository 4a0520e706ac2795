//! Turns orchestrator events into user-facing notifications.
//!
//! Displaying them is up to a [`NotificationSink`]; the daemon ships with
//! [`LogSink`], which only writes them to the log.

use std::sync::Arc;

use common::MountEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::orchestrator::MountOrchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub is_error: bool,
}

impl Notification {
    fn info<T: Into<String>, B: Into<String>>(title: T, body: B) -> Self {
        Notification {
            title: title.into(),
            body: body.into(),
            is_error: false,
        }
    }

    fn error<T: Into<String>, B: Into<String>>(title: T, body: B) -> Self {
        Notification {
            is_error: true,
            ..Notification::info(title, body)
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: &Notification) {
        if notification.is_error {
            warn!(title = %notification.title, "{}", notification.body);
        } else {
            info!(title = %notification.title, "{}", notification.body);
        }
    }
}

/// The notification for `event`, if it warrants one. `name` maps a URI to its display name.
pub fn notification_for(event: &MountEvent, name: &dyn Fn(&str) -> String) -> Option<Notification> {
    let notification = match event {
        MountEvent::MountSucceeded { uri } => Notification::info("Mounted Successfully", name(uri)),
        MountEvent::MountFailedRetrying { uri, attempt, max } => Notification::error(
            "Mount Failed - Retrying",
            format!("{} (attempt {attempt}/{max})", name(uri)),
        ),
        MountEvent::MountFailedTerminal { uri, message } => {
            Notification::error("Mount Failed", format!("{}: {message}", name(uri)))
        }
        MountEvent::AlreadyMounted { uri } => Notification::info("Already Mounted", name(uri)),
        MountEvent::Unmounted { uri } => Notification::info("Unmounted", name(uri)),
        MountEvent::NotMounted { uri } => Notification::info("Not Mounted", name(uri)),
        MountEvent::UnmountFailed { uri, message } => {
            Notification::error("Unmount Failed", format!("{}: {message}", name(uri)))
        }
        MountEvent::AliasFailed { uri, message } => {
            Notification::error("Alias Failed", format!("{}: {message}", name(uri)))
        }
        MountEvent::CheckSummary { total, mounted } => Notification::info(
            "Mount Check",
            format!("Checking {total} locations, {mounted} already mounted"),
        ),
        MountEvent::MountAllRequested { count } => {
            Notification::info("Mounting All", format!("Mounting {count} locations"))
        }
        MountEvent::UnmountAllRequested { count } => {
            Notification::info("Unmounting All", format!("Unmounting {count} locations"))
        }
        MountEvent::StatusChanged { .. } => return None,
    };
    Some(notification)
}

/// Feeds orchestrator events through the notification preferences into a sink.
pub struct Notifier {
    orchestrator: MountOrchestrator,
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(orchestrator: MountOrchestrator, sink: Arc<dyn NotificationSink>) -> Self {
        Notifier { orchestrator, sink }
    }

    /// Deliver the notification for `event` if the current preferences allow it.
    pub fn handle(&self, event: &MountEvent) -> Option<Notification> {
        let name = |uri: &str| {
            self.orchestrator
                .location(uri)
                .map(|l| l.display_name)
                .unwrap_or_else(|| uri.to_string())
        };
        let notification = notification_for(event, &name)?;
        if !self
            .orchestrator
            .options()
            .notifications
            .allows(notification.is_error)
        {
            debug!("Notification {:?} suppressed by preferences", notification.title);
            return None;
        }
        self.sink.notify(&notification);
        Some(notification)
    }

    pub async fn run(self, mut events: broadcast::Receiver<MountEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notifier fell behind, {skipped} events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}
