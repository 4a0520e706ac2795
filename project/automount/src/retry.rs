use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct PendingRetry {
    id: u64,
    delay: Duration,
    handle: JoinHandle<()>,
}

/// One-shot retry timers keyed by URI, at most one pending per URI.
#[derive(Default)]
pub struct RetryScheduler {
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<String, PendingRetry>>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        RetryScheduler::default()
    }

    /// Run `task` after `delay`, replacing any retry already pending for `uri`.
    ///
    /// The timer drops its own entry before running `task`, so the task may
    /// schedule the next retry for the same URI.
    pub fn schedule<F>(&self, uri: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let key = uri.to_string();

        let mut guard = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut pending = pending.lock();
                match pending.get(&key) {
                    Some(entry) if entry.id == id => pending.remove(&key).is_some(),
                    _ => false,
                }
            };
            if current {
                debug!("Retry timer for {key} fired");
                task.await;
            }
        });
        if let Some(previous) = guard.insert(uri.to_string(), PendingRetry { id, delay, handle }) {
            previous.handle.abort();
        }
    }

    /// Returns whether a pending retry was cancelled.
    pub fn cancel(&self, uri: &str) -> bool {
        match self.pending.lock().remove(uri) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRetry> = self.pending.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.handle.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, uri: &str) -> bool {
        self.pending.lock().contains_key(uri)
    }

    pub fn pending_delay(&self, uri: &str) -> Option<Duration> {
        self.pending.lock().get(uri).map(|e| e.delay)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let make = move || {
            let c = Arc::clone(&c);
            Box::pin(async move {
                c.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        };
        (count, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_and_clears() {
        let scheduler = RetryScheduler::new();
        let (count, task) = counter();
        scheduler.schedule("smb://nas/media", Duration::from_secs(5), task());
        assert!(scheduler.is_pending("smb://nas/media"));
        assert_eq!(scheduler.pending_delay("smb://nas/media"), Some(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending("smb://nas/media"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_pending() {
        let scheduler = RetryScheduler::new();
        let (count, task) = counter();
        scheduler.schedule("smb://nas/media", Duration::from_secs(5), task());
        scheduler.schedule("smb://nas/media", Duration::from_secs(10), task());
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = RetryScheduler::new();
        let (count, task) = counter();
        scheduler.schedule("smb://a/x", Duration::from_secs(5), task());
        scheduler.schedule("smb://b/y", Duration::from_secs(5), task());

        assert!(scheduler.cancel("smb://a/x"));
        assert!(!scheduler.cancel("smb://a/x"));
        assert_eq!(scheduler.cancel_all(), 1);
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
