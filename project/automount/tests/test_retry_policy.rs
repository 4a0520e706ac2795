mod common;

use std::time::Duration;

use ::common::MountEvent;
use automount::{AttemptOutcome, Trigger};
use tokio::time::Instant;

use crate::common::Harness;

const MEDIA: &str = "smb://nas/media";

fn harness(max_retries: u32) -> Harness {
    Harness::with_options("smb://nas/media Media\n", |options| {
        options.max_retries = max_retries;
        options.retry_delay_seconds = 5;
    })
}

/// Timer deadlines are rounded up to the next millisecond.
fn assert_elapsed(start: Instant, secs: u64) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_secs(secs) + Duration::from_millis(100),
        "elapsed {elapsed:?}, expected {secs}s"
    );
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_terminal() {
    let mut h = harness(2);
    h.provider.fail_always(MEDIA, "timeout");
    let start = Instant::now();

    let report = h.orchestrator.reconcile(Trigger::Periodic).await;
    assert_eq!(
        report.attempt(MEDIA),
        Some(AttemptOutcome::Failed {
            retry_scheduled: true
        })
    );
    assert_eq!(h.orchestrator.pending_retry_delay(MEDIA), Some(Duration::from_secs(5)));

    let first = h
        .wait_for(|e| matches!(e, MountEvent::MountFailedRetrying { .. }))
        .await;
    assert_eq!(
        first,
        MountEvent::MountFailedRetrying {
            uri: MEDIA.to_string(),
            attempt: 1,
            max: 2
        }
    );

    let second = h
        .wait_for(|e| matches!(e, MountEvent::MountFailedRetrying { .. }))
        .await;
    assert_eq!(
        second,
        MountEvent::MountFailedRetrying {
            uri: MEDIA.to_string(),
            attempt: 2,
            max: 2
        }
    );
    assert_elapsed(start, 5);

    let terminal = h
        .wait_for(|e| matches!(e, MountEvent::MountFailedTerminal { .. }))
        .await;
    assert_eq!(
        terminal,
        MountEvent::MountFailedTerminal {
            uri: MEDIA.to_string(),
            message: "timeout".to_string()
        }
    );
    assert_elapsed(start, 10);

    assert_eq!(h.provider.mount_calls(MEDIA), 3);
    assert!(!h.orchestrator.retry_pending(MEDIA));
    assert_eq!(h.orchestrator.location(MEDIA).unwrap().fail_count, 3);

    // Nothing else is scheduled after the terminal failure.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.provider.mount_calls(MEDIA), 3);
}

#[tokio::test(start_paused = true)]
async fn test_later_pass_attempts_after_terminal_failure() {
    let mut h = harness(0);
    h.provider.fail_always(MEDIA, "host unreachable");

    h.orchestrator.reconcile(Trigger::Periodic).await;
    h.wait_for(|e| matches!(e, MountEvent::MountFailedTerminal { .. }))
        .await;
    assert!(!h.orchestrator.retry_pending(MEDIA));

    let report = h.orchestrator.reconcile(Trigger::Periodic).await;
    assert_eq!(
        report.attempt(MEDIA),
        Some(AttemptOutcome::Failed {
            retry_scheduled: false
        })
    );
    assert_eq!(h.provider.mount_calls(MEDIA), 2);

    h.provider.stop_failing(MEDIA);
    let report = h.orchestrator.reconcile(Trigger::Periodic).await;
    assert_eq!(report.attempt(MEDIA), Some(AttemptOutcome::Mounted));
    assert_eq!(h.orchestrator.location(MEDIA).unwrap().fail_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_fail_count() {
    let mut h = harness(2);
    h.provider.fail_times(MEDIA, 1, "timeout");

    h.orchestrator.reconcile(Trigger::Periodic).await;
    assert_eq!(h.orchestrator.location(MEDIA).unwrap().fail_count, 1);
    h.wait_for(|e| matches!(e, MountEvent::MountSucceeded { .. }))
        .await;
    assert_eq!(h.orchestrator.location(MEDIA).unwrap().fail_count, 0);
    assert_eq!(h.link_target("Media"), Some(h.provider.root_of(MEDIA)));

    h.provider.set_unmounted(MEDIA);
    h.provider.fail_times(MEDIA, 1, "timeout");
    h.orchestrator.reconcile(Trigger::Periodic).await;
    let event = h
        .wait_for(|e| matches!(e, MountEvent::MountFailedRetrying { .. }))
        .await;
    assert_eq!(
        event,
        MountEvent::MountFailedRetrying {
            uri: MEDIA.to_string(),
            attempt: 1,
            max: 2
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_skips_mount_when_already_mounted() {
    let h = harness(2);
    h.provider.fail_times(MEDIA, 1, "timeout");

    h.orchestrator.reconcile(Trigger::Periodic).await;
    assert!(h.orchestrator.retry_pending(MEDIA));
    h.provider.set_mounted(MEDIA);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!h.orchestrator.retry_pending(MEDIA));
    assert_eq!(h.provider.mount_calls(MEDIA), 1);
    assert_eq!(h.link_target("Media"), Some(h.provider.root_of(MEDIA)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_during_startup_is_quiet() {
    let mut h = harness(2);
    h.provider.fail_times(MEDIA, 1, "timeout");

    h.orchestrator.reconcile(Trigger::Startup).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.provider.mount_calls(MEDIA), 2);
    assert_eq!(h.orchestrator.status().mounted, 1);

    let events = h.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, MountEvent::MountFailedRetrying { .. }))
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, MountEvent::MountSucceeded { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_manual_mount_failure_schedules_retry() {
    let mut h = harness(1);
    h.provider.fail_times(MEDIA, 1, "timeout");

    assert_eq!(
        h.orchestrator.mount_location(MEDIA).await,
        AttemptOutcome::Failed {
            retry_scheduled: true
        }
    );
    let event = h
        .wait_for(|e| matches!(e, MountEvent::MountSucceeded { .. }))
        .await;
    assert_eq!(event.uri(), Some(MEDIA));
    assert_eq!(h.provider.mount_calls(MEDIA), 2);
}
