pub mod bookmarks;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod store;
pub mod symlink;

pub use orchestrator::{AttemptOrigin, AttemptOutcome, MountOrchestrator, ReconcileReport, Trigger, UnmountOutcome};
