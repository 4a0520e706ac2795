use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    self, Json, Router,
    extract::State as AxumState,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::daemon::sync_loop::State;
use crate::daemon::triggers::run_pass;
use crate::orchestrator::{AttemptOutcome, Trigger, UnmountOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UriRequest {
    pub uri: String,
}

type Reply = (StatusCode, Json<Value>);

pub fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/locations", get(handle_locations))
        .route("/check", post(handle_check))
        .route("/mount-all", post(handle_mount_all))
        .route("/unmount-all", post(handle_unmount_all))
        .route("/mount", post(handle_mount))
        .route("/unmount", post(handle_unmount))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<State>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control API to {addr}"))?;
    info!("Control API serving on {addr}");
    axum::serve(listener, router(state))
        .await
        .context("control API stopped")?;
    Ok(())
}

async fn handle_status(AxumState(state): AxumState<Arc<State>>) -> Reply {
    let status = state.orchestrator.status();
    (
        StatusCode::OK,
        Json(json!({ "status": status, "summary": status.summary() })),
    )
}

async fn handle_locations(AxumState(state): AxumState<Arc<State>>) -> Reply {
    let locations = state.orchestrator.location_statuses().await;
    (StatusCode::OK, Json(json!(locations)))
}

/// Passes and bulk operations can take long; they run in the background.
async fn handle_check(AxumState(state): AxumState<Arc<State>>) -> Reply {
    tokio::spawn(async move { run_pass(&state, Trigger::Manual).await });
    accepted("check started")
}

async fn handle_mount_all(AxumState(state): AxumState<Arc<State>>) -> Reply {
    tokio::spawn(async move { state.orchestrator.mount_all_enabled().await });
    accepted("mounting all enabled locations")
}

async fn handle_unmount_all(AxumState(state): AxumState<Arc<State>>) -> Reply {
    tokio::spawn(async move { state.orchestrator.unmount_all().await });
    accepted("unmounting all mounted locations")
}

async fn handle_mount(
    AxumState(state): AxumState<Arc<State>>,
    Json(req): Json<UriRequest>,
) -> Reply {
    let outcome = state.orchestrator.mount_location(&req.uri).await;
    let (code, msg) = match outcome {
        AttemptOutcome::Mounted => (StatusCode::OK, "mounted"),
        AttemptOutcome::AlreadyMounted => (StatusCode::OK, "already mounted"),
        AttemptOutcome::Superseded => (StatusCode::OK, "mounted, but no longer tracked"),
        AttemptOutcome::InFlight => (StatusCode::CONFLICT, "another operation is in progress"),
        AttemptOutcome::Failed {
            retry_scheduled: true,
        } => (StatusCode::BAD_GATEWAY, "mount failed, retry scheduled"),
        AttemptOutcome::Failed {
            retry_scheduled: false,
        } => (StatusCode::BAD_GATEWAY, "mount failed"),
        AttemptOutcome::Unknown => (StatusCode::NOT_FOUND, "not a bookmarked location"),
    };
    (code, Json(json!({ "uri": req.uri, "msg": msg })))
}

async fn handle_unmount(
    AxumState(state): AxumState<Arc<State>>,
    Json(req): Json<UriRequest>,
) -> Reply {
    let outcome = state.orchestrator.unmount(&req.uri).await;
    let (code, msg) = match outcome {
        UnmountOutcome::Unmounted => (StatusCode::OK, "unmounted"),
        UnmountOutcome::NotMounted => (StatusCode::OK, "not mounted"),
        UnmountOutcome::InFlight => (StatusCode::CONFLICT, "another operation is in progress"),
        UnmountOutcome::Failed => (StatusCode::BAD_GATEWAY, "unmount failed"),
        UnmountOutcome::Unknown => (StatusCode::NOT_FOUND, "not a bookmarked location"),
    };
    (code, Json(json!({ "uri": req.uri, "msg": msg })))
}

fn accepted(msg: &str) -> Reply {
    (StatusCode::ACCEPTED, Json(json!({ "msg": msg })))
}
