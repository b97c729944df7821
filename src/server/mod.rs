//! Reconciliation endpoint consumed by the sync engine.
//!
//! Runs embedded (primarily for tests and local deployments) but speaks the
//! exact wire contract a remote deployment would, so the client side never
//! knows the difference.

pub mod authority;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, header},
    routing::post,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    dto::{PullRequest, PullResponse, SyncRequest, SyncResponse},
    error::AppError,
};

pub use authority::MatchAuthority;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    /// Authoritative event store.
    pub authority: Arc<MatchAuthority>,
    /// Bearer token every request must present.
    pub token: String,
}

/// Build the reconciliation router.
pub fn router(state: ServerState) -> Router<()> {
    Router::new()
        .route("/matches/{id}/sync", post(sync_match))
        .route("/matches/{id}/pull", post(pull_match))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reconcile a batch of client events into the authoritative array.
async fn sync_match(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    authorize(&state, &headers)?;

    let receipt = state
        .authority
        .apply_events(id, payload.events)
        .ok_or_else(|| AppError::NotFound(format!("match {id}")))?;

    Ok(Json(SyncResponse {
        synced_ids: receipt.synced_ids,
        conflicts: receipt.conflicts,
    }))
}

/// Return events newer than the client's watermark.
async fn pull_match(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<PullRequest>,
) -> Result<Json<PullResponse>, AppError> {
    authorize(&state, &headers)?;

    let (events, server_ts) = state
        .authority
        .events_since(id, payload.client_ts)
        .ok_or_else(|| AppError::NotFound(format!("match {id}")))?;

    Ok(Json(PullResponse { events, server_ts }))
}

fn authorize(state: &ServerState, headers: &HeaderMap) -> Result<(), AppError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer credential".into()))?;

    if presented != state.token {
        return Err(AppError::Unauthorized("invalid bearer credential".into()));
    }
    Ok(())
}
