//! Wire types shared by the sync engine client and the reconciliation
//! endpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::MatchEvent;

/// Body of `POST /matches/{id}/sync`: one batch of oplog events for a single
/// match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Events to reconcile, in client insertion order.
    pub events: Vec<MatchEvent>,
}

/// Response of `POST /matches/{id}/sync`.
///
/// Resubmitting an already-accepted event id is not an error: it shows up in
/// `conflicts` instead of `synced_ids`, the expected outcome of
/// at-least-once delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Ids newly accepted by this submission.
    pub synced_ids: Vec<Uuid>,
    /// Number of submitted events the server had already seen.
    pub conflicts: u64,
}

/// Body of `POST /matches/{id}/pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Return only events with a timestamp strictly greater than this.
    pub client_ts: i64,
}

/// Response of `POST /matches/{id}/pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Events newer than the requested watermark, ordered by timestamp.
    pub events: Vec<MatchEvent>,
    /// Server wall-clock time; becomes the client's next watermark.
    pub server_ts: i64,
}
