//! Oplog push/pull engine reconciling the local event log with the server.
//!
//! The push cycle drains unsynced oplog rows in batches per match, marks
//! them synced on acknowledgment and compacts acknowledged rows once the
//! log grows past the configured threshold. Failures never lose work: an
//! aborted cycle simply leaves `synced = false` rows behind for the next
//! one, which is the at-least-once delivery guarantee of the whole system.

use std::{collections::BTreeMap, sync::Arc};

use reqwest::StatusCode;
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify, watch},
    time::{interval, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dto::{PullRequest, PullResponse, SyncRequest, SyncResponse},
    model::MatchEvent,
    store::{LocalStore, StoreError, keys},
};

/// Source of the bearer credential attached to every reconciliation
/// request. Token issuance and refresh live outside the core.
pub trait AuthProvider: Send + Sync {
    /// Current bearer token.
    fn bearer_token(&self) -> String;
}

/// Fixed-token provider, sufficient for tests and single-user deployments.
pub struct StaticToken(pub String);

impl AuthProvider for StaticToken {
    fn bearer_token(&self) -> String {
        self.0.clone()
    }
}

/// Explicit push-cycle state token owned by the engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushState {
    Idle,
    Pushing,
}

/// Outcome of one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The cycle ran to completion.
    Completed {
        /// Events newly accepted by the server in this cycle.
        synced: usize,
        /// Events the server had already seen; informational, not re-queued.
        conflicts: u64,
    },
    /// Another push cycle is in flight; this request was rejected, not
    /// queued.
    AlreadySyncing,
    /// The client is offline; nothing was attempted.
    Offline,
}

/// Errors aborting a push or pull cycle. Never fatal to the application;
/// the oplog keeps the work until a later cycle succeeds.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failed mid-cycle.
    #[error("storage failure during sync")]
    Storage(#[from] StoreError),
    /// Request could not be sent or the response not decoded.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server rejected request for match {match_id}: {status}")]
    Rejected {
        /// Match whose batch was rejected.
        match_id: Uuid,
        /// HTTP status returned by the server.
        status: StatusCode,
    },
}

/// Client-side sync engine. One instance per local store; the push-cycle
/// guard lives on the instance, not in module state, so multiple stores and
/// tests stay isolated.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    http: reqwest::Client,
    config: AppConfig,
    auth: Arc<dyn AuthProvider>,
    push_state: Mutex<PushState>,
    online_rx: watch::Receiver<bool>,
    trigger: Notify,
}

impl SyncEngine {
    /// Build an engine over `store`, reporting connectivity through
    /// `online_rx` (owned by the platform's connectivity watcher).
    pub fn new(
        store: Arc<LocalStore>,
        config: AppConfig,
        auth: Arc<dyn AuthProvider>,
        online_rx: watch::Receiver<bool>,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            store,
            http,
            config,
            auth,
            push_state: Mutex::new(PushState::Idle),
            online_rx,
            trigger: Notify::new(),
        })
    }

    /// Run one push cycle now, unless one is already in flight or the
    /// client is offline.
    ///
    /// On success every submitted event is marked synced locally — events
    /// the server reports as conflicts were accepted previously and count
    /// toward completion. On failure nothing is marked and the cycle
    /// aborts, leaving the rows for the next attempt.
    pub async fn push_once(&self) -> Result<PushOutcome, SyncError> {
        let Ok(mut state) = self.push_state.try_lock() else {
            return Ok(PushOutcome::AlreadySyncing);
        };
        *state = PushState::Pushing;
        let result = self.push_cycle().await;
        *state = PushState::Idle;
        result
    }

    async fn push_cycle(&self) -> Result<PushOutcome, SyncError> {
        if !*self.online_rx.borrow() {
            return Ok(PushOutcome::Offline);
        }

        let unsynced = self.store.unsynced_events().await?;
        let mut batches: BTreeMap<Uuid, Vec<MatchEvent>> = BTreeMap::new();
        for event in unsynced {
            batches.entry(event.match_id).or_default().push(event);
        }

        let mut synced = 0usize;
        let mut conflicts = 0u64;
        for (match_id, batch) in batches {
            let receipt = self.submit_batch(match_id, &batch).await?;
            let ids: Vec<Uuid> = batch.iter().map(|event| event.id).collect();
            self.store.mark_events_synced(&ids).await?;
            debug!(%match_id, events = ids.len(), accepted = receipt.synced_ids.len(), "batch reconciled");
            synced += receipt.synced_ids.len();
            conflicts += receipt.conflicts;
        }

        // Compaction only runs here, after the cycle's read-then-mark
        // sequence has fully completed and while the push guard is held, so
        // it can never race an in-flight cycle.
        self.compact_if_needed().await?;

        Ok(PushOutcome::Completed { synced, conflicts })
    }

    async fn submit_batch(
        &self,
        match_id: Uuid,
        batch: &[MatchEvent],
    ) -> Result<SyncResponse, SyncError> {
        let url = format!("{}/matches/{match_id}/sync", self.config.server_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.auth.bearer_token())
            .json(&SyncRequest {
                events: batch.to_vec(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Rejected {
                match_id,
                status: response.status(),
            });
        }

        Ok(response.json().await?)
    }

    async fn compact_if_needed(&self) -> Result<(), StoreError> {
        let total = self.store.oplog_len().await?;
        if total > self.config.compaction_threshold {
            let deleted = self.store.compact_oplog().await?;
            info!(total, deleted, "compacted acknowledged oplog events");
        }
        Ok(())
    }

    /// Fetch events for `match_id` accepted from other devices since the
    /// stored watermark, advancing the watermark to the server's clock.
    /// Merging the returned events into local state is the caller's call.
    pub async fn pull(&self, match_id: Uuid) -> Result<Vec<MatchEvent>, SyncError> {
        let key = keys::pull_watermark(match_id);
        let watermark: i64 = self.store.get_meta(&key).await?.unwrap_or(0);

        let url = format!("{}/matches/{match_id}/pull", self.config.server_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.auth.bearer_token())
            .json(&PullRequest {
                client_ts: watermark,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Rejected {
                match_id,
                status: response.status(),
            });
        }

        let body: PullResponse = response.json().await?;
        self.store.set_meta(&key, &body.server_ts).await?;
        if !body.events.is_empty() {
            info!(%match_id, count = body.events.len(), "pulled events from other devices");
        }
        Ok(body.events)
    }

    /// Push repeatedly with exponential backoff until an attempt completes
    /// or the attempt budget is exhausted. Returns `None` when exhausted;
    /// no further retry is scheduled until the next external trigger.
    pub async fn push_with_retry(&self) -> Option<PushOutcome> {
        let mut delay = self.config.backoff_base;
        for attempt in 0..self.config.max_push_attempts {
            match self.push_once().await {
                Ok(outcome) => {
                    if let PushOutcome::Completed { synced, conflicts } = outcome {
                        if conflicts > 0 {
                            info!(conflicts, "server had already seen some submitted events");
                        }
                        debug!(synced, "push cycle completed");
                    }
                    return Some(outcome);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "push cycle failed; backing off");
                    if attempt + 1 < self.config.max_push_attempts {
                        sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        warn!("exhausted push attempts; dormant until the next trigger");
        None
    }

    /// Whether a push cycle is currently in flight, e.g. for a sync
    /// indicator in the UI.
    pub fn is_pushing(&self) -> bool {
        match self.push_state.try_lock() {
            Ok(state) => *state == PushState::Pushing,
            Err(_) => true,
        }
    }

    /// Request an immediate push from the background loop, e.g. when the
    /// user taps "sync now".
    pub fn trigger_push(&self) {
        self.trigger.notify_one();
    }

    /// Background loop: pushes on the scheduled interval, immediately on
    /// the offline→online edge and on manual triggers. Every trigger starts
    /// a fresh attempt budget. Exits when the connectivity watcher is gone.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.push_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut online_rx = self.online_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*online_rx.borrow_and_update() {
                        debug!("connectivity lost; staying dormant");
                        continue;
                    }
                    info!("connectivity regained; pushing immediately");
                }
                _ = self.trigger.notified() => {}
            }

            self.push_with_retry().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::MatchEventType;

    fn test_config(server_url: &str) -> AppConfig {
        AppConfig {
            server_url: server_url.into(),
            push_interval: Duration::from_secs(30),
            backoff_base: Duration::from_millis(5),
            max_push_attempts: 2,
            request_timeout: Duration::from_millis(500),
            compaction_threshold: 1_000,
            checkpoint_interval: Duration::from_secs(10),
        }
    }

    fn engine_with(
        server_url: &str,
        online: bool,
    ) -> (Arc<SyncEngine>, Arc<LocalStore>, watch::Sender<bool>) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let (online_tx, online_rx) = watch::channel(online);
        let engine = SyncEngine::new(
            store.clone(),
            test_config(server_url),
            Arc::new(StaticToken("secret".into())),
            online_rx,
        )
        .unwrap();
        (Arc::new(engine), store, online_tx)
    }

    #[tokio::test]
    async fn offline_push_is_a_noop() {
        let (engine, store, _online) = engine_with("http://127.0.0.1:1", false);
        store
            .add_event(Uuid::new_v4(), MatchEventType::Start, None)
            .await
            .unwrap();

        let outcome = engine.push_once().await.unwrap();
        assert_eq!(outcome, PushOutcome::Offline);
        assert_eq!(store.unsynced_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_push_is_rejected_not_queued() {
        let (engine, _store, _online) = engine_with("http://127.0.0.1:1", true);

        let guard = engine.push_state.lock().await;
        assert!(engine.is_pushing());
        let outcome = engine.push_once().await.unwrap();
        assert_eq!(outcome, PushOutcome::AlreadySyncing);
        drop(guard);
        assert!(!engine.is_pushing());
    }

    #[tokio::test]
    async fn empty_oplog_completes_without_network() {
        // The server URL points nowhere; an empty cycle must not touch it.
        let (engine, _store, _online) = engine_with("http://127.0.0.1:1", true);

        let outcome = engine.push_once().await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Completed {
                synced: 0,
                conflicts: 0
            }
        );
    }

    #[tokio::test]
    async fn retry_budget_is_bounded_and_leaves_events_unsynced() {
        let (engine, store, _online) = engine_with("http://127.0.0.1:1", true);
        store
            .add_event(Uuid::new_v4(), MatchEventType::Start, None)
            .await
            .unwrap();

        let outcome = engine.push_with_retry().await;
        assert!(outcome.is_none());
        assert_eq!(store.unsynced_events().await.unwrap().len(), 1);
    }
}
