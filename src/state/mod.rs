//! Match session: the state machine plus its persistence side effects.
//!
//! [`MatchSession`] dispatches commands through the pure reducer in
//! [`machine`], durably records the transition (oplog event, lineup
//! checkpoint and match status in one store transaction) and only then
//! commits the new state in memory. A storage failure therefore leaves the
//! in-memory state untouched rather than pretending the write happened.

pub mod machine;

use std::{collections::HashMap, sync::Arc};

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    model::{Match, MatchEventType, MatchSetup, MatchStatus, SubstitutionPayload},
    store::{LocalStore, keys},
};

pub use self::machine::{
    ContextOverride, InvalidTransition, LineupCheckpoint, MatchCommand, MatchContext, MatchPhase,
    MatchState, transition,
};

/// One live match: reducer state bound to a match id and the local store.
///
/// Callers must serialize dispatch; a transition is fully applied, including
/// its checkpoint write, before the next command is accepted.
pub struct MatchSession {
    store: Arc<LocalStore>,
    match_id: Uuid,
    state: MatchState,
}

impl MatchSession {
    /// Start a session for a brand-new match described by `setup`: persists
    /// the match snapshot, points the active-match key at it and seeds the
    /// reducer with the configured lineup.
    pub async fn begin(store: Arc<LocalStore>, setup: MatchSetup) -> Result<Self, ServiceError> {
        if setup.opponent.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "opponent must not be empty".into(),
            ));
        }
        if setup.duration_minutes == 0 {
            return Err(ServiceError::InvalidInput(
                "match duration must be strictly positive".into(),
            ));
        }

        let entry = Match {
            id: Uuid::new_v4(),
            team_id: setup.team_id,
            opponent: setup.opponent.clone(),
            duration_minutes: setup.duration_minutes,
            status: MatchStatus::Ready,
        };
        store.save_match(&entry).await?;
        store.set_meta(keys::ACTIVE_MATCH, &entry.id).await?;

        let state = transition(
            &MatchState::default(),
            &MatchCommand::Reset(ContextOverride {
                on_field: Some(setup.on_field),
                on_bench: Some(setup.on_bench),
                players: Some(setup.players),
                duration_ms: Some(i64::from(setup.duration_minutes) * 60_000),
                elapsed_ms: None,
            }),
        )
        .map_err(ServiceError::from)?;

        store
            .set_meta(
                &keys::lineup_checkpoint(entry.id),
                &LineupCheckpoint::of(&state),
            )
            .await?;

        info!(match_id = %entry.id, opponent = %entry.opponent, "match session started");
        Ok(Self {
            store,
            match_id: entry.id,
            state,
        })
    }

    /// Start a session from the staged setup left by the match-configuration
    /// flow, consuming the staging record.
    pub async fn begin_staged(store: Arc<LocalStore>) -> Result<Self, ServiceError> {
        let staged: Option<MatchSetup> = store.get_meta(keys::STAGED_SETUP).await?;
        let Some(setup) = staged else {
            return Err(ServiceError::NotFound("no staged match setup".into()));
        };
        store.delete_meta(keys::STAGED_SETUP).await?;
        Self::begin(store, setup).await
    }

    /// Resume the session for an existing match from its last lineup
    /// checkpoint, falling back to an empty partition when none exists.
    pub async fn resume(store: Arc<LocalStore>, match_id: Uuid) -> Result<Self, ServiceError> {
        let Some(entry) = store.match_by_id(match_id).await? else {
            return Err(ServiceError::NotFound(format!(
                "match `{match_id}` not found"
            )));
        };
        let players = store.players_by_team(entry.team_id).await?;
        let duration_ms = i64::from(entry.duration_minutes) * 60_000;

        let mut state = load_initial_context(&store, match_id, duration_ms).await?;
        state.context.players = players;

        debug!(%match_id, phase = ?state.phase, "match session resumed");
        Ok(Self {
            store,
            match_id,
            state,
        })
    }

    /// Match this session drives.
    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    /// Current reducer context.
    pub fn context(&self) -> &MatchContext {
        &self.state.context
    }

    /// Apply a command: compute the transition, persist its effects, then
    /// commit. Returns the new phase.
    pub async fn dispatch(&mut self, command: MatchCommand) -> Result<MatchPhase, ServiceError> {
        let next = transition(&self.state, &command)?;

        match oplog_entry(&self.state, &next, &command) {
            Some((kind, payload)) => {
                self.store
                    .append_transition(
                        self.match_id,
                        kind,
                        payload,
                        &keys::lineup_checkpoint(self.match_id),
                        &LineupCheckpoint::of(&next),
                        status_after(&next, kind),
                    )
                    .await?;
            }
            None if next.phase != self.state.phase
                || next.context.on_field != self.state.context.on_field
                || next.context.on_bench != self.state.context.on_bench =>
            {
                self.store
                    .set_meta(
                        &keys::lineup_checkpoint(self.match_id),
                        &LineupCheckpoint::of(&next),
                    )
                    .await?;
            }
            None => {}
        }

        self.state = next;
        Ok(self.state.phase)
    }
}

/// Stage a match setup for the live-match flow to pick up later.
pub async fn stage_setup(store: &LocalStore, setup: &MatchSetup) -> Result<(), ServiceError> {
    store.set_meta(keys::STAGED_SETUP, setup).await?;
    Ok(())
}

/// Minutes played per player carried over from a previous session of this
/// match, used to seed the suggestion engine's minutes map. Empty when no
/// previous session exists.
pub async fn previous_session_minutes(
    store: &LocalStore,
    match_id: Uuid,
) -> Result<HashMap<Uuid, f64>, ServiceError> {
    let minutes = store
        .get_meta(&keys::previous_session_minutes(match_id))
        .await?;
    Ok(minutes.unwrap_or_default())
}

/// Record the per-player minutes of the session that just ended.
pub async fn record_session_minutes(
    store: &LocalStore,
    match_id: Uuid,
    minutes: &HashMap<Uuid, f64>,
) -> Result<(), ServiceError> {
    store
        .set_meta(&keys::previous_session_minutes(match_id), minutes)
        .await?;
    Ok(())
}

/// Read the last lineup checkpoint for a match, falling back to an empty
/// partition. The restored partition must be disjoint; a player appearing on
/// both sides means the checkpoint is corrupt.
pub async fn load_initial_context(
    store: &LocalStore,
    match_id: Uuid,
    duration_ms: i64,
) -> Result<MatchState, ServiceError> {
    let checkpoint: Option<LineupCheckpoint> =
        store.get_meta(&keys::lineup_checkpoint(match_id)).await?;

    let Some(checkpoint) = checkpoint else {
        let mut state = MatchState::default();
        state.context.duration_ms = duration_ms;
        return Ok(state);
    };

    if !checkpoint.is_disjoint() {
        return Err(ServiceError::InvalidState(format!(
            "lineup checkpoint for match `{match_id}` has players on both field and bench"
        )));
    }

    Ok(MatchState {
        phase: checkpoint.status,
        context: MatchContext {
            duration_ms,
            on_field: checkpoint.on_field.into_iter().collect(),
            on_bench: checkpoint.on_bench.into_iter().collect(),
            ..MatchContext::default()
        },
    })
}

/// Oplog entry produced by a transition, if the command is user-significant.
/// Ticks only record an event when they end the match.
fn oplog_entry(
    previous: &MatchState,
    next: &MatchState,
    command: &MatchCommand,
) -> Option<(MatchEventType, Option<serde_json::Value>)> {
    match command {
        MatchCommand::Start => Some((
            MatchEventType::Start,
            Some(json!({
                "initialLineup": next.context.on_field.iter().collect::<Vec<_>>(),
            })),
        )),
        MatchCommand::Pause => Some((MatchEventType::Pause, None)),
        MatchCommand::Resume => Some((MatchEventType::Resume, None)),
        MatchCommand::Stop => Some((MatchEventType::Stop, None)),
        MatchCommand::Substitute {
            player_out,
            player_in,
        } => {
            let payload = SubstitutionPayload {
                player_out_id: *player_out,
                player_in_id: *player_in,
                minute: next.context.elapsed_ms / 60_000,
            };
            Some((
                MatchEventType::Substitution,
                serde_json::to_value(payload).ok(),
            ))
        }
        MatchCommand::Tick { .. }
            if previous.phase == MatchPhase::Running && next.phase == MatchPhase::Stopped =>
        {
            Some((MatchEventType::Stop, None))
        }
        MatchCommand::Tick { .. } | MatchCommand::Reset(_) => None,
    }
}

/// Match snapshot status implied by a recorded transition.
fn status_after(next: &MatchState, kind: MatchEventType) -> Option<MatchStatus> {
    match kind {
        MatchEventType::Start => Some(MatchStatus::Ongoing),
        MatchEventType::Stop if next.phase == MatchPhase::Stopped => Some(MatchStatus::Finished),
        _ => None,
    }
}
