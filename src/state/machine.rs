//! Pure reducer deriving the on-field/on-bench partition and elapsed time
//! from the match event vocabulary.
//!
//! The machine is a plain tagged-union transition function with no runtime
//! attached; persistence happens explicitly after state computation (see the
//! session wrapper in the parent module), so multiple match instances can
//! coexist in memory.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::Player;

/// Phase the match state machine can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    /// Lineup configured, clock never started.
    #[default]
    Idle,
    /// Match in progress, time accruing.
    Running,
    /// Match interrupted, time frozen.
    Paused,
    /// Match ended.
    Stopped,
}

/// Context carried through every phase.
///
/// The roster partition uses ordered sets so replayed substitutions stay
/// idempotent and persisted checkpoints serialize as ordered arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchContext {
    /// Elapsed playing time in milliseconds.
    pub elapsed_ms: i64,
    /// Match duration in milliseconds.
    pub duration_ms: i64,
    /// Ids currently on the field.
    pub on_field: BTreeSet<Uuid>,
    /// Ids currently on the bench.
    pub on_bench: BTreeSet<Uuid>,
    /// Full roster available for the match.
    pub players: Vec<Player>,
}

impl Default for MatchContext {
    fn default() -> Self {
        Self {
            elapsed_ms: 0,
            duration_ms: 45 * 60 * 1000,
            on_field: BTreeSet::new(),
            on_bench: BTreeSet::new(),
            players: Vec::new(),
        }
    }
}

/// Phase plus context: the full state of one match machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchState {
    /// Current phase.
    pub phase: MatchPhase,
    /// Current context.
    pub context: MatchContext,
}

/// Context fields a [`MatchCommand::Reset`] may override; anything left as
/// `None` is kept from the previous context (elapsed time resets to zero
/// unless overridden).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextOverride {
    /// Replacement on-field partition.
    pub on_field: Option<Vec<Uuid>>,
    /// Replacement bench partition.
    pub on_bench: Option<Vec<Uuid>>,
    /// Replacement roster.
    pub players: Option<Vec<Player>>,
    /// Replacement duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// Starting elapsed value, e.g. carried over from a previous session.
    pub elapsed_ms: Option<i64>,
}

/// Commands accepted by the match state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCommand {
    /// Kick off from idle.
    Start,
    /// Interrupt a running match.
    Pause,
    /// Continue a paused match.
    Resume,
    /// End the match; elapsed time is capped to the duration.
    Stop,
    /// Advance elapsed time by a clock delta. Only valid while running;
    /// reaching the duration stops the match.
    Tick {
        /// Milliseconds since the previous tick.
        delta_ms: i64,
    },
    /// Swap a field player with a bench player. Idempotent under replay.
    Substitute {
        /// Player leaving the field.
        player_out: Uuid,
        /// Player entering from the bench.
        player_in: Uuid,
    },
    /// Reinitialize to idle with an optional context override.
    Reset(ContextOverride),
}

/// Error returned when a command cannot be applied in the current phase.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid transition: {command:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in.
    pub from: MatchPhase,
    /// Command that was rejected.
    pub command: MatchCommand,
}

/// Compute the next state for a command, or reject it.
///
/// Pure: the caller decides what to persist before committing the result.
pub fn transition(state: &MatchState, command: &MatchCommand) -> Result<MatchState, InvalidTransition> {
    let mut next = state.clone();

    match (state.phase, command) {
        (MatchPhase::Idle, MatchCommand::Start) => next.phase = MatchPhase::Running,
        (MatchPhase::Running, MatchCommand::Pause) => next.phase = MatchPhase::Paused,
        (MatchPhase::Paused, MatchCommand::Resume) => next.phase = MatchPhase::Running,
        (MatchPhase::Running | MatchPhase::Paused, MatchCommand::Stop) => {
            next.phase = MatchPhase::Stopped;
            next.context.elapsed_ms = next.context.elapsed_ms.min(next.context.duration_ms);
        }
        (MatchPhase::Running, MatchCommand::Tick { delta_ms }) => {
            let delta = (*delta_ms).max(0);
            next.context.elapsed_ms =
                (next.context.elapsed_ms + delta).min(next.context.duration_ms);
            if next.context.elapsed_ms >= next.context.duration_ms {
                next.phase = MatchPhase::Stopped;
            }
        }
        (
            MatchPhase::Running,
            MatchCommand::Substitute {
                player_out,
                player_in,
            },
        ) => {
            next.context.on_field.remove(player_out);
            next.context.on_field.insert(*player_in);
            next.context.on_bench.remove(player_in);
            next.context.on_bench.insert(*player_out);
        }
        (_, MatchCommand::Reset(overrides)) => {
            let previous = state.context.clone();
            next.phase = MatchPhase::Idle;
            next.context = MatchContext {
                elapsed_ms: overrides.elapsed_ms.unwrap_or(0),
                duration_ms: overrides.duration_ms.unwrap_or(previous.duration_ms),
                on_field: overrides
                    .on_field
                    .clone()
                    .map(|ids| ids.into_iter().collect())
                    .unwrap_or(previous.on_field),
                on_bench: overrides
                    .on_bench
                    .clone()
                    .map(|ids| ids.into_iter().collect())
                    .unwrap_or(previous.on_bench),
                players: overrides.players.clone().unwrap_or(previous.players),
            };
        }
        (from, command) => {
            return Err(InvalidTransition {
                from,
                command: command.clone(),
            });
        }
    }

    Ok(next)
}

/// Meta-table record restoring the exact roster partition after a reload
/// without replaying the full oplog. Written on every transition that
/// changes the partition or the phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineupCheckpoint {
    /// Ids on the field, ordered.
    pub on_field: Vec<Uuid>,
    /// Ids on the bench, ordered.
    pub on_bench: Vec<Uuid>,
    /// Phase at the time the checkpoint was written.
    pub status: MatchPhase,
}

impl LineupCheckpoint {
    /// Snapshot the partition of a state. Sets serialize as ordered arrays.
    pub fn of(state: &MatchState) -> Self {
        Self {
            on_field: state.context.on_field.iter().copied().collect(),
            on_bench: state.context.on_bench.iter().copied().collect(),
            status: state.phase,
        }
    }

    /// True when no id appears in both partitions.
    pub fn is_disjoint(&self) -> bool {
        let field: BTreeSet<_> = self.on_field.iter().collect();
        self.on_bench.iter().all(|id| !field.contains(id))
    }
}
