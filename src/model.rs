//! Domain entities shared between the local store, the sync engine and the
//! reconciliation endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Current wall-clock time as epoch milliseconds, the timestamp unit used
/// everywhere in the oplog and on the wire.
pub fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Kind of fact recorded in the oplog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchEventType {
    /// Match kicked off; the payload carries the initial lineup.
    Start,
    /// Clock paused by the coach.
    Pause,
    /// Clock resumed after a pause.
    Resume,
    /// Match ended, either manually or because the clock ran out.
    Stop,
    /// A field player swapped with a bench player.
    Substitution,
}

impl MatchEventType {
    /// Stable textual form used as the storage key for the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchEventType::Start => "START",
            MatchEventType::Pause => "PAUSE",
            MatchEventType::Resume => "RESUME",
            MatchEventType::Stop => "STOP",
            MatchEventType::Substitution => "SUBSTITUTION",
        }
    }

    /// Inverse of [`MatchEventType::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "START" => Some(MatchEventType::Start),
            "PAUSE" => Some(MatchEventType::Pause),
            "RESUME" => Some(MatchEventType::Resume),
            "STOP" => Some(MatchEventType::Stop),
            "SUBSTITUTION" => Some(MatchEventType::Substitution),
            _ => None,
        }
    }
}

/// Immutable fact appended to the oplog.
///
/// Once appended, `id`, `kind`, `ts` and `payload` never change; only the
/// `synced` flag flips to `true` after the server acknowledges the event.
/// The `id` is the deduplication key end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    /// Client-generated, collision-resistant identifier.
    pub id: Uuid,
    /// Match this event belongs to.
    pub match_id: Uuid,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: MatchEventType,
    /// Client-observed epoch-millisecond timestamp at creation.
    pub ts: i64,
    /// Free-form structured data specific to the event kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Whether the server has durably accepted this event.
    pub synced: bool,
}

impl MatchEvent {
    /// Build a fresh, unsynced event with a new id and the current timestamp.
    pub fn new(match_id: Uuid, kind: MatchEventType, payload: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            match_id,
            kind,
            ts: epoch_ms(),
            payload,
            synced: false,
        }
    }
}

/// Structured payload of a [`MatchEventType::Substitution`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionPayload {
    /// Player leaving the field.
    pub player_out_id: Uuid,
    /// Player entering from the bench.
    pub player_in_id: Uuid,
    /// Whole match minute at which the swap happened.
    pub minute: i64,
}

/// Lifecycle status of a match snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Configured but not yet kicked off.
    Ready,
    /// Clock has started at least once.
    Ongoing,
    /// Match ended; kept archived indefinitely.
    Finished,
}

impl MatchStatus {
    /// Stable textual form used as the storage value for the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Ready => "Ready",
            MatchStatus::Ongoing => "Ongoing",
            MatchStatus::Finished => "Finished",
        }
    }

    /// Inverse of [`MatchStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Ready" => Some(MatchStatus::Ready),
            "Ongoing" => Some(MatchStatus::Ongoing),
            "Finished" => Some(MatchStatus::Finished),
            _ => None,
        }
    }
}

/// Locally persisted match snapshot.
///
/// The authoritative copy on the server additionally embeds the merged event
/// array; the local snapshot only tracks configuration and status, with the
/// oplog acting as the staging buffer that drains into the server copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// Stable identifier for the match.
    pub id: Uuid,
    /// Team playing this match.
    pub team_id: Uuid,
    /// Display name of the opposing team.
    pub opponent: String,
    /// Scheduled playing time in minutes.
    pub duration_minutes: u32,
    /// Lifecycle status, driven by the match state machine.
    pub status: MatchStatus,
}

/// Field position of a roster player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    /// Keeper.
    Goalkeeper,
    /// Back line.
    Defense,
    /// Middle third.
    Midfield,
    /// Attacking line.
    Forward,
}

impl Position {
    /// Stable textual form used as the storage value for the position column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "Goalkeeper",
            Position::Defense => "Defense",
            Position::Midfield => "Midfield",
            Position::Forward => "Forward",
        }
    }

    /// Inverse of [`Position::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Goalkeeper" => Some(Position::Goalkeeper),
            "Defense" => Some(Position::Defense),
            "Midfield" => Some(Position::Midfield),
            "Forward" => Some(Position::Forward),
            _ => None,
        }
    }
}

/// Roster entry. Shirt numbers are unique within a team, enforced at write
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Stable identifier for the player.
    pub id: Uuid,
    /// Team the player belongs to.
    pub team_id: Uuid,
    /// Display name.
    pub name: String,
    /// Shirt number, unique within the team.
    pub number: u32,
    /// Field position.
    pub position: Position,
}

/// Staged configuration handed from the match-setup flow to the live-match
/// flow through the `meta` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSetup {
    /// Team playing the match.
    pub team_id: Uuid,
    /// Display name of the opposing team.
    pub opponent: String,
    /// Scheduled playing time in minutes.
    pub duration_minutes: u32,
    /// Full roster available for the match.
    pub players: Vec<Player>,
    /// Ids starting on the field.
    pub on_field: Vec<Uuid>,
    /// Ids starting on the bench.
    pub on_bench: Vec<Uuid>,
}
