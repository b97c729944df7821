//! Local durable store backing the offline event log.
//!
//! A single sqlite database holds four logical collections: match snapshots,
//! roster entries, the append-only oplog and a namespaced key/value meta
//! table used for clock and lineup checkpoints. Every mutation goes through
//! the transactional primitives here; multi-row writes either fully apply or
//! not at all.

mod error;
mod schema;

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{Match, MatchEvent, MatchEventType, MatchStatus, Player, Position};

pub use self::error::{StoreError, StoreResult};

/// Well-known `meta` table keys.
///
/// The meta table is a generic namespaced escape hatch; these helpers keep
/// every writer and reader agreeing on the namespace layout.
pub mod keys {
    use uuid::Uuid;

    /// Pointer to the match currently driven by the live-match flow.
    pub const ACTIVE_MATCH: &str = "active-match";
    /// Staged configuration handed from match setup to the live-match flow.
    pub const STAGED_SETUP: &str = "staged-match-setup";

    /// Per-match clock checkpoint.
    pub fn clock_checkpoint(match_id: Uuid) -> String {
        format!("clock/{match_id}")
    }

    /// Per-match lineup checkpoint.
    pub fn lineup_checkpoint(match_id: Uuid) -> String {
        format!("lineup/{match_id}")
    }

    /// Per-match pull watermark (newest server timestamp already seen).
    pub fn pull_watermark(match_id: Uuid) -> String {
        format!("pull-watermark/{match_id}")
    }

    /// Per-match minutes carried over from a previous session; negative
    /// values are a deficit owed to the player.
    pub fn previous_session_minutes(match_id: Uuid) -> String {
        format!("previous-minutes/{match_id}")
    }
}

/// Handle to the local sqlite database.
///
/// The connection is serialized behind an async mutex; individual operations
/// are short-lived local transactions, so contention stays negligible.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory database, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- matches ---

    /// Fetch a match snapshot by id.
    pub async fn match_by_id(&self, id: Uuid) -> StoreResult<Option<Match>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, team_id, opponent, duration_minutes, status
                 FROM matches WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(match_from_row).transpose()
    }

    /// Upsert a match snapshot.
    pub async fn save_match(&self, entry: &Match) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO matches (id, team_id, opponent, duration_minutes, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 team_id = excluded.team_id,
                 opponent = excluded.opponent,
                 duration_minutes = excluded.duration_minutes,
                 status = excluded.status",
            params![
                entry.id.to_string(),
                entry.team_id.to_string(),
                entry.opponent,
                i64::from(entry.duration_minutes),
                entry.status.as_str(),
            ],
        )?;
        Ok(())
    }

    // --- players ---

    /// Fetch a roster entry by id.
    pub async fn player_by_id(&self, id: Uuid) -> StoreResult<Option<Player>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, team_id, name, number, position FROM players WHERE id = ?1",
                params![id.to_string()],
                player_columns,
            )
            .optional()?;

        row.map(player_from_row).transpose()
    }

    /// All roster entries for a team, ordered by shirt number.
    pub async fn players_by_team(&self, team_id: Uuid) -> StoreResult<Vec<Player>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, team_id, name, number, position
             FROM players WHERE team_id = ?1 ORDER BY number",
        )?;
        let rows = stmt
            .query_map(params![team_id.to_string()], player_columns)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(player_from_row).collect()
    }

    /// Upsert a single roster entry.
    pub async fn save_player(&self, player: &Player) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        upsert_player(&conn, player)
    }

    /// Upsert a batch of roster entries in one transaction; either every row
    /// applies or none does.
    pub async fn save_players(&self, players: &[Player]) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for player in players {
            upsert_player(&tx, player)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a roster entry, reporting whether it existed.
    pub async fn delete_player(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM players WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    // --- oplog ---

    /// Create a fresh unsynced event and append it atomically.
    pub async fn add_event(
        &self,
        match_id: Uuid,
        kind: MatchEventType,
        payload: Option<Value>,
    ) -> StoreResult<MatchEvent> {
        let event = MatchEvent::new(match_id, kind, payload);
        let conn = self.conn.lock().await;
        insert_event(&conn, &event)?;
        Ok(event)
    }

    /// Append a state-machine transition durably: the oplog event, the lineup
    /// checkpoint and (optionally) the match snapshot status all commit in
    /// one transaction, so a reload can never observe a half-applied
    /// transition.
    pub async fn append_transition<C: Serialize>(
        &self,
        match_id: Uuid,
        kind: MatchEventType,
        payload: Option<Value>,
        checkpoint_key: &str,
        checkpoint: &C,
        status: Option<MatchStatus>,
    ) -> StoreResult<MatchEvent> {
        let event = MatchEvent::new(match_id, kind, payload);
        let encoded =
            serde_json::to_string(checkpoint).map_err(|e| StoreError::corrupt("meta", e))?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        insert_event(&tx, &event)?;
        upsert_meta(&tx, checkpoint_key, &encoded)?;
        if let Some(status) = status {
            tx.execute(
                "UPDATE matches SET status = ?2 WHERE id = ?1",
                params![match_id.to_string(), status.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(event)
    }

    /// All events not yet acknowledged by the server, in insertion order.
    pub async fn unsynced_events(&self) -> StoreResult<Vec<MatchEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, type, ts, payload, synced
             FROM oplog WHERE synced = 0 ORDER BY ts, rowid",
        )?;
        let rows = stmt
            .query_map([], event_columns)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(event_from_row).collect()
    }

    /// All events recorded for a match, in insertion order.
    pub async fn events_for_match(&self, match_id: Uuid) -> StoreResult<Vec<MatchEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, type, ts, payload, synced
             FROM oplog WHERE match_id = ?1 ORDER BY ts, rowid",
        )?;
        let rows = stmt
            .query_map(params![match_id.to_string()], event_columns)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(event_from_row).collect()
    }

    /// Flip the `synced` flag for the given event ids in one transaction.
    pub async fn mark_events_synced(&self, ids: &[Uuid]) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE oplog SET synced = 1 WHERE id = ?1",
                params![id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Total number of oplog rows, synced or not.
    pub async fn oplog_len(&self) -> StoreResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM oplog", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove every acknowledged event. Unsynced rows are retained
    /// unconditionally; they are the at-least-once delivery safety net.
    pub async fn compact_oplog(&self) -> StoreResult<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM oplog WHERE synced = 1", [])?;
        Ok(deleted as u64)
    }

    // --- meta ---

    /// Read a JSON value from the meta table.
    pub async fn get_meta<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        raw.map(|value| serde_json::from_str(&value).map_err(|e| StoreError::corrupt("meta", e)))
            .transpose()
    }

    /// Write a JSON value to the meta table, replacing any previous value.
    pub async fn set_meta<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let encoded = serde_json::to_string(value).map_err(|e| StoreError::corrupt("meta", e))?;
        let conn = self.conn.lock().await;
        upsert_meta(&conn, key, &encoded)
    }

    /// Remove a meta entry, reporting whether it existed.
    pub async fn delete_meta(&self, key: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }
}

fn upsert_player(conn: &Connection, player: &Player) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO players (id, team_id, name, number, position)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (id) DO UPDATE SET
             team_id = excluded.team_id,
             name = excluded.name,
             number = excluded.number,
             position = excluded.position",
        params![
            player.id.to_string(),
            player.team_id.to_string(),
            player.name,
            i64::from(player.number),
            player.position.as_str(),
        ],
    )?;
    Ok(())
}

fn insert_event(conn: &Connection, event: &MatchEvent) -> StoreResult<()> {
    let payload = event
        .payload
        .as_ref()
        .map(|value| serde_json::to_string(value).map_err(|e| StoreError::corrupt("oplog", e)))
        .transpose()?;

    conn.execute(
        "INSERT INTO oplog (id, match_id, type, ts, payload, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.id.to_string(),
            event.match_id.to_string(),
            event.kind.as_str(),
            event.ts,
            payload,
            event.synced as i64,
        ],
    )?;
    Ok(())
}

fn upsert_meta(conn: &Connection, key: &str, encoded: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, encoded],
    )?;
    Ok(())
}

fn parse_uuid(collection: &'static str, value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::corrupt(collection, e))
}

fn match_from_row(row: (String, String, String, i64, String)) -> StoreResult<Match> {
    let (id, team_id, opponent, duration_minutes, status) = row;
    Ok(Match {
        id: parse_uuid("matches", &id)?,
        team_id: parse_uuid("matches", &team_id)?,
        opponent,
        duration_minutes: duration_minutes as u32,
        status: MatchStatus::parse(&status)
            .ok_or_else(|| StoreError::corrupt("matches", format!("unknown status `{status}`")))?,
    })
}

type PlayerColumns = (String, String, String, i64, String);

fn player_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn player_from_row(row: PlayerColumns) -> StoreResult<Player> {
    let (id, team_id, name, number, position) = row;
    Ok(Player {
        id: parse_uuid("players", &id)?,
        team_id: parse_uuid("players", &team_id)?,
        name,
        number: number as u32,
        position: Position::parse(&position).ok_or_else(|| {
            StoreError::corrupt("players", format!("unknown position `{position}`"))
        })?,
    })
}

type EventColumns = (String, String, String, i64, Option<String>, i64);

fn event_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn event_from_row(row: EventColumns) -> StoreResult<MatchEvent> {
    let (id, match_id, kind, ts, payload, synced) = row;
    Ok(MatchEvent {
        id: parse_uuid("oplog", &id)?,
        match_id: parse_uuid("oplog", &match_id)?,
        kind: MatchEventType::parse(&kind)
            .ok_or_else(|| StoreError::corrupt("oplog", format!("unknown event type `{kind}`")))?,
        ts,
        payload: payload
            .map(|raw| serde_json::from_str(&raw).map_err(|e| StoreError::corrupt("oplog", e)))
            .transpose()?,
        synced: synced != 0,
    })
}
