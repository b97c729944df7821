//! Versioned schema ladder for the local store.
//!
//! The schema version lives in `PRAGMA user_version`. Opening a database
//! applies only the deltas between the stored version and
//! [`SCHEMA_VERSION`], so existing collections survive upgrades.

use rusqlite::Connection;
use tracing::info;

use crate::store::error::{StoreError, StoreResult};

/// Highest schema version this build understands.
pub(crate) const SCHEMA_VERSION: i64 = 2;

/// Bring the database up to [`SCHEMA_VERSION`], creating collections and
/// indexes as needed. All deltas apply inside one transaction.
pub(crate) fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction()?;
    let mut version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let from = version;
    while version < SCHEMA_VERSION {
        apply_delta(&tx, version + 1)?;
        version += 1;
    }

    if version != from {
        tx.execute_batch(&format!("PRAGMA user_version = {version}"))?;
        info!(from, to = version, "migrated local store schema");
    }

    tx.commit()?;
    Ok(())
}

fn apply_delta(tx: &rusqlite::Transaction<'_>, target: i64) -> StoreResult<()> {
    match target {
        1 => tx.execute_batch(
            "CREATE TABLE matches (
                 id               TEXT PRIMARY KEY,
                 team_id          TEXT NOT NULL,
                 opponent         TEXT NOT NULL,
                 duration_minutes INTEGER NOT NULL,
                 status           TEXT NOT NULL
             );
             CREATE TABLE players (
                 id       TEXT PRIMARY KEY,
                 team_id  TEXT NOT NULL,
                 name     TEXT NOT NULL,
                 number   INTEGER NOT NULL,
                 position TEXT NOT NULL
             );
             CREATE INDEX players_team_idx ON players (team_id);
             CREATE TABLE oplog (
                 id       TEXT PRIMARY KEY,
                 match_id TEXT NOT NULL,
                 type     TEXT NOT NULL,
                 ts       INTEGER NOT NULL,
                 payload  TEXT,
                 synced   INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX oplog_match_idx ON oplog (match_id);
             CREATE INDEX oplog_synced_idx ON oplog (synced);
             CREATE TABLE meta (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?,
        // Backstop for the per-team shirt number invariant; the roster layer
        // validates first so callers get a proper validation error.
        2 => tx.execute_batch(
            "CREATE UNIQUE INDEX players_team_number_idx ON players (team_id, number);",
        )?,
        other => {
            return Err(StoreError::Corrupt {
                collection: "schema",
                message: format!("no migration registered for version {other}"),
            });
        }
    }
    Ok(())
}
