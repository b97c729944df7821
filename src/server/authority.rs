//! In-memory authoritative event store behind the reconciliation endpoint.

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::model::{Match, MatchEvent, epoch_ms};

/// Authoritative copy of a match: its snapshot plus the accepted event
/// array, ordered by timestamp.
struct MatchRecord {
    snapshot: Match,
    events: Vec<MatchEvent>,
}

/// Receipt of one sync submission.
pub struct SyncReceipt {
    /// Ids accepted for the first time by this submission.
    pub synced_ids: Vec<Uuid>,
    /// Submitted events whose id had already been accepted.
    pub conflicts: u64,
}

/// Registry of authoritative match records, keyed by match id.
#[derive(Default)]
pub struct MatchAuthority {
    matches: DashMap<Uuid, MatchRecord>,
}

impl MatchAuthority {
    /// Create an empty authority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a match so clients can sync against it.
    pub fn register_match(&self, snapshot: Match) {
        self.matches.insert(
            snapshot.id,
            MatchRecord {
                snapshot,
                events: Vec::new(),
            },
        );
    }

    /// Whether `match_id` is known to this authority.
    pub fn knows(&self, match_id: Uuid) -> bool {
        self.matches.contains_key(&match_id)
    }

    /// Apply a batch of client events to the authoritative array.
    ///
    /// Idempotent on the event id: an id seen before is counted as a
    /// conflict and the stored event is left untouched, so at-least-once
    /// resubmission never duplicates or rewrites history. Accepted events
    /// keep the array ordered by client timestamp; ties keep arrival order.
    /// Returns `None` for an unknown match.
    pub fn apply_events(&self, match_id: Uuid, batch: Vec<MatchEvent>) -> Option<SyncReceipt> {
        let mut record = self.matches.get_mut(&match_id)?;

        let mut synced_ids = Vec::new();
        let mut conflicts = 0u64;
        for mut event in batch {
            if record.events.iter().any(|seen| seen.id == event.id) {
                conflicts += 1;
                continue;
            }
            event.synced = true;
            synced_ids.push(event.id);
            record.events.push(event);
        }
        record.events.sort_by_key(|event| event.ts);

        debug!(%match_id, accepted = synced_ids.len(), conflicts, "sync batch applied");
        Some(SyncReceipt {
            synced_ids,
            conflicts,
        })
    }

    /// Events with `ts` strictly after `client_ts`, plus the server clock
    /// the client should store as its next watermark. `None` for an
    /// unknown match.
    pub fn events_since(&self, match_id: Uuid, client_ts: i64) -> Option<(Vec<MatchEvent>, i64)> {
        let record = self.matches.get(&match_id)?;
        let events = record
            .events
            .iter()
            .filter(|event| event.ts > client_ts)
            .cloned()
            .collect();
        Some((events, epoch_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchEventType, MatchStatus};

    fn registered_match(authority: &MatchAuthority) -> Uuid {
        let snapshot = Match {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            opponent: "Lyn".into(),
            duration_minutes: 60,
            status: MatchStatus::Ongoing,
        };
        let id = snapshot.id;
        authority.register_match(snapshot);
        id
    }

    fn event(match_id: Uuid, ts: i64) -> MatchEvent {
        let mut event = MatchEvent::new(match_id, MatchEventType::Pause, None);
        event.ts = ts;
        event
    }

    #[test]
    fn resubmitting_a_batch_is_all_conflicts() {
        let authority = MatchAuthority::new();
        let match_id = registered_match(&authority);
        let batch = vec![event(match_id, 10), event(match_id, 20)];

        let first = authority.apply_events(match_id, batch.clone()).unwrap();
        assert_eq!(first.synced_ids.len(), 2);
        assert_eq!(first.conflicts, 0);

        let second = authority.apply_events(match_id, batch).unwrap();
        assert!(second.synced_ids.is_empty());
        assert_eq!(second.conflicts, 2);

        let (events, _) = authority.events_since(match_id, 0).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn events_stay_ordered_by_timestamp() {
        let authority = MatchAuthority::new();
        let match_id = registered_match(&authority);

        authority
            .apply_events(match_id, vec![event(match_id, 30)])
            .unwrap();
        authority
            .apply_events(match_id, vec![event(match_id, 10), event(match_id, 20)])
            .unwrap();

        let (events, _) = authority.events_since(match_id, 0).unwrap();
        let stamps: Vec<i64> = events.iter().map(|e| e.ts).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
    }

    #[test]
    fn pull_filters_strictly_after_the_watermark() {
        let authority = MatchAuthority::new();
        let match_id = registered_match(&authority);
        authority
            .apply_events(match_id, vec![event(match_id, 10), event(match_id, 20)])
            .unwrap();

        let (events, server_ts) = authority.events_since(match_id, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ts, 20);
        assert!(server_ts > 0);
    }

    #[test]
    fn unknown_match_yields_none() {
        let authority = MatchAuthority::new();
        assert!(authority.apply_events(Uuid::new_v4(), Vec::new()).is_none());
        assert!(authority.events_since(Uuid::new_v4(), 0).is_none());
    }
}
