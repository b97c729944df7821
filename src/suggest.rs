//! Substitution suggestions derived from accumulated playing time.
//!
//! Purely advisory: the caller decides whether to act on a suggestion,
//! which then becomes a regular substitution command through the state
//! machine. Nothing here reads or writes the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Player;

/// How swap candidates are paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Balance playing time: most-played field players out, least-played
    /// bench players in.
    Even,
    /// Bring on fresh legs: longest-serving field players out, bench
    /// players under the freshness threshold in.
    Refresh,
}

/// Bench players with fewer minutes than this count as fresh legs.
const FRESH_LEGS_MINUTES: f64 = 10.0;

/// A proposed swap and the human-readable reason behind it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    /// Player to take off the field.
    pub player_out: Player,
    /// Player to bring on.
    pub player_in: Player,
    /// Why this swap is proposed.
    pub reason: String,
}

/// Propose up to a handful of swaps for the current lineup.
///
/// Deterministic for a given input: ties in minutes played are broken by
/// the order players appear in the input slices. Players missing from
/// `minutes_played` count as zero. Returns an empty list when the bench is
/// empty, or when `Refresh` finds no fresh legs.
pub fn suggest_swaps(
    on_field: &[Player],
    on_bench: &[Player],
    minutes_played: &HashMap<Uuid, f64>,
    strategy: Strategy,
) -> Vec<Suggestion> {
    if on_bench.is_empty() {
        return Vec::new();
    }

    let minutes = |player: &Player| minutes_played.get(&player.id).copied().unwrap_or(0.0);

    match strategy {
        Strategy::Even => {
            let mut field: Vec<&Player> = on_field.iter().collect();
            field.sort_by(|a, b| minutes(b).total_cmp(&minutes(a)));
            let mut bench: Vec<&Player> = on_bench.iter().collect();
            bench.sort_by(|a, b| minutes(a).total_cmp(&minutes(b)));

            field
                .iter()
                .take(3)
                .enumerate()
                .map(|(i, player_out)| {
                    let player_in = bench[i % bench.len()];
                    Suggestion {
                        player_out: (*player_out).clone(),
                        player_in: player_in.clone(),
                        reason: format!(
                            "Even playing time. {} has played {} min.",
                            player_out.name,
                            minutes(player_out).floor() as i64
                        ),
                    }
                })
                .collect()
        }
        Strategy::Refresh => {
            let mut field: Vec<&Player> = on_field.iter().collect();
            field.sort_by(|a, b| minutes(b).total_cmp(&minutes(a)));
            let fresh_legs: Vec<&Player> = on_bench
                .iter()
                .filter(|player| minutes(player) < FRESH_LEGS_MINUTES)
                .collect();
            if fresh_legs.is_empty() {
                return Vec::new();
            }

            field
                .iter()
                .take(2)
                .enumerate()
                .map(|(i, player_out)| Suggestion {
                    player_out: (*player_out).clone(),
                    player_in: fresh_legs[i % fresh_legs.len()].clone(),
                    reason: "Refresh with fresh legs.".into(),
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;

    fn player(id: Uuid, name: &str, number: u32) -> Player {
        Player {
            id,
            team_id: Uuid::nil(),
            name: name.into(),
            number,
            position: Position::Midfield,
        }
    }

    fn squad() -> (Vec<Player>, Vec<Player>, HashMap<Uuid, f64>) {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let field = vec![
            player(ids[0], "Player 1", 1),
            player(ids[1], "Player 2", 2),
            player(ids[2], "Player 3", 3),
        ];
        let bench = vec![player(ids[3], "Player 4", 4), player(ids[4], "Player 5", 5)];
        let minutes = HashMap::from([
            (ids[0], 45.0),
            (ids[1], 30.0),
            (ids[2], 40.0),
            (ids[3], 0.0),
            (ids[4], 15.0),
        ]);
        (field, bench, minutes)
    }

    #[test]
    fn even_pairs_most_played_with_least_played() {
        let (field, bench, minutes) = squad();
        let suggestions = suggest_swaps(&field, &bench, &minutes, Strategy::Even);

        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0].player_out.id, field[0].id);
        assert_eq!(suggestions[0].player_in.id, bench[0].id);
        assert_eq!(suggestions[1].player_out.id, field[2].id);
    }

    #[test]
    fn even_reports_whole_minutes_in_the_reason() {
        let (field, bench, mut minutes) = squad();
        minutes.insert(field[0].id, 45.9);
        let suggestions = suggest_swaps(&field, &bench, &minutes, Strategy::Even);

        assert_eq!(
            suggestions[0].reason,
            "Even playing time. Player 1 has played 45 min."
        );
    }

    #[test]
    fn empty_bench_yields_no_suggestions() {
        let (field, _, minutes) = squad();
        assert!(suggest_swaps(&field, &[], &minutes, Strategy::Even).is_empty());
        assert!(suggest_swaps(&field, &[], &minutes, Strategy::Refresh).is_empty());
    }

    #[test]
    fn refresh_only_picks_fresh_legs() {
        let (field, bench, mut minutes) = squad();
        // Player 5 at 15 min is not fresh; everyone cycles onto Player 4.
        let suggestions = suggest_swaps(&field, &bench, &minutes, Strategy::Refresh);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions.iter().all(|s| s.player_in.id == bench[0].id));

        // No bench player under the threshold: nothing to suggest.
        minutes.insert(bench[0].id, 20.0);
        assert!(suggest_swaps(&field, &bench, &minutes, Strategy::Refresh).is_empty());
    }

    #[test]
    fn missing_minutes_count_as_zero() {
        let (field, bench, _) = squad();
        let suggestions = suggest_swaps(&field, &bench, &HashMap::new(), Strategy::Even);
        assert_eq!(suggestions.len(), 3);
        // With all-zero minutes, input order is preserved.
        assert_eq!(suggestions[0].player_out.id, field[0].id);
        assert_eq!(suggestions[0].player_in.id, bench[0].id);
    }
}
