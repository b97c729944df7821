//! Roster management: player CRUD with per-team shirt-number validation.

use tracing::info;
use uuid::Uuid;

use crate::{
    error::ServiceError,
    model::Player,
    store::LocalStore,
};

/// Add a new player to their team's roster.
///
/// Rejects a shirt number already worn by another player on the same team.
/// The unique index in the store backs this up, but validating here turns
/// the collision into a proper validation error instead of a storage one.
pub async fn add_player(store: &LocalStore, player: Player) -> Result<Player, ServiceError> {
    ensure_number_free(store, &player).await?;
    store.save_player(&player).await?;
    info!(player_id = %player.id, team_id = %player.team_id, number = player.number, "player added");
    Ok(player)
}

/// Update an existing player. Same number-uniqueness rule as
/// [`add_player`]; a player keeping their own number is fine.
pub async fn update_player(store: &LocalStore, player: Player) -> Result<Player, ServiceError> {
    if store.player_by_id(player.id).await?.is_none() {
        return Err(ServiceError::NotFound(format!("player {}", player.id)));
    }
    ensure_number_free(store, &player).await?;
    store.save_player(&player).await?;
    Ok(player)
}

/// Remove a player from the roster.
pub async fn remove_player(store: &LocalStore, player_id: Uuid) -> Result<(), ServiceError> {
    if !store.delete_player(player_id).await? {
        return Err(ServiceError::NotFound(format!("player {player_id}")));
    }
    info!(%player_id, "player removed");
    Ok(())
}

/// All players on a team, ordered by shirt number.
pub async fn team_roster(store: &LocalStore, team_id: Uuid) -> Result<Vec<Player>, ServiceError> {
    Ok(store.players_by_team(team_id).await?)
}

async fn ensure_number_free(store: &LocalStore, player: &Player) -> Result<(), ServiceError> {
    let teammates = store.players_by_team(player.team_id).await?;
    let taken = teammates
        .iter()
        .any(|other| other.id != player.id && other.number == player.number);
    if taken {
        return Err(ServiceError::InvalidInput(format!(
            "shirt number {} is already taken on this team",
            player.number
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;

    fn player(team_id: Uuid, name: &str, number: u32) -> Player {
        Player {
            id: Uuid::new_v4(),
            team_id,
            name: name.into(),
            number,
            position: Position::Defense,
        }
    }

    #[tokio::test]
    async fn duplicate_number_on_same_team_is_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let team_id = Uuid::new_v4();
        add_player(&store, player(team_id, "Anna", 7)).await.unwrap();

        let err = add_player(&store, player(team_id, "Berit", 7))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        // Same number on a different team is fine.
        add_player(&store, player(Uuid::new_v4(), "Clara", 7))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_keeps_own_number_but_not_a_teammates() {
        let store = LocalStore::open_in_memory().unwrap();
        let team_id = Uuid::new_v4();
        let anna = add_player(&store, player(team_id, "Anna", 7)).await.unwrap();
        add_player(&store, player(team_id, "Berit", 8)).await.unwrap();

        let mut renamed = anna.clone();
        renamed.name = "Anne".into();
        update_player(&store, renamed).await.unwrap();

        let mut stolen = anna.clone();
        stolen.number = 8;
        let err = update_player(&store, stolen).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn removing_an_unknown_player_is_not_found() {
        let store = LocalStore::open_in_memory().unwrap();
        let err = remove_player(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn roster_is_ordered_by_number() {
        let store = LocalStore::open_in_memory().unwrap();
        let team_id = Uuid::new_v4();
        add_player(&store, player(team_id, "Berit", 9)).await.unwrap();
        add_player(&store, player(team_id, "Anna", 4)).await.unwrap();

        let roster = team_roster(&store, team_id).await.unwrap();
        let numbers: Vec<u32> = roster.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![4, 9]);
    }
}
