use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    components::Game,
    config::SimulationRules,
    error::LobbyError,
    ids::{IdAllocator, IdKind},
    store::Store,
};

pub const MAX_PLAYERS_LIMIT: u32 = 16;

/// Creates a waiting game at the configured starting year. Nobody is seated
/// yet, the creator included; players enter through the join gate.
pub fn create_game(
    store: &Store,
    ids: &IdAllocator,
    rules: &SimulationRules,
    creator_user_id: &str,
    max_players: u32,
    now: DateTime<Utc>,
) -> Result<Game, LobbyError> {
    if creator_user_id.trim().is_empty() {
        return Err(LobbyError::MissingCreator);
    }
    if !(1..=MAX_PLAYERS_LIMIT).contains(&max_players) {
        return Err(LobbyError::InvalidMaxPlayers {
            requested: max_players,
            max: MAX_PLAYERS_LIMIT,
        });
    }

    // Test-mode counters restart at 1 after a reset; walk past taken ids.
    let game = loop {
        let game = Game::new_waiting(
            ids.next(IdKind::Game),
            creator_user_id,
            max_players,
            rules.starting_year,
            now,
        );
        match store.insert_game(&game) {
            Ok(()) => break game,
            Err(err) if err.is_constraint_violation() => {
                debug!(game_id = %game.game_id, "game id already taken");
            }
            Err(err) => return Err(err.into()),
        }
    };
    info!(game_id = %game.game_id, creator = creator_user_id, max_players, "game created");
    Ok(game)
}
