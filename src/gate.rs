//! Concurrency gate for joins.
//!
//! A join is a compare-and-set on the player count the caller read. The
//! join that takes the last seat also flips the game to `started` and
//! writes the seeded world in the same transaction, so a game starts
//! exactly once no matter how many joins race for it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    components::{Game, GameState},
    config::SimulationRules,
    error::JoinError,
    ids::IdAllocator,
    rng::RngManager,
    store::{JoinAttempt, Store},
    worldgen,
};

pub const MAX_JOIN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub game: Game,
    /// True when this join filled the last seat and started the game.
    pub started: bool,
}

pub fn join_game(
    store: &Store,
    ids: &IdAllocator,
    rules: &SimulationRules,
    game_id: &str,
    player_id: &str,
    now: DateTime<Utc>,
) -> Result<JoinOutcome, JoinError> {
    for attempt in 1..=MAX_JOIN_ATTEMPTS {
        let game = load(store, game_id)?;
        check_admissible(&game, player_id)?;

        let fills_last_seat = game.current_players + 1 >= game.max_players;
        let seed = fills_last_seat.then(|| {
            let mut roster = game.player_list.clone();
            roster.push(player_id.to_string());
            let mut rng = RngManager::for_tick(rules.seed, game_id, game.current_year);
            worldgen::seed_players(game_id, &roster, rules, ids, &mut rng.stream("worldgen"))
        });

        let join = JoinAttempt {
            game_id,
            player_id,
            observed_players: game.current_players,
            joined_at: now,
            seed: seed.as_ref(),
        };
        match store.try_join(&join) {
            Ok(true) => {
                let game = load(store, game_id)?;
                let started = fills_last_seat && game.state == GameState::Started;
                info!(
                    game_id,
                    player_id,
                    players = game.current_players,
                    max_players = game.max_players,
                    started,
                    "player joined"
                );
                return Ok(JoinOutcome { game, started });
            }
            Ok(false) => {
                debug!(game_id, player_id, attempt, "join lost compare-and-set");
            }
            Err(err) if err.is_constraint_violation() => {
                debug!(game_id, player_id, attempt, "roster insert collided");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let game = load(store, game_id)?;
    check_admissible(&game, player_id)?;
    warn!(
        game_id,
        player_id,
        attempts = MAX_JOIN_ATTEMPTS,
        "join kept losing to concurrent writers"
    );
    Err(JoinError::Contention(game_id.to_string()))
}

fn load(store: &Store, game_id: &str) -> Result<Game, JoinError> {
    store
        .game(game_id)?
        .ok_or_else(|| JoinError::GameNotFound(game_id.to_string()))
}

fn check_admissible(game: &Game, player_id: &str) -> Result<(), JoinError> {
    if game.has_player(player_id) {
        return Err(JoinError::AlreadyJoined {
            game_id: game.game_id.clone(),
            player_id: player_id.to_string(),
        });
    }
    if game.is_full() {
        return Err(JoinError::GameFull(game.game_id.clone()));
    }
    if game.state != GameState::Waiting {
        return Err(JoinError::AlreadyStarted(game.game_id.clone()));
    }
    Ok(())
}
