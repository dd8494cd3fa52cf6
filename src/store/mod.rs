//! Durable store: the only shared mutable state of the server.
//!
//! Everything lives in one SQLite database. Writers that race on the same
//! row (joins, tick commits) use conditional updates instead of locks so
//! several server processes can share one database file.

mod rows;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::components::{Game, GameState, PopulationAllocation, Settlement, Unit};
use crate::error::StoreError;
use crate::spatial::WorldMap;

use rows::{clamp_i64, to_millis, AllocationRow, GameRow, MapRow, SettlementRow, UnitRow};

/// Everything the tick processor needs to know about one game, read in a
/// single transaction.
#[derive(Debug, Clone)]
pub struct GameRecords {
    pub game: Game,
    pub map: Option<WorldMap>,
    pub units: Vec<Unit>,
    pub settlements: Vec<Settlement>,
    pub allocations: Vec<PopulationAllocation>,
}

/// Map, units and allocations written together with the start transition.
#[derive(Debug, Clone)]
pub struct WorldSeed {
    pub map: WorldMap,
    pub units: Vec<Unit>,
    pub allocations: Vec<PopulationAllocation>,
}

/// A conditional roster update keyed on the player count the caller saw.
#[derive(Debug, Clone)]
pub struct JoinAttempt<'a> {
    pub game_id: &'a str,
    pub player_id: &'a str,
    pub observed_players: u32,
    pub joined_at: DateTime<Utc>,
    /// Present when this join fills the last seat and starts the game.
    pub seed: Option<&'a WorldSeed>,
}

/// The result of one tick, applied only if the game is still where the
/// processor found it.
#[derive(Debug, Clone)]
pub struct TickCommit {
    pub game_id: String,
    pub expected_year: i64,
    pub expected_last_tick_at: Option<DateTime<Utc>>,
    pub ticked_at: DateTime<Utc>,
    pub units: Vec<Unit>,
    pub removed_units: Vec<String>,
    /// Settlements created this tick; inserted, never merged into existing rows.
    pub founded: Vec<Settlement>,
    /// Settlements that already existed; only their population changes.
    pub settlements: Vec<Settlement>,
    pub allocations: Vec<PopulationAllocation>,
}

#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "opened store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn insert_game(&self, game: &Game) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO games (
                game_id,
                creator_user_id,
                max_players,
                current_players,
                state,
                current_year,
                created_at,
                started_at,
                last_tick_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                game.game_id,
                game.creator_user_id,
                i64::from(game.max_players),
                i64::from(game.current_players),
                game.state.as_str(),
                game.current_year,
                to_millis(game.created_at),
                game.started_at.map(to_millis),
                game.last_tick_at.map(to_millis),
            ],
        )?;
        for (seat, player_id) in game.player_list.iter().enumerate() {
            insert_player(&tx, &game.game_id, player_id, seat)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn game(&self, game_id: &str) -> Result<Option<Game>, StoreError> {
        let conn = self.lock()?;
        load_game(&conn, game_id)
    }

    pub fn games_in_state(&self, state: GameState) -> Result<Vec<Game>, StoreError> {
        let conn = self.lock()?;
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT game_id FROM games WHERE state = ?1 ORDER BY created_at ASC, game_id ASC",
            )?;
            let rows = stmt.query_map(params![state.as_str()], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut games = Vec::with_capacity(ids.len());
        for game_id in ids {
            if let Some(game) = load_game(&conn, &game_id)? {
                games.push(game);
            }
        }
        Ok(games)
    }

    /// Removes a game and everything that belongs to it.
    pub fn delete_game(&self, game_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM games WHERE game_id = ?1", params![game_id])?;
        Ok(removed > 0)
    }

    /// Adds a player if the roster still has `observed_players` entries.
    /// Returns `false` when another join got there first.
    pub fn try_join(&self, attempt: &JoinAttempt<'_>) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let starts = attempt.seed.is_some();
        let next_players = attempt.observed_players + 1;
        let changed = tx.execute(
            "UPDATE games
             SET current_players = ?1,
                 state = ?2,
                 started_at = ?3
             WHERE game_id = ?4
               AND state = 'waiting'
               AND current_players = ?5
               AND current_players < max_players",
            params![
                i64::from(next_players),
                if starts {
                    GameState::Started.as_str()
                } else {
                    GameState::Waiting.as_str()
                },
                starts.then(|| to_millis(attempt.joined_at)),
                attempt.game_id,
                i64::from(attempt.observed_players),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        insert_player(
            &tx,
            attempt.game_id,
            attempt.player_id,
            attempt.observed_players as usize,
        )?;
        if let Some(seed) = attempt.seed {
            write_seed(&tx, attempt.game_id, seed)?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn map(&self, game_id: &str) -> Result<Option<WorldMap>, StoreError> {
        let conn = self.lock()?;
        load_map(&conn, game_id)
    }

    pub fn units_for_game(&self, game_id: &str) -> Result<Vec<Unit>, StoreError> {
        let conn = self.lock()?;
        load_units(&conn, game_id, None)
    }

    pub fn units_for_player(&self, game_id: &str, player_id: &str) -> Result<Vec<Unit>, StoreError> {
        let conn = self.lock()?;
        load_units(&conn, game_id, Some(player_id))
    }

    pub fn settlements_for_game(&self, game_id: &str) -> Result<Vec<Settlement>, StoreError> {
        let conn = self.lock()?;
        load_settlements(&conn, game_id, None)
    }

    pub fn settlements_for_player(
        &self,
        game_id: &str,
        player_id: &str,
    ) -> Result<Vec<Settlement>, StoreError> {
        let conn = self.lock()?;
        load_settlements(&conn, game_id, Some(player_id))
    }

    pub fn allocations_for_game(
        &self,
        game_id: &str,
    ) -> Result<Vec<PopulationAllocation>, StoreError> {
        let conn = self.lock()?;
        load_allocations(&conn, game_id)
    }

    /// Writes a map, units and allocations for a game outside of the join
    /// flow. Used by tooling and tests that build worlds by hand.
    pub fn seed_world(&self, game_id: &str, seed: &WorldSeed) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        write_seed(&tx, game_id, seed)?;
        tx.commit()?;
        Ok(())
    }

    pub fn insert_settlements(&self, settlements: &[Settlement]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for settlement in settlements {
            insert_settlement(&tx, settlement)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_records(&self, game_id: &str) -> Result<Option<GameRecords>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(game) = load_game(&tx, game_id)? else {
            return Ok(None);
        };
        let records = GameRecords {
            map: load_map(&tx, game_id)?,
            units: load_units(&tx, game_id, None)?,
            settlements: load_settlements(&tx, game_id, None)?,
            allocations: load_allocations(&tx, game_id)?,
            game,
        };
        tx.commit()?;
        Ok(Some(records))
    }

    /// Applies a tick if the game still has the year and `last_tick_at` the
    /// processor loaded. Returns `false` (and writes nothing) otherwise.
    pub fn commit_tick(&self, commit: &TickCommit) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let advanced = tx.execute(
            "UPDATE games
             SET current_year = current_year + 1,
                 last_tick_at = ?1
             WHERE game_id = ?2
               AND state = 'started'
               AND current_year = ?3
               AND last_tick_at IS ?4",
            params![
                to_millis(commit.ticked_at),
                commit.game_id,
                commit.expected_year,
                commit.expected_last_tick_at.map(to_millis),
            ],
        )?;
        if advanced == 0 {
            debug!(game_id = %commit.game_id, "tick commit lost compare-and-set");
            return Ok(false);
        }

        for unit in &commit.units {
            tx.execute(
                "UPDATE units
                 SET x = ?1, y = ?2, steps_taken = ?3
                 WHERE game_id = ?4 AND unit_id = ?5",
                params![
                    unit.location.x,
                    unit.location.y,
                    i64::from(unit.steps_taken),
                    commit.game_id,
                    unit.unit_id,
                ],
            )?;
        }
        for unit_id in &commit.removed_units {
            tx.execute(
                "DELETE FROM units WHERE game_id = ?1 AND unit_id = ?2",
                params![commit.game_id, unit_id],
            )?;
        }
        for settlement in &commit.founded {
            insert_settlement(&tx, settlement)?;
        }
        for settlement in &commit.settlements {
            tx.execute(
                "UPDATE settlements SET population = ?1
                 WHERE game_id = ?2 AND settlement_id = ?3",
                params![
                    clamp_i64(settlement.population),
                    commit.game_id,
                    settlement.settlement_id,
                ],
            )?;
        }
        for allocation in &commit.allocations {
            upsert_allocation(&tx, allocation)?;
        }

        tx.commit()?;
        Ok(true)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS games (
            game_id TEXT PRIMARY KEY,
            creator_user_id TEXT NOT NULL,
            max_players INTEGER NOT NULL,
            current_players INTEGER NOT NULL,
            state TEXT NOT NULL,
            current_year INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            last_tick_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS game_players (
            game_id TEXT NOT NULL REFERENCES games(game_id) ON DELETE CASCADE,
            player_id TEXT NOT NULL,
            seat INTEGER NOT NULL,
            PRIMARY KEY (game_id, player_id),
            UNIQUE (game_id, seat)
        );

        CREATE TABLE IF NOT EXISTS game_maps (
            game_id TEXT PRIMARY KEY REFERENCES games(game_id) ON DELETE CASCADE,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            tiles_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS units (
            unit_id TEXT NOT NULL,
            game_id TEXT NOT NULL REFERENCES games(game_id) ON DELETE CASCADE,
            player_id TEXT NOT NULL,
            unit_type TEXT NOT NULL,
            x INTEGER NOT NULL,
            y INTEGER NOT NULL,
            steps_taken INTEGER NOT NULL,
            population_cost INTEGER NOT NULL,
            PRIMARY KEY (game_id, unit_id)
        );

        CREATE TABLE IF NOT EXISTS settlements (
            settlement_id TEXT NOT NULL,
            game_id TEXT NOT NULL REFERENCES games(game_id) ON DELETE CASCADE,
            player_id TEXT NOT NULL,
            x INTEGER NOT NULL,
            y INTEGER NOT NULL,
            settlement_type TEXT NOT NULL,
            name TEXT NOT NULL,
            population INTEGER NOT NULL,
            founded_year INTEGER NOT NULL,
            PRIMARY KEY (game_id, settlement_id)
        );

        CREATE TABLE IF NOT EXISTS population_allocations (
            game_id TEXT NOT NULL REFERENCES games(game_id) ON DELETE CASCADE,
            player_id TEXT NOT NULL,
            total_allocated INTEGER NOT NULL,
            in_units INTEGER NOT NULL,
            in_settlements INTEGER NOT NULL,
            PRIMARY KEY (game_id, player_id)
        );

        CREATE INDEX IF NOT EXISTS idx_games_state ON games(state);
        CREATE INDEX IF NOT EXISTS idx_units_game_player ON units(game_id, player_id);
        CREATE INDEX IF NOT EXISTS idx_settlements_game_player ON settlements(game_id, player_id);
        ",
    )?;
    Ok(())
}

fn insert_player(
    tx: &Transaction<'_>,
    game_id: &str,
    player_id: &str,
    seat: usize,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO game_players (game_id, player_id, seat) VALUES (?1, ?2, ?3)",
        params![game_id, player_id, clamp_i64(seat as u64)],
    )?;
    Ok(())
}

fn write_seed(tx: &Transaction<'_>, game_id: &str, seed: &WorldSeed) -> Result<(), StoreError> {
    let tiles_json = serde_json::to_string(seed.map.tiles())?;
    tx.execute(
        "INSERT INTO game_maps (game_id, width, height, tiles_json)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(game_id) DO UPDATE SET
            width = excluded.width,
            height = excluded.height,
            tiles_json = excluded.tiles_json",
        params![
            game_id,
            i64::from(seed.map.width()),
            i64::from(seed.map.height()),
            tiles_json,
        ],
    )?;
    for unit in &seed.units {
        tx.execute(
            "INSERT INTO units (
                unit_id,
                game_id,
                player_id,
                unit_type,
                x,
                y,
                steps_taken,
                population_cost
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                unit.unit_id,
                unit.game_id,
                unit.player_id,
                unit.unit_type.as_str(),
                unit.location.x,
                unit.location.y,
                i64::from(unit.steps_taken),
                clamp_i64(unit.population_cost),
            ],
        )?;
    }
    for allocation in &seed.allocations {
        upsert_allocation(tx, allocation)?;
    }
    Ok(())
}

fn insert_settlement(tx: &Transaction<'_>, settlement: &Settlement) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO settlements (
            settlement_id,
            game_id,
            player_id,
            x,
            y,
            settlement_type,
            name,
            population,
            founded_year
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            settlement.settlement_id,
            settlement.game_id,
            settlement.player_id,
            settlement.location.x,
            settlement.location.y,
            settlement.settlement_type.as_str(),
            settlement.name,
            clamp_i64(settlement.population),
            settlement.founded_year,
        ],
    )?;
    Ok(())
}

fn upsert_allocation(
    tx: &Transaction<'_>,
    allocation: &PopulationAllocation,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO population_allocations (
            game_id,
            player_id,
            total_allocated,
            in_units,
            in_settlements
         ) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(game_id, player_id) DO UPDATE SET
            total_allocated = excluded.total_allocated,
            in_units = excluded.in_units,
            in_settlements = excluded.in_settlements",
        params![
            allocation.game_id,
            allocation.player_id,
            clamp_i64(allocation.total_allocated),
            clamp_i64(allocation.in_units),
            clamp_i64(allocation.in_settlements),
        ],
    )?;
    Ok(())
}

fn load_game(conn: &Connection, game_id: &str) -> Result<Option<Game>, StoreError> {
    let row = conn
        .query_row(
            "SELECT
                game_id,
                creator_user_id,
                max_players,
                current_players,
                state,
                current_year,
                created_at,
                started_at,
                last_tick_at
             FROM games
             WHERE game_id = ?1",
            params![game_id],
            GameRow::from_row,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let players = {
        let mut stmt = conn.prepare(
            "SELECT player_id FROM game_players WHERE game_id = ?1 ORDER BY seat ASC",
        )?;
        let rows = stmt.query_map(params![game_id], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    row.into_game(players).map(Some)
}

fn load_map(conn: &Connection, game_id: &str) -> Result<Option<WorldMap>, StoreError> {
    let row = conn
        .query_row(
            "SELECT width, height, tiles_json FROM game_maps WHERE game_id = ?1",
            params![game_id],
            MapRow::from_row,
        )
        .optional()?;
    row.map(MapRow::into_map).transpose()
}

fn load_units(
    conn: &Connection,
    game_id: &str,
    player_id: Option<&str>,
) -> Result<Vec<Unit>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT unit_id, game_id, player_id, unit_type, x, y, steps_taken, population_cost
         FROM units
         WHERE game_id = ?1 AND (?2 IS NULL OR player_id = ?2)
         ORDER BY unit_id ASC",
    )?;
    let rows = stmt.query_map(params![game_id, player_id], UnitRow::from_row)?;
    let mut units = Vec::new();
    for row in rows {
        units.push(row?.into_unit()?);
    }
    Ok(units)
}

fn load_settlements(
    conn: &Connection,
    game_id: &str,
    player_id: Option<&str>,
) -> Result<Vec<Settlement>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT settlement_id, game_id, player_id, x, y, settlement_type, name, population, founded_year
         FROM settlements
         WHERE game_id = ?1 AND (?2 IS NULL OR player_id = ?2)
         ORDER BY settlement_id ASC",
    )?;
    let rows = stmt.query_map(params![game_id, player_id], SettlementRow::from_row)?;
    let mut settlements = Vec::new();
    for row in rows {
        settlements.push(row?.into_settlement()?);
    }
    Ok(settlements)
}

fn load_allocations(
    conn: &Connection,
    game_id: &str,
) -> Result<Vec<PopulationAllocation>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT game_id, player_id, total_allocated, in_units, in_settlements
         FROM population_allocations
         WHERE game_id = ?1
         ORDER BY player_id ASC",
    )?;
    let rows = stmt.query_map(params![game_id], AllocationRow::from_row)?;
    let mut allocations = Vec::new();
    for row in rows {
        allocations.push(row?.into_allocation()?);
    }
    Ok(allocations)
}
