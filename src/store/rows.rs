use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::components::{
    Game, GameState, PopulationAllocation, Settlement, SettlementType, Unit, UnitType,
};
use crate::error::StoreError;
use crate::spatial::{Terrain, TilePos, WorldMap};

pub(super) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(super) fn from_millis(table: &'static str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        table,
        detail: format!("timestamp out of range: {millis}"),
    })
}

fn optional_time(
    table: &'static str,
    value: Option<i64>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|millis| from_millis(table, millis)).transpose()
}

pub(super) fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn non_negative<T: TryFrom<i64>>(table: &'static str, column: &str, value: i64) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        detail: format!("{column} out of range: {value}"),
    })
}

pub(super) struct GameRow {
    game_id: String,
    creator_user_id: String,
    max_players: i64,
    current_players: i64,
    state: String,
    current_year: i64,
    created_at: i64,
    started_at: Option<i64>,
    last_tick_at: Option<i64>,
}

impl GameRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            game_id: row.get(0)?,
            creator_user_id: row.get(1)?,
            max_players: row.get(2)?,
            current_players: row.get(3)?,
            state: row.get(4)?,
            current_year: row.get(5)?,
            created_at: row.get(6)?,
            started_at: row.get(7)?,
            last_tick_at: row.get(8)?,
        })
    }

    pub(super) fn into_game(self, player_list: Vec<String>) -> Result<Game, StoreError> {
        const TABLE: &str = "games";
        let state = GameState::parse(&self.state).ok_or_else(|| StoreError::Corrupt {
            table: TABLE,
            detail: format!("unknown state '{}' for {}", self.state, self.game_id),
        })?;
        Ok(Game {
            max_players: non_negative(TABLE, "max_players", self.max_players)?,
            current_players: non_negative(TABLE, "current_players", self.current_players)?,
            state,
            current_year: self.current_year,
            created_at: from_millis(TABLE, self.created_at)?,
            started_at: optional_time(TABLE, self.started_at)?,
            last_tick_at: optional_time(TABLE, self.last_tick_at)?,
            player_list,
            creator_user_id: self.creator_user_id,
            game_id: self.game_id,
        })
    }
}

pub(super) struct MapRow {
    width: i64,
    height: i64,
    tiles_json: String,
}

impl MapRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            width: row.get(0)?,
            height: row.get(1)?,
            tiles_json: row.get(2)?,
        })
    }

    pub(super) fn into_map(self) -> Result<WorldMap, StoreError> {
        const TABLE: &str = "game_maps";
        let width: u32 = non_negative(TABLE, "width", self.width)?;
        let height: u32 = non_negative(TABLE, "height", self.height)?;
        let tiles: Vec<Terrain> = serde_json::from_str(&self.tiles_json)?;
        WorldMap::from_tiles(width, height, tiles).ok_or_else(|| StoreError::Corrupt {
            table: TABLE,
            detail: format!("tile count does not match {width}x{height}"),
        })
    }
}

pub(super) struct UnitRow {
    unit_id: String,
    game_id: String,
    player_id: String,
    unit_type: String,
    x: i32,
    y: i32,
    steps_taken: i64,
    population_cost: i64,
}

impl UnitRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            unit_id: row.get(0)?,
            game_id: row.get(1)?,
            player_id: row.get(2)?,
            unit_type: row.get(3)?,
            x: row.get(4)?,
            y: row.get(5)?,
            steps_taken: row.get(6)?,
            population_cost: row.get(7)?,
        })
    }

    pub(super) fn into_unit(self) -> Result<Unit, StoreError> {
        const TABLE: &str = "units";
        let unit_type = UnitType::parse(&self.unit_type).ok_or_else(|| StoreError::Corrupt {
            table: TABLE,
            detail: format!("unknown unit type '{}' for {}", self.unit_type, self.unit_id),
        })?;
        Ok(Unit {
            unit_type,
            location: TilePos::new(self.x, self.y),
            steps_taken: non_negative(TABLE, "steps_taken", self.steps_taken)?,
            population_cost: non_negative(TABLE, "population_cost", self.population_cost)?,
            unit_id: self.unit_id,
            game_id: self.game_id,
            player_id: self.player_id,
        })
    }
}

pub(super) struct SettlementRow {
    settlement_id: String,
    game_id: String,
    player_id: String,
    x: i32,
    y: i32,
    settlement_type: String,
    name: String,
    population: i64,
    founded_year: i64,
}

impl SettlementRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            settlement_id: row.get(0)?,
            game_id: row.get(1)?,
            player_id: row.get(2)?,
            x: row.get(3)?,
            y: row.get(4)?,
            settlement_type: row.get(5)?,
            name: row.get(6)?,
            population: row.get(7)?,
            founded_year: row.get(8)?,
        })
    }

    pub(super) fn into_settlement(self) -> Result<Settlement, StoreError> {
        const TABLE: &str = "settlements";
        let settlement_type =
            SettlementType::parse(&self.settlement_type).ok_or_else(|| StoreError::Corrupt {
                table: TABLE,
                detail: format!(
                    "unknown settlement type '{}' for {}",
                    self.settlement_type, self.settlement_id
                ),
            })?;
        Ok(Settlement {
            settlement_type,
            location: TilePos::new(self.x, self.y),
            population: non_negative(TABLE, "population", self.population)?,
            founded_year: self.founded_year,
            settlement_id: self.settlement_id,
            game_id: self.game_id,
            player_id: self.player_id,
            name: self.name,
        })
    }
}

pub(super) struct AllocationRow {
    game_id: String,
    player_id: String,
    total_allocated: i64,
    in_units: i64,
    in_settlements: i64,
}

impl AllocationRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            game_id: row.get(0)?,
            player_id: row.get(1)?,
            total_allocated: row.get(2)?,
            in_units: row.get(3)?,
            in_settlements: row.get(4)?,
        })
    }

    pub(super) fn into_allocation(self) -> Result<PopulationAllocation, StoreError> {
        const TABLE: &str = "population_allocations";
        Ok(PopulationAllocation {
            total_allocated: non_negative(TABLE, "total_allocated", self.total_allocated)?,
            in_units: non_negative(TABLE, "in_units", self.in_units)?,
            in_settlements: non_negative(TABLE, "in_settlements", self.in_settlements)?,
            game_id: self.game_id,
            player_id: self.player_id,
        })
    }
}
