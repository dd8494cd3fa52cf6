use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spatial::TilePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Waiting,
    Started,
}

impl GameState {
    pub fn as_str(self) -> &'static str {
        match self {
            GameState::Waiting => "waiting",
            GameState::Started => "started",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(GameState::Waiting),
            "started" => Some(GameState::Started),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub creator_user_id: String,
    pub max_players: u32,
    pub current_players: u32,
    pub player_list: Vec<String>,
    pub state: GameState,
    pub current_year: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl Game {
    pub fn new_waiting(
        game_id: impl Into<String>,
        creator_user_id: impl Into<String>,
        max_players: u32,
        starting_year: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            creator_user_id: creator_user_id.into(),
            max_players,
            current_players: 0,
            player_list: Vec::new(),
            state: GameState::Waiting,
            current_year: starting_year,
            created_at,
            started_at: None,
            last_tick_at: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player_list.iter().any(|p| p == player_id)
    }

    /// Reference point for the next tick: the last tick, or the start.
    pub fn tick_anchor(&self) -> Option<DateTime<Utc>> {
        self.last_tick_at.or(self.started_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Settlers,
}

impl UnitType {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitType::Settlers => "settlers",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "settlers" => Some(UnitType::Settlers),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub unit_id: String,
    pub game_id: String,
    pub player_id: String,
    pub unit_type: UnitType,
    pub location: TilePos,
    pub steps_taken: u32,
    pub population_cost: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementType {
    NomadicCamp,
}

impl SettlementType {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementType::NomadicCamp => "nomadic_camp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "nomadic_camp" => Some(SettlementType::NomadicCamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: String,
    pub game_id: String,
    pub player_id: String,
    pub location: TilePos,
    pub settlement_type: SettlementType,
    pub name: String,
    pub population: u64,
    pub founded_year: i64,
}

/// Where a player's population currently lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationAllocation {
    pub game_id: String,
    pub player_id: String,
    pub total_allocated: u64,
    pub in_units: u64,
    pub in_settlements: u64,
}

impl PopulationAllocation {
    pub fn empty(game_id: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            player_id: player_id.into(),
            total_allocated: 0,
            in_units: 0,
            in_settlements: 0,
        }
    }

    pub fn allocate_to_unit(&mut self, amount: u64) {
        self.total_allocated += amount;
        self.in_units += amount;
    }

    /// Moves population out of a unit into a settlement; the total is unchanged.
    pub fn settle(&mut self, amount: u64) {
        let moved = amount.min(self.in_units);
        self.in_units -= moved;
        self.in_settlements += moved;
    }

    pub fn record_growth(&mut self, amount: u64) {
        self.total_allocated += amount;
        self.in_settlements += amount;
    }

    pub fn is_balanced(&self) -> bool {
        self.in_units + self.in_settlements == self.total_allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_moves_population_without_changing_total() {
        let mut allocation = PopulationAllocation::empty("g", "p");
        allocation.allocate_to_unit(100);
        allocation.allocate_to_unit(50);
        allocation.settle(100);

        assert_eq!(allocation.total_allocated, 150);
        assert_eq!(allocation.in_units, 50);
        assert_eq!(allocation.in_settlements, 100);
        assert!(allocation.is_balanced());

        allocation.record_growth(3);
        assert_eq!(allocation.total_allocated, 153);
        assert!(allocation.is_balanced());
    }

    #[test]
    fn enum_names_round_trip_through_store_strings() {
        assert_eq!(GameState::parse(GameState::Started.as_str()), Some(GameState::Started));
        assert_eq!(UnitType::parse("settlers"), Some(UnitType::Settlers));
        assert_eq!(SettlementType::parse("nomadic_camp"), Some(SettlementType::NomadicCamp));
        assert_eq!(GameState::parse("finished"), None);
    }
}
