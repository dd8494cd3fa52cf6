use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::components::{Game, PopulationAllocation, Settlement, Unit};
use crate::error::StoreError;
use crate::spatial::WorldMap;
use crate::store::{GameRecords, TickCommit};

/// A broken accounting or placement rule found after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub message: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invariant violation: {}", self.message)
    }
}

/// Per-player totals used by the conservation checks and the tick summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPopulation {
    pub in_units: u64,
    pub in_settlements: u64,
}

impl PlayerPopulation {
    pub fn total(&self) -> u64 {
        self.in_units + self.in_settlements
    }
}

/// One game loaded into memory for the duration of a tick. Systems mutate
/// it freely; nothing reaches the store until [`GameWorld::into_commit`].
pub struct GameWorld {
    game: Game,
    map: WorldMap,
    pub(crate) units: BTreeMap<String, Unit>,
    pub(crate) settlements: BTreeMap<String, Settlement>,
    allocations: BTreeMap<String, PopulationAllocation>,
    removed_units: Vec<String>,
    founded: Vec<String>,
}

impl GameWorld {
    pub fn from_records(records: GameRecords) -> Result<Self, StoreError> {
        let GameRecords {
            game,
            map,
            units,
            settlements,
            allocations,
        } = records;
        let map = map.ok_or_else(|| StoreError::Corrupt {
            table: "game_maps",
            detail: format!("started game {} has no map", game.game_id),
        })?;

        let mut world = Self {
            map,
            units: units.into_iter().map(|u| (u.unit_id.clone(), u)).collect(),
            settlements: settlements
                .into_iter()
                .map(|s| (s.settlement_id.clone(), s))
                .collect(),
            allocations: allocations
                .into_iter()
                .map(|a| (a.player_id.clone(), a))
                .collect(),
            removed_units: Vec::new(),
            founded: Vec::new(),
            game,
        };
        world.reconcile_allocations();
        Ok(world)
    }

    /// Rebuilds allocation records that are missing or disagree with the
    /// units and settlements actually stored.
    fn reconcile_allocations(&mut self) {
        let mut held = self.population_by_player();
        for player_id in self.allocations.keys() {
            held.entry(player_id.clone()).or_default();
        }
        for (player_id, actual) in held {
            let allocation = self
                .allocations
                .entry(player_id.clone())
                .or_insert_with(|| PopulationAllocation::empty(&self.game.game_id, &player_id));
            if allocation.in_units != actual.in_units
                || allocation.in_settlements != actual.in_settlements
                || !allocation.is_balanced()
            {
                warn!(
                    game_id = %self.game.game_id,
                    player_id = %player_id,
                    recorded_units = allocation.in_units,
                    recorded_settlements = allocation.in_settlements,
                    actual_units = actual.in_units,
                    actual_settlements = actual.in_settlements,
                    "population allocation out of sync; rebuilding from records"
                );
                allocation.in_units = actual.in_units;
                allocation.in_settlements = actual.in_settlements;
                allocation.total_allocated = actual.total();
            }
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_id(&self) -> &str {
        &self.game.game_id
    }

    pub fn year(&self) -> i64 {
        self.game.current_year
    }

    pub fn map(&self) -> &WorldMap {
        &self.map
    }

    pub fn unit_ids(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn settlement_ids(&self) -> Vec<String> {
        self.settlements.keys().cloned().collect()
    }

    pub fn unit(&self, unit_id: &str) -> Option<&Unit> {
        self.units.get(unit_id)
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn settlement(&self, settlement_id: &str) -> Option<&Settlement> {
        self.settlements.get(settlement_id)
    }

    pub fn settlements(&self) -> impl Iterator<Item = &Settlement> {
        self.settlements.values()
    }

    pub fn allocation(&self, player_id: &str) -> Option<&PopulationAllocation> {
        self.allocations.get(player_id)
    }

    pub fn founded_this_tick(&self, settlement_id: &str) -> bool {
        self.founded.iter().any(|id| id == settlement_id)
    }

    pub fn founded_count(&self) -> usize {
        self.founded.len()
    }

    /// Replaces a unit with a settlement and moves the unit's population
    /// into it. Returns the removed unit, or `None` without touching the
    /// world if the unit is unknown or the settlement id is already in use.
    pub fn found_settlement(&mut self, unit_id: &str, settlement: Settlement) -> Option<Unit> {
        if self.settlements.contains_key(&settlement.settlement_id) {
            return None;
        }
        let unit = self.units.remove(unit_id)?;
        let allocation = self
            .allocations
            .entry(unit.player_id.clone())
            .or_insert_with(|| PopulationAllocation::empty(&unit.game_id, &unit.player_id));
        allocation.settle(unit.population_cost);

        self.removed_units.push(unit.unit_id.clone());
        self.founded.push(settlement.settlement_id.clone());
        self.settlements
            .insert(settlement.settlement_id.clone(), settlement);
        Some(unit)
    }

    pub fn grow_settlement(&mut self, settlement_id: &str, amount: u64) {
        let Some(settlement) = self.settlements.get_mut(settlement_id) else {
            return;
        };
        settlement.population += amount;
        if let Some(allocation) = self.allocations.get_mut(&settlement.player_id) {
            allocation.record_growth(amount);
        }
    }

    pub fn population_by_player(&self) -> BTreeMap<String, PlayerPopulation> {
        let mut totals: BTreeMap<String, PlayerPopulation> = BTreeMap::new();
        for unit in self.units.values() {
            totals.entry(unit.player_id.clone()).or_default().in_units += unit.population_cost;
        }
        for settlement in self.settlements.values() {
            totals
                .entry(settlement.player_id.clone())
                .or_default()
                .in_settlements += settlement.population;
        }
        totals
    }

    pub fn check_invariants(&self, founding_steps: u32) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for unit in self.units.values() {
            if !self.map.contains(unit.location) {
                violations.push(InvariantViolation {
                    message: format!("unit {} is off the map at {:?}", unit.unit_id, unit.location),
                });
            }
            if unit.steps_taken >= founding_steps {
                violations.push(InvariantViolation {
                    message: format!(
                        "unit {} still wandering with {} steps",
                        unit.unit_id, unit.steps_taken
                    ),
                });
            }
        }

        let actual = self.population_by_player();
        for (player_id, allocation) in &self.allocations {
            let held = actual.get(player_id).cloned().unwrap_or_default();
            if held.in_units != allocation.in_units
                || held.in_settlements != allocation.in_settlements
                || !allocation.is_balanced()
            {
                violations.push(InvariantViolation {
                    message: format!(
                        "player {player_id} holds {held:?} but allocation records {allocation:?}"
                    ),
                });
            }
        }

        violations
    }

    pub fn into_commit(self, ticked_at: DateTime<Utc>) -> TickCommit {
        let (founded, settlements): (Vec<Settlement>, Vec<Settlement>) = self
            .settlements
            .into_values()
            .partition(|s| self.founded.contains(&s.settlement_id));
        TickCommit {
            game_id: self.game.game_id,
            expected_year: self.game.current_year,
            expected_last_tick_at: self.game.last_tick_at,
            ticked_at,
            units: self.units.into_values().collect(),
            removed_units: self.removed_units,
            founded,
            settlements,
            allocations: self.allocations.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{GameState, SettlementType, UnitType};
    use crate::spatial::{Terrain, TilePos};

    fn records(allocations: Vec<PopulationAllocation>) -> GameRecords {
        let mut game = Game::new_waiting("game-1", "creator", 1, -4000, Utc::now());
        game.state = GameState::Started;
        GameRecords {
            game,
            map: Some(WorldMap::filled(5, 5, Terrain::Plains)),
            units: vec![Unit {
                unit_id: "unit-1".into(),
                game_id: "game-1".into(),
                player_id: "alice".into(),
                unit_type: UnitType::Settlers,
                location: TilePos::new(2, 2),
                steps_taken: 1,
                population_cost: 80,
            }],
            settlements: Vec::new(),
            allocations,
        }
    }

    fn camp(id: &str) -> Settlement {
        Settlement {
            settlement_id: id.into(),
            game_id: "game-1".into(),
            player_id: "alice".into(),
            location: TilePos::new(2, 2),
            settlement_type: SettlementType::NomadicCamp,
            name: "Camp".into(),
            population: 80,
            founded_year: -4000,
        }
    }

    #[test]
    fn missing_allocation_is_rebuilt() {
        let world = GameWorld::from_records(records(Vec::new())).unwrap();
        let allocation = world.allocation("alice").expect("rebuilt");
        assert_eq!(allocation.in_units, 80);
        assert_eq!(allocation.total_allocated, 80);
        assert!(world.check_invariants(3).is_empty());
    }

    #[test]
    fn founding_transfers_population() {
        let mut world = GameWorld::from_records(records(Vec::new())).unwrap();
        let before = world.population_by_player()["alice"].total();

        let removed = world.found_settlement("unit-1", camp("settlement-1"));
        assert!(removed.is_some());
        assert!(world.unit("unit-1").is_none());
        assert!(world.founded_this_tick("settlement-1"));

        let after = world.population_by_player();
        assert_eq!(after["alice"].total(), before);
        assert_eq!(after["alice"].in_units, 0);
        assert!(world.check_invariants(3).is_empty());

        let commit = world.into_commit(Utc::now());
        assert_eq!(commit.removed_units, vec!["unit-1".to_string()]);
        assert_eq!(commit.founded.len(), 1);
        assert!(commit.settlements.is_empty());
        assert!(commit.units.is_empty());
    }

    #[test]
    fn founding_never_replaces_an_existing_camp() {
        let mut records = records(Vec::new());
        records.settlements.push(camp("settlement-1"));
        let mut world = GameWorld::from_records(records).unwrap();

        let mut duplicate = camp("settlement-1");
        duplicate.population = 5;
        assert!(world.found_settlement("unit-1", duplicate).is_none());

        assert!(world.unit("unit-1").is_some());
        assert_eq!(world.settlement("settlement-1").unwrap().population, 80);
        assert_eq!(world.founded_count(), 0);
        assert!(world.check_invariants(3).is_empty());
    }

    #[test]
    fn stale_allocation_without_holdings_is_rebuilt() {
        let mut stale = PopulationAllocation::empty("game-1", "bob");
        stale.in_units = 50;
        stale.total_allocated = 50;
        let world = GameWorld::from_records(records(vec![stale])).unwrap();

        let bob = world.allocation("bob").expect("kept");
        assert_eq!(bob.in_units, 0);
        assert_eq!(bob.total_allocated, 0);
        assert!(world.check_invariants(3).is_empty());
    }

    #[test]
    fn founding_unknown_unit_changes_nothing() {
        let mut world = GameWorld::from_records(records(Vec::new())).unwrap();
        assert!(world.found_settlement("unit-9", camp("settlement-1")).is_none());
        assert_eq!(world.founded_count(), 0);
        assert!(world.settlement("settlement-1").is_none());
    }

    #[test]
    fn missing_map_is_reported() {
        let mut records = records(Vec::new());
        records.map = None;
        assert!(GameWorld::from_records(records).is_err());
    }
}
