use anyhow::Result;
use rand::{Rng, RngCore};
use tracing::{trace, warn};

use crate::{
    components::Unit,
    engine::{System, SystemContext},
    rng::SystemRng,
    spatial::{TilePos, WorldMap},
    world::GameWorld,
};

/// Picks where a wandering unit goes next. The result is clamped onto the
/// map by the caller.
pub trait MovementStrategy: Send {
    fn name(&self) -> &str;
    fn next_position(&self, unit: &Unit, map: &WorldMap, rng: &mut dyn RngCore) -> TilePos;
}

/// One tile north, east, south or west with equal probability.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomWalk;

const CARDINALS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

impl MovementStrategy for RandomWalk {
    fn name(&self) -> &str {
        "random_walk"
    }

    fn next_position(&self, unit: &Unit, _map: &WorldMap, rng: &mut dyn RngCore) -> TilePos {
        let (dx, dy) = CARDINALS[rng.gen_range(0..CARDINALS.len())];
        unit.location.offset(dx, dy)
    }
}

pub struct MovementSystem<S> {
    strategy: S,
}

impl<S: MovementStrategy> MovementSystem<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }
}

impl<S: MovementStrategy> System for MovementSystem<S> {
    fn name(&self) -> &str {
        "movement"
    }

    fn run(
        &mut self,
        ctx: &SystemContext<'_>,
        world: &mut GameWorld,
        rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let threshold = ctx.rules.founding_steps;
        for unit_id in world.unit_ids() {
            let Some(unit) = world.units.get(&unit_id) else {
                continue;
            };
            if unit.steps_taken >= threshold {
                if unit.steps_taken > threshold {
                    warn!(
                        unit_id = %unit.unit_id,
                        steps = unit.steps_taken,
                        threshold,
                        "unit walked past the founding threshold; holding position"
                    );
                }
                continue;
            }

            let proposed = self.strategy.next_position(unit, world.map(), &mut *rng);
            let next = world.map().clamp(proposed);
            trace!(
                unit_id = %unit.unit_id,
                strategy = self.strategy.name(),
                from = ?unit.location,
                to = ?next,
                "unit moved"
            );
            if let Some(unit) = world.units.get_mut(&unit_id) {
                unit.location = next;
                unit.steps_taken += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Game, GameState, UnitType};
    use crate::config::SimulationRules;
    use crate::ids::IdAllocator;
    use crate::rng::RngManager;
    use crate::spatial::Terrain;
    use crate::store::GameRecords;
    use chrono::Utc;

    /// Always heads for the top-left corner.
    struct NorthWest;

    impl MovementStrategy for NorthWest {
        fn name(&self) -> &str {
            "north_west"
        }

        fn next_position(&self, unit: &Unit, _map: &WorldMap, _rng: &mut dyn RngCore) -> TilePos {
            unit.location.offset(-1, -1)
        }
    }

    fn world_with_unit(location: TilePos, steps_taken: u32) -> GameWorld {
        let mut game = Game::new_waiting("game-1", "creator", 1, -4000, Utc::now());
        game.state = GameState::Started;
        GameWorld::from_records(GameRecords {
            game,
            map: Some(WorldMap::filled(4, 4, Terrain::Plains)),
            units: vec![Unit {
                unit_id: "unit-1".into(),
                game_id: "game-1".into(),
                player_id: "alice".into(),
                unit_type: UnitType::Settlers,
                location,
                steps_taken,
                population_cost: 100,
            }],
            settlements: Vec::new(),
            allocations: Vec::new(),
        })
        .unwrap()
    }

    fn run(system: &mut impl System, world: &mut GameWorld) {
        let rules = SimulationRules::default();
        let ids = IdAllocator::sequential();
        let ctx = SystemContext {
            year: world.year(),
            now: Utc::now(),
            rules: &rules,
            ids: &ids,
        };
        let mut rng = RngManager::new(11);
        let mut stream = rng.stream("movement");
        system.run(&ctx, world, &mut stream).unwrap();
    }

    #[test]
    fn random_walk_moves_one_cardinal_step() {
        let mut rng = RngManager::new(3);
        let mut stream = rng.stream("walk");
        let map = WorldMap::filled(8, 8, Terrain::Plains);
        let world = world_with_unit(TilePos::new(4, 4), 0);
        let unit = world.unit("unit-1").unwrap();
        for _ in 0..50 {
            let next = RandomWalk.next_position(unit, &map, &mut stream);
            let distance = (next.x - 4).abs() + (next.y - 4).abs();
            assert_eq!(distance, 1);
        }
    }

    #[test]
    fn edges_stop_movement() {
        let mut world = world_with_unit(TilePos::new(0, 0), 0);
        run(&mut MovementSystem::new(NorthWest), &mut world);

        let unit = world.unit("unit-1").unwrap();
        assert_eq!(unit.location, TilePos::new(0, 0));
        assert_eq!(unit.steps_taken, 1);
    }

    #[test]
    fn units_at_threshold_hold_position() {
        let mut world = world_with_unit(TilePos::new(2, 2), 3);
        run(&mut MovementSystem::new(NorthWest), &mut world);

        let unit = world.unit("unit-1").unwrap();
        assert_eq!(unit.location, TilePos::new(2, 2));
        assert_eq!(unit.steps_taken, 3);
    }
}
