//! World tick processor.
//!
//! A tick loads one game into a [`GameWorld`], runs the registered systems
//! in order and commits the result in one conditional store write.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    components::GameState,
    config::SimulationRules,
    error::TickError,
    ids::IdAllocator,
    rng::{RngManager, SystemRng},
    store::Store,
    systems::{FoundingSystem, GrowthSystem, MovementSystem, RandomWalk},
    world::{GameWorld, PlayerPopulation},
};

pub type SharedEngine = Arc<Mutex<Engine>>;

pub struct SystemContext<'a> {
    /// Year being simulated; the game moves to `year + 1` when the tick commits.
    pub year: i64,
    pub now: DateTime<Utc>,
    pub rules: &'a SimulationRules,
    pub ids: &'a IdAllocator,
}

pub trait System: Send {
    fn name(&self) -> &str;
    fn run(
        &mut self,
        ctx: &SystemContext<'_>,
        world: &mut GameWorld,
        rng: &mut SystemRng<'_>,
    ) -> Result<()>;
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemRunReport {
    pub name: String,
    pub duration_ms: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TickSummary {
    pub game_id: String,
    /// Year the game is in after this tick.
    pub year: i64,
    pub ticked_at: DateTime<Utc>,
    pub units_remaining: usize,
    pub settlements: usize,
    pub founded: usize,
    pub population: BTreeMap<String, PlayerPopulation>,
    pub system_reports: Vec<SystemRunReport>,
}

pub struct EngineBuilder {
    store: Arc<Store>,
    ids: Arc<IdAllocator>,
    rules: SimulationRules,
    systems: Vec<Box<dyn System>>,
}

impl EngineBuilder {
    pub fn new(store: Arc<Store>, ids: Arc<IdAllocator>, rules: SimulationRules) -> Self {
        Self {
            store,
            ids,
            rules,
            systems: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    /// Movement, then founding, then growth.
    pub fn with_default_systems(self) -> Self {
        self.with_system(MovementSystem::new(RandomWalk))
            .with_system(FoundingSystem::new())
            .with_system(GrowthSystem::new())
    }

    pub fn build(self) -> Engine {
        Engine {
            store: self.store,
            ids: self.ids,
            rules: self.rules,
            systems: self.systems,
        }
    }

    pub fn build_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self.build()))
    }
}

pub struct Engine {
    store: Arc<Store>,
    ids: Arc<IdAllocator>,
    rules: SimulationRules,
    systems: Vec<Box<dyn System>>,
}

impl Engine {
    /// Advances one started game by exactly one year.
    ///
    /// Does not look at wall-clock eligibility; the scheduler decides when
    /// to call this. The commit still fails with [`TickError::Conflict`] if
    /// the game moved on after it was loaded.
    pub fn tick_game(
        &mut self,
        game_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TickSummary, TickError> {
        let records = self
            .store
            .load_records(game_id)?
            .ok_or_else(|| TickError::GameVanished(game_id.to_string()))?;
        if records.game.state != GameState::Started {
            return Err(TickError::NotStarted(game_id.to_string()));
        }

        let mut world = GameWorld::from_records(records)?;
        let year = world.year();
        let mut rng = RngManager::for_tick(self.rules.seed, game_id, year);
        let ctx = SystemContext {
            year,
            now,
            rules: &self.rules,
            ids: &self.ids,
        };

        let mut system_reports = Vec::with_capacity(self.systems.len());
        for system in &mut self.systems {
            let start = Instant::now();
            let mut stream = rng.stream(system.name());
            system
                .run(&ctx, &mut world, &mut stream)
                .map_err(|cause| TickError::System {
                    system: system.name().to_string(),
                    cause,
                })?;
            system_reports.push(SystemRunReport {
                name: system.name().to_string(),
                duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
            });
        }

        for violation in world.check_invariants(self.rules.founding_steps) {
            warn!(game_id, year, %violation, "tick finished with a broken invariant");
        }

        let summary = TickSummary {
            game_id: game_id.to_string(),
            year: year + 1,
            ticked_at: now,
            units_remaining: world.units().count(),
            settlements: world.settlements().count(),
            founded: world.founded_count(),
            population: world.population_by_player(),
            system_reports,
        };

        let commit = world.into_commit(now);
        if !self.store.commit_tick(&commit)? {
            if self.store.game(game_id)?.is_none() {
                return Err(TickError::GameVanished(game_id.to_string()));
            }
            return Err(TickError::Conflict {
                game_id: game_id.to_string(),
                year,
            });
        }

        if summary.founded > 0 {
            info!(
                game_id,
                year = summary.year,
                founded = summary.founded,
                "settlements founded"
            );
        }
        debug!(
            game_id,
            year = summary.year,
            units = summary.units_remaining,
            settlements = summary.settlements,
            "tick committed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Game;
    use crate::spatial::{Terrain, WorldMap};
    use crate::store::WorldSeed;

    struct CountingSystem {
        calls: Arc<Mutex<Vec<i64>>>,
    }

    impl System for CountingSystem {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(
            &mut self,
            ctx: &SystemContext<'_>,
            _world: &mut GameWorld,
            _rng: &mut SystemRng<'_>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(ctx.year);
            Ok(())
        }
    }

    struct FailingSystem;

    impl System for FailingSystem {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(
            &mut self,
            _ctx: &SystemContext<'_>,
            _world: &mut GameWorld,
            _rng: &mut SystemRng<'_>,
        ) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn store_with_game(state: GameState) -> Arc<Store> {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut game = Game::new_waiting("game-1", "creator", 1, -4000, now);
        if state == GameState::Started {
            game.state = GameState::Started;
            game.player_list = vec!["alice".into()];
            game.current_players = 1;
            game.started_at = Some(now);
        }
        store.insert_game(&game).unwrap();
        store
            .seed_world(
                "game-1",
                &WorldSeed {
                    map: WorldMap::filled(3, 3, Terrain::Plains),
                    units: Vec::new(),
                    allocations: Vec::new(),
                },
            )
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn tick_runs_systems_and_advances_year() {
        let store = store_with_game(GameState::Started);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut engine = EngineBuilder::new(
            store.clone(),
            Arc::new(IdAllocator::sequential()),
            SimulationRules::default(),
        )
        .with_system(CountingSystem {
            calls: calls.clone(),
        })
        .build();

        let summary = engine.tick_game("game-1", Utc::now()).unwrap();
        assert_eq!(summary.year, -3999);
        assert_eq!(summary.system_reports.len(), 1);
        engine.tick_game("game-1", Utc::now()).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![-4000, -3999]);
        assert_eq!(store.game("game-1").unwrap().unwrap().current_year, -3998);
    }

    #[test]
    fn failing_system_leaves_game_untouched() {
        let store = store_with_game(GameState::Started);
        let mut engine = EngineBuilder::new(
            store.clone(),
            Arc::new(IdAllocator::sequential()),
            SimulationRules::default(),
        )
        .with_system(FailingSystem)
        .build();

        let err = engine.tick_game("game-1", Utc::now()).unwrap_err();
        assert!(matches!(err, TickError::System { .. }));
        let game = store.game("game-1").unwrap().unwrap();
        assert_eq!(game.current_year, -4000);
        assert!(game.last_tick_at.is_none());
    }

    #[test]
    fn waiting_and_missing_games_are_rejected() {
        let store = store_with_game(GameState::Waiting);
        let mut engine = EngineBuilder::new(
            store,
            Arc::new(IdAllocator::sequential()),
            SimulationRules::default(),
        )
        .with_default_systems()
        .build();

        assert!(matches!(
            engine.tick_game("game-1", Utc::now()),
            Err(TickError::NotStarted(_))
        ));
        let missing = engine.tick_game("nope", Utc::now()).unwrap_err();
        assert!(missing.is_missing_entity());
    }
}
