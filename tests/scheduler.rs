use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{broadcast, watch};

use civsim::{
    components::{Game, GameState, PopulationAllocation, Unit, UnitType},
    config::{SchedulerConfig, SimulationRules},
    engine::{EngineBuilder, System, SystemContext},
    ids::IdAllocator,
    rng::SystemRng,
    scheduler::TickScheduler,
    spatial::{Terrain, TilePos, WorldMap},
    store::{Store, WorldSeed},
    world::GameWorld,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn insert_started(store: &Store, game_id: &str, created_at: DateTime<Utc>, with_map: bool) {
    let mut game = Game::new_waiting(game_id, "creator", 1, -4000, created_at);
    game.state = GameState::Started;
    game.player_list = vec!["alice".to_string()];
    game.current_players = 1;
    game.started_at = Some(t0());
    store.insert_game(&game).unwrap();
    if !with_map {
        return;
    }
    let mut allocation = PopulationAllocation::empty(game_id, "alice");
    allocation.allocate_to_unit(100);
    store
        .seed_world(
            game_id,
            &WorldSeed {
                map: WorldMap::filled(5, 5, Terrain::Plains),
                units: vec![Unit {
                    unit_id: format!("{game_id}-unit"),
                    game_id: game_id.to_string(),
                    player_id: "alice".to_string(),
                    unit_type: UnitType::Settlers,
                    location: TilePos::new(2, 2),
                    steps_taken: 0,
                    population_cost: 100,
                }],
                allocations: vec![allocation],
            },
        )
        .unwrap();
}

fn config(poll_interval_ms: u64, tick_interval_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_ms,
        tick_interval_ms,
    }
}

fn scheduler_with(
    store: &Arc<Store>,
    builder: EngineBuilder,
    config: SchedulerConfig,
) -> (TickScheduler, broadcast::Receiver<civsim::TickSummary>) {
    let (events, rx) = broadcast::channel(64);
    let scheduler = TickScheduler::new(store.clone(), builder.build_shared(), &config, events);
    (scheduler, rx)
}

fn default_builder(store: &Arc<Store>) -> EngineBuilder {
    EngineBuilder::new(
        store.clone(),
        Arc::new(IdAllocator::sequential()),
        SimulationRules::default(),
    )
    .with_default_systems()
}

#[test]
fn games_tick_once_per_poll_after_the_interval() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    insert_started(&store, "game-1", t0(), true);
    let (scheduler, mut events) = scheduler_with(&store, default_builder(&store), config(100, 1_000));

    let early = scheduler.poll_once(t0() + Duration::milliseconds(999)).unwrap();
    assert_eq!(early.examined, 1);
    assert_eq!(early.not_due, 1);
    assert_eq!(early.ticked, 0);

    let due = scheduler.poll_once(t0() + Duration::seconds(1)).unwrap();
    assert_eq!(due.ticked, 1);
    assert_eq!(events.try_recv().unwrap().year, -3999);

    // A long pause is not caught up in one poll.
    let late = scheduler.poll_once(t0() + Duration::seconds(30)).unwrap();
    assert_eq!(late.ticked, 1);
    let game = store.game("game-1").unwrap().unwrap();
    assert_eq!(game.current_year, -3998);
    assert_eq!(game.last_tick_at, Some(t0() + Duration::seconds(30)));

    let again = scheduler.poll_once(t0() + Duration::seconds(30)).unwrap();
    assert_eq!(again.ticked, 0);
}

#[test]
fn waiting_games_are_not_examined() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .insert_game(&Game::new_waiting("lobby", "creator", 2, -4000, t0()))
        .unwrap();
    let (scheduler, _events) = scheduler_with(&store, default_builder(&store), config(100, 1_000));

    let report = scheduler.poll_once(t0() + Duration::hours(1)).unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(store.game("lobby").unwrap().unwrap().current_year, -4000);
}

#[test]
fn one_broken_game_does_not_stop_the_others() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    insert_started(&store, "broken", t0(), false);
    insert_started(&store, "healthy", t0() + Duration::seconds(1), true);
    let (scheduler, _events) = scheduler_with(&store, default_builder(&store), config(100, 1_000));

    let report = scheduler.poll_once(t0() + Duration::seconds(5)).unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.ticked, 1);
    assert_eq!(store.game("broken").unwrap().unwrap().current_year, -4000);
    assert_eq!(store.game("healthy").unwrap().unwrap().current_year, -3999);
}

/// Deletes another game while the first one is being ticked.
struct Saboteur {
    store: Arc<Store>,
    victim: &'static str,
}

impl System for Saboteur {
    fn name(&self) -> &str {
        "saboteur"
    }

    fn run(
        &mut self,
        _ctx: &SystemContext<'_>,
        _world: &mut GameWorld,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        self.store.delete_game(self.victim)?;
        Ok(())
    }
}

#[test]
fn game_deleted_mid_poll_is_skipped() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    insert_started(&store, "first", t0(), true);
    insert_started(&store, "second", t0() + Duration::seconds(1), true);
    let builder = default_builder(&store).with_system(Saboteur {
        store: store.clone(),
        victim: "second",
    });
    let (scheduler, _events) = scheduler_with(&store, builder, config(100, 1_000));

    let report = scheduler.poll_once(t0() + Duration::seconds(5)).unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.ticked, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert!(store.game("second").unwrap().is_none());
}

#[tokio::test]
async fn background_loop_ticks_until_shutdown() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    insert_started(&store, "game-1", t0(), true);
    let (scheduler, _events) = scheduler_with(&store, default_builder(&store), config(10, 1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(Arc::new(scheduler).run(shutdown_rx));
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let year = store.game("game-1").unwrap().unwrap().current_year;
    assert!(year > -4000);
    let after_stop = year;
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(store.game("game-1").unwrap().unwrap().current_year, after_stop);
}
