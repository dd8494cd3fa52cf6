//! Tick scheduler.
//!
//! Stateless between polls: every poll lists the started games and derives
//! eligibility from the persisted `started_at` / `last_tick_at` fields, so a
//! restarted process picks up exactly where the store says it is.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    components::{Game, GameState},
    config::SchedulerConfig,
    engine::{SharedEngine, TickSummary},
    error::{StoreError, TickError},
    store::Store,
};

/// A started game is due once a full tick interval has passed since its
/// last tick (or its start, before the first tick).
pub fn is_due(game: &Game, now: DateTime<Utc>, tick_interval: chrono::Duration) -> bool {
    if game.state != GameState::Started {
        return false;
    }
    match game.tick_anchor() {
        Some(anchor) => now.signed_duration_since(anchor) >= tick_interval,
        None => true,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub examined: usize,
    pub ticked: usize,
    pub not_due: usize,
    /// Games that vanished between listing and processing.
    pub skipped: usize,
    pub failed: usize,
}

pub struct TickScheduler {
    store: Arc<Store>,
    engine: SharedEngine,
    tick_interval: chrono::Duration,
    poll_interval: Duration,
    events: broadcast::Sender<TickSummary>,
}

impl TickScheduler {
    pub fn new(
        store: Arc<Store>,
        engine: SharedEngine,
        config: &SchedulerConfig,
        events: broadcast::Sender<TickSummary>,
    ) -> Self {
        Self {
            store,
            engine,
            tick_interval: config.tick_interval(),
            poll_interval: config.poll_interval(),
            events,
        }
    }

    /// Ticks every due game once. A failure in one game never stops the
    /// others; only a failure to list games aborts the poll.
    pub fn poll_once(&self, now: DateTime<Utc>) -> Result<PollReport, StoreError> {
        let games = self.store.games_in_state(GameState::Started)?;
        let mut report = PollReport {
            examined: games.len(),
            ..PollReport::default()
        };

        for game in games {
            if !is_due(&game, now, self.tick_interval) {
                report.not_due += 1;
                continue;
            }
            match self.tick(&game.game_id, now) {
                Ok(summary) => {
                    report.ticked += 1;
                    // No subscribers is fine.
                    let _ = self.events.send(summary);
                }
                Err(err) if err.is_missing_entity() => {
                    report.skipped += 1;
                    debug!(game_id = %game.game_id, "game vanished before its tick; skipping");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(game_id = %game.game_id, year = game.current_year, error = %err, "tick failed");
                }
            }
        }
        Ok(report)
    }

    fn tick(&self, game_id: &str, now: DateTime<Utc>) -> Result<TickSummary, TickError> {
        let mut engine = self.engine.lock().map_err(|_| TickError::Poisoned)?;
        engine.tick_game(game_id, now)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped. Polls
    /// never overlap; intervals missed while a poll runs are skipped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            tick_ms = self.tick_interval.num_milliseconds(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let scheduler = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || scheduler.poll_once(Utc::now())).await {
                Ok(Ok(report)) => {
                    if report.ticked > 0 || report.failed > 0 {
                        debug!(
                            examined = report.examined,
                            ticked = report.ticked,
                            skipped = report.skipped,
                            failed = report.failed,
                            "poll finished"
                        );
                    }
                }
                Ok(Err(err)) => warn!(error = %err, "listing games failed; retrying next poll"),
                Err(err) => error!(error = %err, "poll task panicked"),
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    fn started(started_at: Option<i64>, last_tick_at: Option<i64>) -> Game {
        let mut game = Game::new_waiting("game-1", "creator", 1, -4000, at(0));
        game.state = GameState::Started;
        game.started_at = started_at.map(at);
        game.last_tick_at = last_tick_at.map(at);
        game
    }

    #[test]
    fn due_exactly_at_the_interval() {
        let interval = chrono::Duration::seconds(1);
        let game = started(Some(10), None);
        assert!(!is_due(&game, at(10), interval));
        assert!(is_due(&game, at(11), interval));
    }

    #[test]
    fn last_tick_takes_precedence_over_start() {
        let interval = chrono::Duration::seconds(1);
        let game = started(Some(0), Some(30));
        assert!(!is_due(&game, at(30), interval));
        assert!(is_due(&game, at(31), interval));
    }

    #[test]
    fn started_game_without_timestamps_is_due() {
        let game = started(None, None);
        assert!(is_due(&game, at(0), chrono::Duration::seconds(1)));
    }

    #[test]
    fn waiting_games_are_never_due() {
        let game = Game::new_waiting("game-1", "creator", 2, -4000, at(0));
        assert!(!is_due(&game, at(1_000), chrono::Duration::seconds(1)));
    }
}
