mod error;

use std::{convert::Infallible, future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{info, warn};

use crate::{
    components::{Game, Settlement, Unit},
    config::SimulationRules,
    engine::{SharedEngine, TickSummary},
    error::TickError,
    gate::{self, JoinOutcome},
    ids::IdAllocator,
    lobby,
    store::Store,
};

pub use error::ApiError;

pub struct AppState {
    pub store: Arc<Store>,
    pub engine: SharedEngine,
    pub ids: Arc<IdAllocator>,
    pub rules: SimulationRules,
    /// Enables the manual tick and id reset routes.
    pub test_mode: bool,
    pub events: broadcast::Sender<TickSummary>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/games", post(create_game))
        .route("/api/games/:game_id", get(get_game))
        .route("/api/games/:game_id/join", post(join_game))
        .route(
            "/api/games/:game_id/players/:player_id/units",
            get(player_units),
        )
        .route(
            "/api/games/:game_id/players/:player_id/settlements",
            get(player_settlements),
        )
        .route("/api/events", get(stream_events))
        .route("/api/test/games/:game_id/tick", post(force_tick))
        .route("/api/test/reset-ids", post(reset_ids))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, test_mode = state.test_mode, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Runs store work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("worker task failed: {err}")))?
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    pub creator_user_id: String,
    pub max_players: u32,
}

async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<Game>), ApiError> {
    let game = blocking(move || {
        lobby::create_game(
            &state.store,
            &state.ids,
            &state.rules,
            &request.creator_user_id,
            request.max_players,
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(game)))
}

async fn get_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<Game>, ApiError> {
    blocking(move || find_game(&state.store, &game_id)).await.map(Json)
}

fn find_game(store: &Store, game_id: &str) -> Result<Game, ApiError> {
    store
        .game(game_id)?
        .ok_or_else(|| ApiError::not_found(format!("game {game_id} not found")))
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub player_id: String,
}

async fn join_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinOutcome>, ApiError> {
    if request.player_id.trim().is_empty() {
        return Err(ApiError::bad_request("player_id must not be empty"));
    }
    blocking(move || {
        gate::join_game(
            &state.store,
            &state.ids,
            &state.rules,
            &game_id,
            &request.player_id,
            Utc::now(),
        )
        .map_err(ApiError::from)
    })
    .await
    .map(Json)
}

async fn player_units(
    State(state): State<Arc<AppState>>,
    Path((game_id, player_id)): Path<(String, String)>,
) -> Result<Json<Vec<Unit>>, ApiError> {
    blocking(move || {
        find_game(&state.store, &game_id)?;
        Ok(state.store.units_for_player(&game_id, &player_id)?)
    })
    .await
    .map(Json)
}

async fn player_settlements(
    State(state): State<Arc<AppState>>,
    Path((game_id, player_id)): Path<(String, String)>,
) -> Result<Json<Vec<Settlement>>, ApiError> {
    blocking(move || {
        find_game(&state.store, &game_id)?;
        Ok(state.store.settlements_for_player(&game_id, &player_id)?)
    })
    .await
    .map(Json)
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(summary) => Event::default().event("tick").json_data(summary).ok().map(Ok),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn require_test_mode(state: &AppState) -> Result<(), ApiError> {
    if state.test_mode {
        Ok(())
    } else {
        Err(ApiError::not_found("test routes are disabled"))
    }
}

/// Advances one game by exactly one tick, ignoring the wall-clock window.
async fn force_tick(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<TickSummary>, ApiError> {
    require_test_mode(&state)?;
    let summary = blocking(move || {
        let mut engine = state.engine.lock().map_err(|_| TickError::Poisoned)?;
        let summary = engine.tick_game(&game_id, Utc::now())?;
        let _ = state.events.send(summary.clone());
        Ok(summary)
    })
    .await;
    if let Err(err) = &summary {
        warn!(code = err.code(), "manual tick rejected");
    }
    summary.map(Json)
}

async fn reset_ids(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    require_test_mode(&state)?;
    state.ids.reset();
    info!("id counters reset");
    Ok(StatusCode::NO_CONTENT)
}
