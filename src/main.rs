use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use civsim::{
    config::Config,
    engine::EngineBuilder,
    ids::IdAllocator,
    scheduler::TickScheduler,
    store::Store,
    web::{self, AppState},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Persistent civilization simulation server")]
struct Cli {
    /// Path to the server YAML file (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Enable sequential ids and the /api/test routes
    #[arg(long)]
    test_mode: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.test_mode |= cli.test_mode;
    config.validate()?;
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging.level);

    let store = Arc::new(
        Store::open(&config.database.path)
            .with_context(|| format!("opening {}", config.database.path.display()))?,
    );
    let ids = Arc::new(IdAllocator::for_mode(config.test_mode));
    let engine = EngineBuilder::new(store.clone(), ids.clone(), config.simulation.clone())
        .with_default_systems()
        .build_shared();
    let (events, _) = broadcast::channel(512);

    let scheduler = Arc::new(TickScheduler::new(
        store.clone(),
        engine.clone(),
        &config.scheduler,
        events.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let state = Arc::new(AppState {
        store,
        engine,
        ids,
        rules: config.simulation.clone(),
        test_mode: config.test_mode,
        events,
    });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    if config.test_mode {
        warn!("test mode enabled: sequential ids and /api/test routes are live");
    }

    web::serve(listener, state, async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    })
    .await?;

    scheduler_handle.await.context("scheduler task failed")?;
    info!("server stopped");
    Ok(())
}
