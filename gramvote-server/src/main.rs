use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use gramvote_server::clock::SystemClock;
use gramvote_server::config::Config;
use gramvote_server::http::api_router;
use gramvote_server::notify::LogNotifier;
use gramvote_server::scheduler::lifecycle_polling_loop;
use gramvote_server::store::SqliteStore;
use gramvote_server::{AppState, Engine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting election lifecycle server");

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_path = config.state_dir.join("gramvote-state.db");
    info!("Using state database: {}", db_path.display());
    let store = Arc::new(
        SqliteStore::new(&db_path).context("Failed to initialize SQLite database")?,
    );

    let clock = SystemClock::new(config.timezone_offset_minutes)
        .context("TIMEZONE_OFFSET_MINUTES is out of range")?;
    let engine = Engine::new(store, Arc::new(clock), Arc::new(LogNotifier));

    let app_state = Arc::new(AppState {
        engine: engine.clone(),
    });

    let app = api_router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    // The periodic pass owns all time-driven transitions and tallies.
    let tick = config.tick_interval_secs;
    tokio::spawn(async move {
        lifecycle_polling_loop(Arc::new(engine), tick).await;
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
