// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use reservoir_forecast::application::clock::SystemClock;
use reservoir_forecast::application::forecast_store::ForecastStore;
use reservoir_forecast::application::scheduler::spawn_refresh_scheduler;
use reservoir_forecast::infrastructure::config::load_app_config;
use reservoir_forecast::infrastructure::http_sources::http_source_set;
use reservoir_forecast::presentation::app_state::AppState;
use reservoir_forecast::presentation::handlers::{
    export_accuracy_csv, export_series_csv, get_all_states, get_state, health_check,
    list_parameters, stream_updates, trigger_refresh,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_app_config().context("Failed to load configuration")?;

    // Create source adapters (infrastructure layer)
    let client = reqwest::Client::builder()
        .user_agent(concat!("reservoir-forecast/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let sources = http_source_set(&config, client);

    // Create the store and its scheduler (application layer)
    let store = ForecastStore::new(
        sources,
        config.refresh.store_settings()?,
        Arc::new(SystemClock),
    );
    let _scheduler = spawn_refresh_scheduler(store.clone(), config.refresh.period());

    let state = Arc::new(AppState { store });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/parameters", get(list_parameters))
        .route("/forecast", get(get_all_states))
        .route("/forecast/stream", get(stream_updates))
        .route("/forecast/:parameter", get(get_state))
        .route("/forecast/:parameter/csv", get(export_series_csv))
        .route("/forecast/:parameter/accuracy/csv", get(export_accuracy_csv))
        .route("/forecast/:parameter/refresh", post(trigger_refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting reservoir-forecast service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
