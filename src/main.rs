// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::application::chart_controller::ChartController;
use crate::application::live_feed::LiveFeed;
use crate::application::orchestrator::DashboardOrchestrator;
use crate::application::registry::ControllerRegistry;
use crate::domain::sensor::SensorType;
use crate::infrastructure::chart_board::ChartBoard;
use crate::infrastructure::config::load_dashboard_config;
use crate::infrastructure::hub_client::HttpSensorHub;
use crate::infrastructure::live_channel::WebSocketFeed;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_chart, health_check, list_charts, list_sensors, recreate_sensor_charts, stream_events,
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
    let config = load_dashboard_config()?;

    // Render target and one chart controller per sensor type
    let board = ChartBoard::new();
    let renderer = Arc::new(board.clone());
    let controllers = SensorType::ALL
        .iter()
        .map(|t| ChartController::new(*t, config.charts.clone(), renderer.clone()))
        .collect();
    let registry = ControllerRegistry::new(controllers, config.charts.recreate_delay());

    // Data sources (infrastructure layer)
    let hub = Arc::new(HttpSensorHub::new(&config.hub)?);
    let live_feed = config
        .live
        .url
        .as_deref()
        .map(|url| Arc::new(WebSocketFeed::new(url)) as Arc<dyn LiveFeed>);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;

    let shutdown = CancellationToken::new();
    let orchestrator = DashboardOrchestrator::new(config, registry, hub, live_feed);
    let managers = orchestrator.managers();
    let orchestrator_task = tokio::spawn(orchestrator.run(shutdown.clone()));

    // Create application state
    let state = Arc::new(AppState { board, managers });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/charts", get(list_charts))
        .route("/charts/:id", get(get_chart))
        .route("/events", get(stream_events))
        .route("/sensors", get(list_sensors))
        .route("/sensors/:sensor_type/recreate", post(recreate_sensor_charts))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    tracing::info!("Starting sensor-dashboard service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    orchestrator_task.await?;

    Ok(())
}
