use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::coordinator::SignalingCoordinator;
use crate::websocket::websocket_handler;

const GREETING: &str = "Hello from WebRTC signaling server";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: SignalingCoordinator,
    pub config: Arc<ServerConfig>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            coordinator: SignalingCoordinator::new(),
            config: Arc::new(config),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(greeting_handler))
        .route("/rtc", get(websocket_handler))
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    let grace = config.shutdown_grace;
    let state = AppState::new(config, metrics);

    serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!("beach-pier listening on {}", local_addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

async fn greeting_handler() -> &'static str {
    GREETING
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.snapshot())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
