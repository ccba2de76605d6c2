use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

#[derive(Clone)]
struct ServerState {
    registry: Registry,
    scrape_timeout: Duration,
}

/// Serve `/metrics`, `/healthz`, and a root redirect until the shutdown
/// token fires.
pub async fn run_server(
    addr: SocketAddr,
    registry: Registry,
    scrape_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = ServerState {
        registry,
        scrape_timeout,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/", get(|| async { Redirect::temporary("/metrics") }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Serving metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Collectors read files and shell out, so gathering runs on the blocking
/// pool under the per-scrape deadline.
async fn metrics_handler(State(state): State<ServerState>) -> Response {
    let registry = state.registry.clone();
    let gather = tokio::task::spawn_blocking(move || registry.gather());

    let families = match tokio::time::timeout(state.scrape_timeout, gather).await {
        Ok(Ok(families)) => families,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Metric gathering failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(_) => {
            tracing::error!(timeout = ?state.scrape_timeout, "Scrape timed out");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Metric encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz_handler() -> &'static str {
    "OK"
}
