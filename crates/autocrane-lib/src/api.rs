//! Probe and metrics endpoints
//!
//! Liveness and readiness verdicts come straight from the controller's
//! recorded state; `/statusz` exposes the full record for operators and
//! `/metrics` serves the Prometheus registry. The server shuts down with
//! the same cancellation token as the orchestration loop.

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::status::{ControllerStatus, ProbeResult};

/// Build the probe router over a shared status handle
pub fn router(status: ControllerStatus) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/statusz", get(statusz))
        .route("/metrics", get(metrics))
        .with_state(status)
}

async fn healthz(State(status): State<ControllerStatus>) -> Response {
    probe_response(status.liveness())
}

async fn readyz(State(status): State<ControllerStatus>) -> Response {
    probe_response(status.readiness())
}

async fn statusz(State(status): State<ControllerStatus>) -> Response {
    Json(status.report()).into_response()
}

fn probe_response(probe: ProbeResult) -> Response {
    let code = if probe.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(probe)).into_response()
}

async fn metrics() -> Response {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Serve the probe endpoints until the token is cancelled
pub async fn serve(port: u16, status: ControllerStatus, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port = port, "Serving probe endpoints");

    axum::serve(listener, router(status))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}
