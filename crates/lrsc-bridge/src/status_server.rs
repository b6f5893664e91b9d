//! Status HTTP endpoint.
//!
//! `GET /status/device` and `GET /status/cloud` render each component's
//! status map as JSON; `GET /health` answers `ok` while the process runs.

use axum::{
    Router,
    extract::State,
    http::{HeaderName, header},
    response::IntoResponse,
    routing::get,
};
use lrsc_core::StatusReporter;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct Reporters {
    device: StatusReporter,
    cloud: StatusReporter,
}

pub fn router(device: StatusReporter, cloud: StatusReporter) -> Router {
    Router::new()
        .route("/status/device", get(device_status))
        .route("/status/cloud", get(cloud_status))
        .route("/health", get(health))
        .with_state(Reporters { device, cloud })
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    device: StatusReporter,
    cloud: StatusReporter,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Status endpoint listening");

    axum::serve(listener, router(device, cloud))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn device_status(State(reporters): State<Reporters>) -> impl IntoResponse {
    json(&reporters.device)
}

async fn cloud_status(State(reporters): State<Reporters>) -> impl IntoResponse {
    json(&reporters.cloud)
}

async fn health() -> &'static str {
    "ok"
}

fn json(status: &StatusReporter) -> ([(HeaderName, &'static str); 1], String) {
    ([(header::CONTENT_TYPE, "application/json")], status.summary())
}
