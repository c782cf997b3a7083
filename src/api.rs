//! HTTP health endpoint.
//!
//! Only `GET /health` is served. Every other path answers 404. The
//! response body is the [`HealthReport`]; the status code is 200 while the
//! service is healthy and 503 while it is starting up or degraded, so
//! container health checks can use it directly.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

use crate::health::{HealthReport, RuntimeHealth};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub health: RuntimeHealth,
}

/// GET /health - Report manager and per-job health.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report: HealthReport = state.health.snapshot();
    let code = if report.status.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    debug!(status = ?report.status, jobs = report.jobs.len(), "Health check");
    (code, Json(report))
}

/// Build the router for the health server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
