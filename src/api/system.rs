use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiResponse, AppState};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
    uptime_seconds: u64,
}

/// GET /api/system/health
///
/// Liveness plus database connectivity.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let database = state.store().ping().await.is_ok();

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };

    (status, Json(ApiResponse::success(body))).into_response()
}
