use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

#[derive(Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    /// "postgres" or "memory"
    pub storage: &'static str,
}

/// GET /api/v1/health
///
/// 503 with a bare "unavailable" when PostgreSQL stops answering; the cause
/// goes to the log only. Memory-backed instances are always healthy.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let now_ms = Utc::now().timestamp_millis();
    let (healthy, storage) = match &state.pg_db {
        Some(db) => (db.is_healthy(now_ms).await, "postgres"),
        None => (true, "memory"),
    };

    if !healthy {
        let body = ApiResponse {
            code: error_codes::SERVICE_UNAVAILABLE,
            msg: "unavailable".to_string(),
            data: None,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }
    let body = ApiResponse::success(HealthResponse {
        timestamp_ms: now_ms,
        storage,
    });
    (StatusCode::OK, Json(body))
}
