//! Development-only token issuing
//!
//! Compiled only with the `mock-api` feature. Production builds use
//! `--no-default-features` and receive tokens from the account service.

use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::super::auth::Role;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ok};
use crate::core_types::UserId;

#[derive(Debug, Deserialize)]
pub struct MockTokenRequest {
    pub user_id: UserId,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Serialize)]
pub struct MockTokenResponse {
    pub token: String,
}

/// POST /internal/mock/token
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MockTokenRequest>,
) -> ApiResult<MockTokenResponse> {
    let token = state
        .jwt
        .issue(req.user_id, req.role, Duration::hours(24))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    tracing::warn!(user_id = req.user_id, role = ?req.role, "Issued development token");
    ok(MockTokenResponse { token })
}
