//! Bearer-token authentication
//!
//! Users and admins present an HS256 JWT issued elsewhere (the storefront
//! account service). Guests never carry a token; they authenticate per order
//! with email + order password.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::state::AppState;
use super::types::{ApiResponse, error_codes};
use crate::core_types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id as string
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// Authenticated caller, injected into request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token rejected: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    BadSubject,
}

pub struct JwtAuth {
    secret: String,
}

impl JwtAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn issue(&self, user_id: UserId, role: Role, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: (now + ttl).timestamp().max(0) as usize,
            iat: now.timestamp().max(0) as usize,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, TokenError> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<Claims>(token, &decoding_key, &validation)?.claims;
        let user_id = claims.sub.parse().map_err(|_| TokenError::BadSubject)?;
        Ok(AuthUser {
            user_id,
            role: claims.role,
        })
    }
}

type Rejection = (StatusCode, Json<ApiResponse<()>>);

fn reject(status: StatusCode, code: i32, msg: &str) -> Rejection {
    (status, Json(ApiResponse::<()>::error(code, msg)))
}

/// `Ok(None)` when no Authorization header is present
fn bearer(state: &AppState, request: &Request<Body>) -> Result<Option<AuthUser>, Rejection> {
    let Some(auth_header) = request.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = auth_header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| {
            reject(StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED, "Invalid token format")
        })?;
    match state.jwt.verify(token) {
        Ok(user) => Ok(Some(user)),
        Err(e) => {
            tracing::debug!(error = %e, "Bearer token rejected");
            Err(reject(
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "Invalid or expired token",
            ))
        }
    }
}

/// Requires a valid bearer token
pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Rejection> {
    let user = bearer(&state, &request)?.ok_or_else(|| {
        reject(
            StatusCode::UNAUTHORIZED,
            error_codes::MISSING_AUTH,
            "Missing Authorization header",
        )
    })?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Injects the caller when a token is present; guests pass through
pub async fn optional_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Rejection> {
    if let Some(user) = bearer(&state, &request)? {
        request.extensions_mut().insert(user);
    }
    Ok(next.run(request).await)
}

/// Requires a valid bearer token with the admin role
pub async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Rejection> {
    let user = bearer(&state, &request)?.ok_or_else(|| {
        reject(
            StatusCode::UNAUTHORIZED,
            error_codes::MISSING_AUTH,
            "Missing Authorization header",
        )
    })?;
    if !user.is_admin() {
        return Err(reject(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, "Admin role required"));
    }
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
