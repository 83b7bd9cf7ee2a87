//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: component errors mapped onto HTTP status + envelope
//! - `error_codes`: Standard error code constants

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::order::OrderError;
use crate::payment::PaymentError;
use crate::settlement::SettlementError;
use crate::wallet::WalletError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description; errors lead with the error kind
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

// ============================================================================
// Error mapping
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    /// From a component error's `(http_status, code, message)` triple
    fn component(status: u16, kind: &str, msg: String) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = error_codes::for_status(status);
        // Internal details stay in the log
        let msg = if status == StatusCode::BAD_GATEWAY {
            tracing::warn!(kind, error = %msg, "Provider call failed");
            "payment provider unavailable".to_string()
        } else if status.is_server_error() {
            tracing::error!(kind, error = %msg, "Request failed");
            "internal error".to_string()
        } else {
            msg
        };
        Self::new(status, code, format!("{kind}: {msg}"))
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

macro_rules! impl_from_component {
    ($($err:ty),*) => {$(
        impl From<$err> for ApiError {
            fn from(e: $err) -> Self {
                ApiError::component(e.http_status(), e.code(), e.to_string())
            }
        }
    )*};
}

impl_from_component!(OrderError, PaymentError, WalletError, SettlementError);

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    use axum::http::StatusCode;

    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const BUSINESS_RULE: i32 = 1002;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const UPSTREAM_ERROR: i32 = 5002;

    pub fn for_status(status: StatusCode) -> i32 {
        match status {
            StatusCode::BAD_REQUEST => INVALID_PARAMETER,
            StatusCode::UNAUTHORIZED => AUTH_FAILED,
            StatusCode::FORBIDDEN => FORBIDDEN,
            StatusCode::NOT_FOUND => NOT_FOUND,
            StatusCode::CONFLICT => CONFLICT,
            StatusCode::UNPROCESSABLE_ENTITY => BUSINESS_RULE,
            StatusCode::BAD_GATEWAY => UPSTREAM_ERROR,
            StatusCode::SERVICE_UNAVAILABLE => SERVICE_UNAVAILABLE,
            _ => INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryError, StockTarget};

    #[test]
    fn test_business_error_keeps_kind() {
        let err: ApiError = OrderError::from(InventoryError::InsufficientStock {
            target: StockTarget::Product(1),
            requested: 2,
        })
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::BUSINESS_RULE);
        assert!(err.msg.starts_with("INSUFFICIENT_STOCK: "));
    }

    #[test]
    fn test_server_error_hides_detail() {
        let err: ApiError = WalletError::DatabaseError("password=hunter2".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.msg.contains("hunter2"));

        let err: ApiError = PaymentError::GatewayRequestFailed("timeout".into()).into();
        assert_eq!(err.code, error_codes::UPSTREAM_ERROR);
    }
}
