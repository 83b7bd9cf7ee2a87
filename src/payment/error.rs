use thiserror::Error;

use super::types::PaymentStatus;

#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    // === Channel / provider ===
    #[error("Payment channel not found: {0}")]
    ChannelNotFound(i64),

    #[error("Payment channel is inactive")]
    ChannelInactive,

    #[error("Payment provider does not support {0}")]
    ProviderNotSupported(String),

    #[error("Payment channel config invalid: {0}")]
    ChannelConfigInvalid(String),

    // === External system ===
    #[error("Payment gateway request failed: {0}")]
    GatewayRequestFailed(String),

    #[error("Payment gateway response invalid: {0}")]
    GatewayResponseInvalid(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    // === Payment rows ===
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Illegal payment status transition {from} -> {to}")]
    PaymentStatusInvalid {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Payment amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: String, actual: String },

    #[error("Payment currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Invalid payment amount")]
    InvalidAmount,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ChannelNotFound(_) => "PAYMENT_CHANNEL_NOT_FOUND",
            PaymentError::ChannelInactive => "PAYMENT_CHANNEL_INACTIVE",
            PaymentError::ProviderNotSupported(_) => "PAYMENT_PROVIDER_NOT_SUPPORTED",
            PaymentError::ChannelConfigInvalid(_) => "PAYMENT_CHANNEL_CONFIG_INVALID",
            PaymentError::GatewayRequestFailed(_) => "PAYMENT_GATEWAY_REQUEST_FAILED",
            PaymentError::GatewayResponseInvalid(_) => "PAYMENT_GATEWAY_RESPONSE_INVALID",
            PaymentError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            PaymentError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            PaymentError::PaymentStatusInvalid { .. } => "PAYMENT_STATUS_INVALID",
            PaymentError::AmountMismatch { .. } => "PAYMENT_AMOUNT_MISMATCH",
            PaymentError::CurrencyMismatch { .. } => "PAYMENT_CURRENCY_MISMATCH",
            PaymentError::InvalidAmount => "PAYMENT_INVALID_AMOUNT",
            PaymentError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::ChannelConfigInvalid(_)
            | PaymentError::ProviderNotSupported(_)
            | PaymentError::InvalidAmount => 400,
            PaymentError::SignatureInvalid(_) => 401,
            PaymentError::ChannelNotFound(_) | PaymentError::PaymentNotFound(_) => 404,
            PaymentError::ChannelInactive
            | PaymentError::PaymentStatusInvalid { .. }
            | PaymentError::AmountMismatch { .. }
            | PaymentError::CurrencyMismatch { .. } => 409,
            PaymentError::GatewayRequestFailed(_) | PaymentError::GatewayResponseInvalid(_) => 502,
            PaymentError::DatabaseError(_) => 500,
        }
    }

    /// Amount/currency disagreement: never retried, reconciled by hand
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            PaymentError::AmountMismatch { .. } | PaymentError::CurrencyMismatch { .. }
        )
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(e: sqlx::Error) -> Self {
        PaymentError::DatabaseError(e.to_string())
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PaymentError::GatewayResponseInvalid(e.to_string())
        } else {
            PaymentError::GatewayRequestFailed(e.to_string())
        }
    }
}
