use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum WalletError {
    #[error("Invalid wallet amount")]
    InvalidAmount,

    #[error("Insufficient wallet balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Guest orders cannot use the wallet")]
    NotSupportedForGuest,

    #[error("Correlation {0} was already used for a different adjustment")]
    CorrelationConflict(String),

    #[error("Wallet currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Recharge order not found: {0}")]
    RechargeNotFound(String),

    #[error("Gift card not found")]
    GiftCardNotFound,

    #[error("Gift card already redeemed")]
    GiftCardRedeemed,

    #[error("Gift card expired")]
    GiftCardExpired,

    #[error("Gift card disabled")]
    GiftCardDisabled,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl WalletError {
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InvalidAmount => "WALLET_INVALID_AMOUNT",
            WalletError::InsufficientBalance { .. } => "WALLET_INSUFFICIENT_BALANCE",
            WalletError::NotSupportedForGuest => "WALLET_NOT_SUPPORTED_FOR_GUEST",
            WalletError::CorrelationConflict(_) => "WALLET_CORRELATION_CONFLICT",
            WalletError::CurrencyMismatch { .. } => "WALLET_CURRENCY_MISMATCH",
            WalletError::RechargeNotFound(_) => "RECHARGE_NOT_FOUND",
            WalletError::GiftCardNotFound => "GIFT_CARD_NOT_FOUND",
            WalletError::GiftCardRedeemed => "GIFT_CARD_REDEEMED",
            WalletError::GiftCardExpired => "GIFT_CARD_EXPIRED",
            WalletError::GiftCardDisabled => "GIFT_CARD_DISABLED",
            WalletError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WalletError::InvalidAmount | WalletError::CurrencyMismatch { .. } => 400,
            WalletError::NotSupportedForGuest => 403,
            WalletError::RechargeNotFound(_) | WalletError::GiftCardNotFound => 404,
            WalletError::CorrelationConflict(_)
            | WalletError::GiftCardRedeemed
            | WalletError::GiftCardExpired
            | WalletError::GiftCardDisabled => 409,
            WalletError::InsufficientBalance { .. } => 422,
            WalletError::DatabaseError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::DatabaseError(e.to_string())
    }
}
