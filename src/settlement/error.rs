//! Settlement Error Types

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::order::{OrderError, OrderStatus};
use crate::payment::PaymentError;
use crate::wallet::WalletError;

#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Collaborators ===
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // === Checkout ===
    #[error("A payment channel is required for the online part")]
    ChannelRequired,

    #[error("Order {order_no} cannot be paid in status {status}")]
    OrderNotPayable { order_no: String, status: OrderStatus },

    // === Orchestration ===
    #[error("Payment {0} references neither an order nor a recharge")]
    PaymentOwnerMissing(String),

    #[error("Settlement of payment {0} made no progress")]
    Stalled(String),
}

impl SettlementError {
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Payment(e) => e.code(),
            SettlementError::Order(e) => e.code(),
            SettlementError::Wallet(e) => e.code(),
            SettlementError::Catalog(_) => "DATABASE_ERROR",
            SettlementError::ChannelRequired => "PAYMENT_CHANNEL_REQUIRED",
            SettlementError::OrderNotPayable { .. } => "ORDER_STATUS_INVALID",
            SettlementError::PaymentOwnerMissing(_) | SettlementError::Stalled(_) => "SYSTEM_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::Payment(e) => e.http_status(),
            SettlementError::Order(e) => e.http_status(),
            SettlementError::Wallet(e) => e.http_status(),
            SettlementError::ChannelRequired => 400,
            SettlementError::OrderNotPayable { .. } => 409,
            SettlementError::Catalog(_)
            | SettlementError::PaymentOwnerMissing(_)
            | SettlementError::Stalled(_) => 500,
        }
    }

    /// Needs manual reconciliation; retrying will not change the outcome.
    ///
    /// Order/wallet rejections only surface after the payment was parked in
    /// NEEDS_REFUND.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            SettlementError::Payment(
                PaymentError::AmountMismatch { .. }
                    | PaymentError::CurrencyMismatch { .. }
                    | PaymentError::PaymentStatusInvalid { .. }
            ) | SettlementError::Order(OrderError::OrderStatusInvalid { .. })
                | SettlementError::Wallet(
                    WalletError::InsufficientBalance { .. } | WalletError::NotSupportedForGuest
                )
        )
    }
}
