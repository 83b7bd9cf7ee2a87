use thiserror::Error;

use crate::core_types::ProductId;
use crate::inventory::InventoryError;
use crate::pricing::PricingError;

use super::state::OrderStatus;

#[derive(Error, Debug, Clone)]
pub enum OrderError {
    // === Validation ===
    #[error("Order has no items")]
    ItemsEmpty,

    #[error("Item quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Fulfillment type does not match product {0}")]
    FulfillmentTypeMismatch(ProductId),

    #[error("Manual form invalid for product {product_id}: field '{field}' {reason}")]
    ManualFormInvalid {
        product_id: ProductId,
        field: String,
        reason: &'static str,
    },

    #[error("Guest checkout is disabled")]
    GuestOrdersDisabled,

    #[error("Guest email and order password are required")]
    GuestCredentialsRequired,

    // === Lifecycle ===
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order cannot be cancelled in status {0}")]
    OrderCancelNotAllowed(OrderStatus),

    #[error("Order {order_no} is not in a settleable state ({status})")]
    OrderStatusInvalid { order_no: String, status: OrderStatus },

    #[error("Order has expired")]
    OrderExpired,

    #[error("Refund not allowed for this order")]
    RefundNotAllowed,

    #[error("Refund exceeds the refundable amount")]
    RefundExceedsPaid,

    #[error("Refund request {0} was already recorded with a different amount")]
    RefundRequestConflict(String),

    // === Collaborators ===
    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    // === System ===
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl OrderError {
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::ItemsEmpty => "ITEMS_EMPTY",
            OrderError::InvalidQuantity => "INVALID_QUANTITY",
            OrderError::FulfillmentTypeMismatch(_) => "FULFILLMENT_TYPE_MISMATCH",
            OrderError::ManualFormInvalid { .. } => "MANUAL_FORM_INVALID",
            OrderError::GuestOrdersDisabled => "GUEST_ORDERS_DISABLED",
            OrderError::GuestCredentialsRequired => "GUEST_CREDENTIALS_REQUIRED",
            OrderError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            OrderError::OrderCancelNotAllowed(_) => "ORDER_CANCEL_NOT_ALLOWED",
            OrderError::OrderStatusInvalid { .. } => "ORDER_STATUS_INVALID",
            OrderError::OrderExpired => "ORDER_EXPIRED",
            OrderError::RefundNotAllowed => "REFUND_NOT_ALLOWED",
            OrderError::RefundExceedsPaid => "REFUND_EXCEEDS_PAID",
            OrderError::RefundRequestConflict(_) => "REFUND_REQUEST_CONFLICT",
            OrderError::Pricing(e) => e.code(),
            OrderError::Inventory(e) => e.code(),
            OrderError::PasswordHash(_) => "SYSTEM_ERROR",
            OrderError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            OrderError::ItemsEmpty
            | OrderError::InvalidQuantity
            | OrderError::FulfillmentTypeMismatch(_)
            | OrderError::ManualFormInvalid { .. }
            | OrderError::GuestCredentialsRequired => 400,
            OrderError::GuestOrdersDisabled => 403,
            OrderError::OrderNotFound(_) => 404,
            OrderError::OrderCancelNotAllowed(_)
            | OrderError::OrderStatusInvalid { .. }
            | OrderError::OrderExpired
            | OrderError::RefundNotAllowed
            | OrderError::RefundRequestConflict(_) => 409,
            OrderError::RefundExceedsPaid => 422,
            OrderError::Pricing(e) => e.http_status(),
            OrderError::Inventory(e) => e.http_status(),
            OrderError::PasswordHash(_) | OrderError::DatabaseError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(e: sqlx::Error) -> Self {
        OrderError::DatabaseError(e.to_string())
    }
}
