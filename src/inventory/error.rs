use thiserror::Error;

use super::types::StockTarget;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Insufficient stock for {target}: requested {requested}")]
    InsufficientStock { target: StockTarget, requested: i64 },

    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Reservation already released: {0}")]
    ReservationReleased(String),

    #[error("Reservation already committed: {0}")]
    ReservationCommitted(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl InventoryError {
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            InventoryError::InvalidQuantity => "INVALID_QUANTITY",
            InventoryError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            InventoryError::ReservationReleased(_) => "RESERVATION_RELEASED",
            InventoryError::ReservationCommitted(_) => "RESERVATION_COMMITTED",
            InventoryError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            InventoryError::InvalidQuantity => 400,
            InventoryError::InsufficientStock { .. } => 422,
            InventoryError::ReservationNotFound(_) => 404,
            InventoryError::ReservationReleased(_) | InventoryError::ReservationCommitted(_) => 409,
            InventoryError::DatabaseError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for InventoryError {
    fn from(e: sqlx::Error) -> Self {
        InventoryError::DatabaseError(e.to_string())
    }
}
