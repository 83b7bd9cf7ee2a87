//! Order State Machine
//!
//! Owns the Order/OrderItem lifecycle:
//!
//! - **create**: validate, price, reserve (all-or-nothing), persist as
//!   `pending_payment` with an expiry
//! - **cancel / expire**: `pending_payment` only, releases reservations
//! - **settle**: `pending_payment -> paid`, driven only by settlement and
//!   idempotent for the same payment
//! - **fulfil**: `paid -> fulfilling -> completed`
//!
//! Multi-item checkouts become a parent order plus one child per item.
//! Every row carries its own status and is transitioned independently; the
//! parent aggregates amounts for reporting.

pub mod db;
pub mod error;
pub mod form;
pub mod guest;
pub mod memory;
pub mod number;
pub mod service;
pub mod state;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::{OrderId, OrderItemId, PaymentId, UserId};

pub use db::PgOrderStore;
pub use error::OrderError;
pub use memory::MemoryOrderStore;
pub use number::OrderNoGenerator;
pub use service::{Delivery, OrderService, OrderSettings, SettleOutcome};
pub use state::OrderStatus;
pub use types::{
    CheckoutItem, CheckoutRequest, Order, OrderItem, OrderOwner, OrderTree, RefundRecord,
};

/// Persistence contract for orders. Every status change is a CAS.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a whole tree in one transaction; ids are assigned here
    async fn insert_tree(&self, tree: OrderTree) -> Result<OrderTree, OrderError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError>;

    async fn get_by_no(&self, order_no: &str) -> Result<Option<Order>, OrderError>;

    async fn children(&self, parent_id: OrderId) -> Result<Vec<Order>, OrderError>;

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, OrderError>;

    /// `UPDATE ... SET status = to WHERE id = ? AND status = from`
    async fn transition(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, OrderError>;

    /// CAS `pending_payment -> paid`, recording the paying payment
    async fn mark_paid(
        &self,
        id: OrderId,
        payment_id: PaymentId,
        wallet_paid: Decimal,
        online_paid: Decimal,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, OrderError>;

    /// CAS `from -> completed`
    async fn complete(
        &self,
        id: OrderId,
        from: OrderStatus,
        delivery_text: Option<&str>,
    ) -> Result<bool, OrderError>;

    /// CAS the item's reservation token from `expected` to `token`
    async fn set_reservation(
        &self,
        item_id: OrderItemId,
        expected: Option<&str>,
        token: &str,
    ) -> Result<bool, OrderError>;

    /// Replace the delivered secrets of an item
    async fn record_delivery(
        &self,
        item_id: OrderItemId,
        secrets: &[String],
    ) -> Result<(), OrderError>;

    /// Record refund `request_id` by adding `amount` to `refunded_amount`
    /// while it stays within `wallet_paid + online_paid`. A request id the
    /// order already recorded is reported back, never added twice.
    async fn add_refund(
        &self,
        id: OrderId,
        request_id: &str,
        amount: Decimal,
    ) -> Result<RefundRecord, OrderError>;

    /// Root orders still `pending_payment` whose expiry passed
    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, OrderError>;

    /// Root orders of a user, newest first
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, OrderError>;
}
