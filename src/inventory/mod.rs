//! Inventory Ledger
//!
//! Reserve / commit / release against two stock models:
//!
//! - **Manual**: per-product counters `{total, locked, sold}`
//! - **Card secrets**: per-SKU pool of discrete secret rows
//!
//! Every store operation is a single atomic step with its precondition
//! evaluated together with the mutation, so concurrent checkouts on the same
//! stock can never oversell.
//!
//! ```text
//! reserve:  available -> locked         (fails whole, never partial)
//! commit:   locked    -> sold           (idempotent per token)
//! release:  locked    -> available      (idempotent per token)
//! ```

pub mod db;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::core_types::{ProductId, SecretId, SkuId};

pub use db::PgInventory;
pub use error::InventoryError;
pub use ledger::InventoryLedger;
pub use memory::MemoryInventory;
pub use types::{
    CardSecret, CommitOutcome, Reservation, ReservationState, SecretStatus, StockCounters,
    StockTarget,
};

/// Storage contract for the Inventory Ledger
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Atomically claim `quantity` units. Never partially reserves.
    async fn reserve(
        &self,
        order_ref: &str,
        target: StockTarget,
        quantity: i64,
    ) -> Result<Reservation, InventoryError>;

    /// `Held -> Committed`; replay returns `newly_committed = false`
    async fn commit(&self, token: &str) -> Result<CommitOutcome, InventoryError>;

    /// `Held -> Released`; returns `false` on replay
    async fn release(&self, token: &str) -> Result<bool, InventoryError>;

    async fn get_reservation(&self, token: &str) -> Result<Option<Reservation>, InventoryError>;

    async fn counters(&self, target: StockTarget) -> Result<StockCounters, InventoryError>;

    /// Set the manual counter total (`<= 0` = unlimited)
    async fn set_manual_total(&self, product_id: ProductId, total: i64)
    -> Result<(), InventoryError>;

    /// Append secrets to a SKU pool, oldest first
    async fn add_secrets(
        &self,
        sku_id: SkuId,
        secrets: &[String],
    ) -> Result<Vec<SecretId>, InventoryError>;
}
