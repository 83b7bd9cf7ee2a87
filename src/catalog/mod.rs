//! Catalog collaborator contract
//!
//! Products, SKUs, coupons and promotions are owned by admin CRUD outside this
//! crate. The core only needs to read them and to bump usage counters once a
//! payment settles.

pub mod db;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{CouponId, OrderId, ProductId, PromotionId, SkuId, UserId};

pub use db::PgCatalog;
pub use memory::MemoryCatalog;
pub use types::{
    Coupon, DiscountType, FulfillmentType, ManualFormField, Product, Promotion, Sku, UsageOutcome,
};

#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Corrupt catalog row: {0}")]
    CorruptRow(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(e: sqlx::Error) -> Self {
        CatalogError::DatabaseError(e.to_string())
    }
}

/// Read/write contract the core consumes from the catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, CatalogError>;

    async fn get_sku(&self, id: SkuId) -> Result<Option<Sku>, CatalogError>;

    async fn get_coupon(&self, id: CouponId) -> Result<Option<Coupon>, CatalogError>;

    /// Case-insensitive lookup
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, CatalogError>;

    /// Settled uses of a coupon by one user
    async fn coupon_uses_by_user(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<i64, CatalogError>;

    /// Active promotions attached to a product (window not yet evaluated)
    async fn promotions_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Promotion>, CatalogError>;

    /// Count one coupon use for a settled order.
    ///
    /// Atomic conditional increment: at most `usage_limit` orders ever win,
    /// and the same order is counted once.
    async fn record_coupon_use(
        &self,
        coupon_id: CouponId,
        order_id: OrderId,
        user_id: Option<UserId>,
    ) -> Result<UsageOutcome, CatalogError>;

    /// Count one promotion use for a settled order (same guarantees)
    async fn record_promotion_use(
        &self,
        promotion_id: PromotionId,
        order_id: OrderId,
    ) -> Result<UsageOutcome, CatalogError>;
}
