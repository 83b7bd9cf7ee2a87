use thiserror::Error;

use crate::catalog::CatalogError;
use crate::core_types::ProductId;
use crate::inventory::InventoryError;

/// Pricing Engine errors.
///
/// Each business rule has its own variant so callers can present a precise
/// message.
#[derive(Error, Debug, Clone)]
pub enum PricingError {
    // === Validation ===
    #[error("Order has no items")]
    EmptyItems,

    #[error("Item quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Order currency mismatch: expected {expected}, got {actual}")]
    OrderCurrencyMismatch { expected: String, actual: String },

    // === Catalog rules ===
    #[error("Product not available: {0}")]
    ProductNotAvailable(ProductId),

    #[error("Product price invalid: {0}")]
    ProductPriceInvalid(ProductId),

    #[error("Product {0} requires a SKU")]
    SkuRequired(ProductId),

    // === Coupon rules ===
    #[error("Coupon is invalid")]
    CouponInvalid,

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Coupon usage limit reached")]
    CouponUsageLimit,

    #[error("Coupon per-user limit reached")]
    CouponPerUserLimit,

    #[error("Order amount below coupon minimum")]
    CouponMinAmount,

    #[error("Coupon does not apply to any item in this order")]
    CouponScopeInvalid,

    // === Promotion rules ===
    #[error("Promotion is invalid")]
    PromotionInvalid,

    // === Collaborators ===
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

impl PricingError {
    pub fn code(&self) -> &'static str {
        match self {
            PricingError::EmptyItems => "EMPTY_ITEMS",
            PricingError::InvalidQuantity => "INVALID_QUANTITY",
            PricingError::OrderCurrencyMismatch { .. } => "ORDER_CURRENCY_MISMATCH",
            PricingError::ProductNotAvailable(_) => "PRODUCT_NOT_AVAILABLE",
            PricingError::ProductPriceInvalid(_) => "PRODUCT_PRICE_INVALID",
            PricingError::SkuRequired(_) => "SKU_REQUIRED",
            PricingError::CouponInvalid => "COUPON_INVALID",
            PricingError::CouponExpired => "COUPON_EXPIRED",
            PricingError::CouponUsageLimit => "COUPON_USAGE_LIMIT",
            PricingError::CouponPerUserLimit => "COUPON_PER_USER_LIMIT",
            PricingError::CouponMinAmount => "COUPON_MIN_AMOUNT",
            PricingError::CouponScopeInvalid => "COUPON_SCOPE_INVALID",
            PricingError::PromotionInvalid => "PROMOTION_INVALID",
            PricingError::Catalog(_) => "CATALOG_ERROR",
            PricingError::Inventory(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PricingError::EmptyItems
            | PricingError::InvalidQuantity
            | PricingError::OrderCurrencyMismatch { .. }
            | PricingError::SkuRequired(_) => 400,
            PricingError::Catalog(_) => 500,
            PricingError::Inventory(e) => e.http_status(),
            _ => 422,
        }
    }
}
