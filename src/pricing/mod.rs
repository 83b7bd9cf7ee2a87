//! Pricing Engine
//!
//! Computes per-item unit prices from the catalog, applies the best eligible
//! promotion per item (promotions never stack on one item), then at most one
//! order-level coupon on the promotion-adjusted subtotal.
//!
//! Pure with respect to side effects: the same result serves preview and
//! creation, and usage counters are only touched at settlement.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::PricingEngine;
pub use error::PricingError;
pub use types::{PriceItem, PriceRequest, PricedItem, PricedOrder, PromotionContext};
