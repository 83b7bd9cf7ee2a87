use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{FulfillmentType, ManualFormField};
use crate::core_types::{CouponId, Currency, ProductId, PromotionId, SkuId, UserId};

/// One requested line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub sku_id: Option<SkuId>,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct PriceRequest {
    pub currency: Currency,
    /// Registered buyer; per-user coupon limits are skipped for guests
    pub user_id: Option<UserId>,
    pub items: Vec<PriceItem>,
    pub coupon_code: Option<String>,
}

/// Promotion evaluation context
#[derive(Debug, Clone)]
pub struct PromotionContext {
    pub now: DateTime<Utc>,
    /// Campaign the buyer came from; must be applicable when present
    pub promotion_id: Option<PromotionId>,
}

impl PromotionContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            promotion_id: None,
        }
    }
}

impl Default for PromotionContext {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PricedItem {
    pub product_id: ProductId,
    pub sku_id: Option<SkuId>,
    pub name: String,
    pub fulfillment_type: FulfillmentType,
    pub quantity: i64,
    pub unit_price: Decimal,
    /// `unit_price * quantity`
    pub original_amount: Decimal,
    pub promotion_id: Option<PromotionId>,
    pub promotion_discount: Decimal,
    /// This line's share of the order coupon
    pub coupon_discount: Decimal,
    pub total_amount: Decimal,
    /// Availability at pricing time (not a reservation)
    pub in_stock: bool,
    #[serde(skip)]
    pub manual_form: Vec<ManualFormField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricedOrder {
    pub currency: Currency,
    pub items: Vec<PricedItem>,
    pub original_amount: Decimal,
    pub promotion_discount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub coupon_id: Option<CouponId>,
    pub coupon_code: Option<String>,
}

impl PricedOrder {
    /// First promotion attributed to any line
    pub fn promotion_id(&self) -> Option<PromotionId> {
        self.items.iter().find_map(|i| i.promotion_id)
    }

    pub fn all_in_stock(&self) -> bool {
        self.items.iter().all(|i| i.in_stock)
    }
}
