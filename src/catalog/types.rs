//! Catalog snapshot types consumed by pricing and inventory

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{CouponId, Currency, ProductId, PromotionId, SkuId};

/// How an order item is fulfilled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    /// Operator delivers by hand; stock is a per-product counter
    Manual,
    /// Card-secret pool per SKU, delivered at settlement
    Auto,
    /// Nothing to deliver
    None,
}

impl FulfillmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentType::Manual => "manual",
            FulfillmentType::Auto => "auto",
            FulfillmentType::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(FulfillmentType::Manual),
            "auto" => Some(FulfillmentType::Auto),
            "none" => Some(FulfillmentType::None),
            _ => None,
        }
    }
}

/// One buyer-supplied field a manual product asks for at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualFormField {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    /// 0 = no limit
    #[serde(default)]
    pub max_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub currency: Currency,
    pub active: bool,
    pub fulfillment_type: FulfillmentType,
    #[serde(default)]
    pub manual_form: Vec<ManualFormField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sku {
    pub id: SkuId,
    pub product_id: ProductId,
    pub name: String,
    /// `None` inherits the product price
    pub price: Option<Decimal>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Fixed,
    Percentage,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Fixed => "fixed",
            DiscountType::Percentage => "percentage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(DiscountType::Fixed),
            "percentage" => Some(DiscountType::Percentage),
            _ => None,
        }
    }
}

/// Order-level coupon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub code: String,
    pub discount_type: DiscountType,
    /// Fixed amount, or percent (e.g. `15` = 15%)
    pub value: Decimal,
    /// Cap for percentage coupons
    pub max_discount: Option<Decimal>,
    pub min_amount: Decimal,
    pub currency: Currency,
    /// Empty = whole order
    pub scope_product_ids: Vec<ProductId>,
    pub scope_sku_ids: Vec<SkuId>,
    /// `None` = unlimited
    pub usage_limit: Option<i64>,
    pub per_user_limit: Option<i64>,
    pub used_count: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Coupon {
    pub fn is_scoped(&self) -> bool {
        !self.scope_product_ids.is_empty() || !self.scope_sku_ids.is_empty()
    }

    pub fn covers(&self, product_id: ProductId, sku_id: Option<SkuId>) -> bool {
        if !self.is_scoped() {
            return true;
        }
        if self.scope_product_ids.contains(&product_id) {
            return true;
        }
        matches!(sku_id, Some(s) if self.scope_sku_ids.contains(&s))
    }

    pub fn limit_reached(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if limit > 0 && self.used_count >= limit)
    }
}

/// Item-level promotion, scoped to a product and optionally one SKU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub name: String,
    pub product_id: ProductId,
    pub sku_id: Option<SkuId>,
    pub discount_type: DiscountType,
    /// Per-unit fixed amount, or percent of the unit price
    pub value: Decimal,
    /// Minimum line amount before the promotion applies
    pub min_amount: Decimal,
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Promotion {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.starts_at.is_none_or(|s| s <= now)
            && self.ends_at.is_none_or(|e| e > now)
            && !matches!(self.usage_limit, Some(limit) if limit > 0 && self.used_count >= limit)
    }

    pub fn applies_to(&self, product_id: ProductId, sku_id: Option<SkuId>) -> bool {
        self.product_id == product_id && self.sku_id.is_none_or(|s| Some(s) == sku_id)
    }
}

/// Result of a settlement-time usage increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    Applied,
    /// The same order was already counted
    AlreadyApplied,
    /// Global or per-user limit reached by a concurrent settlement
    LimitReached,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo() -> Promotion {
        Promotion {
            id: 1,
            name: "p".into(),
            product_id: 10,
            sku_id: Some(100),
            discount_type: DiscountType::Fixed,
            value: Decimal::ONE,
            min_amount: Decimal::ZERO,
            usage_limit: Some(2),
            used_count: 0,
            starts_at: None,
            ends_at: None,
            active: true,
        }
    }

    #[test]
    fn test_promotion_scope() {
        let p = promo();
        assert!(p.applies_to(10, Some(100)));
        assert!(!p.applies_to(10, Some(101)));
        assert!(!p.applies_to(11, Some(100)));
    }

    #[test]
    fn test_promotion_window_and_limit() {
        let now = Utc::now();
        let mut p = promo();
        assert!(p.is_live(now));
        p.ends_at = Some(now - Duration::minutes(1));
        assert!(!p.is_live(now));
        p.ends_at = None;
        p.used_count = 2;
        assert!(!p.is_live(now));
    }

    #[test]
    fn test_fulfillment_type_parse() {
        for t in [FulfillmentType::Manual, FulfillmentType::Auto, FulfillmentType::None] {
            assert_eq!(FulfillmentType::parse(t.as_str()), Some(t));
        }
        assert_eq!(FulfillmentType::parse("x"), None);
    }
}
