use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::OrderStatus;
use crate::catalog::FulfillmentType;
use crate::core_types::{
    CouponId, Currency, OrderId, OrderItemId, PaymentId, ProductId, PromotionId, SkuId, UserId,
};

/// Who placed the order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderOwner {
    User { user_id: UserId },
    Guest { email: String, password: String },
}

impl OrderOwner {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            OrderOwner::User { user_id } => Some(*user_id),
            OrderOwner::Guest { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_no: String,
    pub parent_id: Option<OrderId>,
    pub user_id: Option<UserId>,
    pub guest_email: Option<String>,
    #[serde(skip_serializing)]
    pub guest_password_hash: Option<String>,
    pub status: OrderStatus,
    pub currency: Currency,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub promotion_discount: Decimal,
    pub total_amount: Decimal,
    pub wallet_paid: Decimal,
    pub online_paid: Decimal,
    pub refunded_amount: Decimal,
    pub coupon_id: Option<CouponId>,
    pub promotion_id: Option<PromotionId>,
    pub paid_payment_id: Option<PaymentId>,
    pub delivery_text: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Amount still refundable to the buyer
    pub fn refundable(&self) -> Decimal {
        (self.wallet_paid + self.online_paid - self.refunded_amount).max(Decimal::ZERO)
    }

    /// `total = original - discount - promotion` and paid parts within total
    pub fn amounts_consistent(&self) -> bool {
        self.total_amount == self.original_amount - self.discount_amount - self.promotion_discount
            && self.wallet_paid + self.online_paid <= self.total_amount
            && self.refunded_amount <= self.wallet_paid + self.online_paid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub sku_id: Option<SkuId>,
    pub name: String,
    pub quantity: i64,
    pub fulfillment_type: FulfillmentType,
    pub unit_price: Decimal,
    pub original_amount: Decimal,
    pub promotion_id: Option<PromotionId>,
    pub promotion_discount: Decimal,
    pub coupon_discount: Decimal,
    pub total_amount: Decimal,
    /// Buyer-supplied fields for manual fulfillment
    pub manual_form: serde_json::Value,
    #[serde(skip_serializing)]
    pub reservation_token: Option<String>,
    /// Card secrets revealed at settlement
    pub delivered_secrets: Vec<String>,
}

/// An order row with its items and, for split orders, its children
#[derive(Debug, Clone, Serialize)]
pub struct OrderTree {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub children: Vec<OrderTree>,
}

impl OrderTree {
    /// Every order row, parent first
    pub fn rows(&self) -> Vec<&Order> {
        let mut rows = vec![&self.order];
        for c in &self.children {
            rows.extend(c.rows());
        }
        rows
    }

    /// Every item across parent and children
    pub fn all_items(&self) -> Vec<&OrderItem> {
        let mut items: Vec<&OrderItem> = self.items.iter().collect();
        for c in &self.children {
            items.extend(c.all_items());
        }
        items
    }
}

/// Result of recording one refund request against an order
#[derive(Debug, Clone)]
pub enum RefundRecord {
    Applied(Order),
    /// The request id was recorded before, with `amount`
    Replayed { order: Order, amount: Decimal },
    /// Would push `refunded_amount` past what the order received
    Exceeds,
}

/// One checkout line as submitted by the buyer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub sku_id: Option<SkuId>,
    pub quantity: i64,
    /// Fulfillment type the client expects; must match the product
    #[serde(default)]
    pub fulfillment_type: Option<FulfillmentType>,
    #[serde(default)]
    pub manual_form: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub owner: OrderOwner,
    #[serde(default)]
    pub currency: Option<Currency>,
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub promotion_id: Option<PromotionId>,
}
