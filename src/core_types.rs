//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User ID - registered storefront account.
///
/// # Usage:
/// - Owner of registered orders
/// - Key of the one-per-user wallet account
pub type UserId = i64;

/// Order ID - database identity of an order row (parent or child)
pub type OrderId = i64;

/// Order item ID
pub type OrderItemId = i64;

/// Payment ID - one row per payment attempt; the unit of settlement idempotency
pub type PaymentId = i64;

/// Payment channel ID (admin-configured provider credentials)
pub type ChannelId = i64;

/// Product ID - catalog product (manual stock counters live per product)
pub type ProductId = i64;

/// SKU ID - catalog SKU (card-secret pools live per SKU)
pub type SkuId = i64;

/// Card secret ID - one discrete pre-provisioned secret in a pool
pub type SecretId = i64;

/// Coupon ID
pub type CouponId = i64;

/// Promotion ID
pub type PromotionId = i64;

/// Wallet recharge order ID
pub type RechargeId = i64;

/// ISO-4217 currency code, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a provider-reported code.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("CNY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalized() {
        let c = Currency::new(" usd ");
        assert_eq!(c.as_str(), "USD");
        assert!(c.matches("usd"));
        assert!(!c.matches("CNY"));
    }
}
