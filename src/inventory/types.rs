//! Inventory Ledger types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{ProductId, SecretId, SkuId};

/// What a reservation draws from.
///
/// Manual stock is counted per product, card-secret pools per SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockTarget {
    Product(ProductId),
    Sku(SkuId),
}

impl StockTarget {
    pub fn kind_id(&self) -> i16 {
        match self {
            StockTarget::Product(_) => 1,
            StockTarget::Sku(_) => 2,
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            StockTarget::Product(id) | StockTarget::Sku(id) => *id,
        }
    }

    pub fn from_parts(kind: i16, id: i64) -> Option<Self> {
        match kind {
            1 => Some(StockTarget::Product(id)),
            2 => Some(StockTarget::Sku(id)),
            _ => None,
        }
    }
}

impl fmt::Display for StockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockTarget::Product(id) => write!(f, "product:{}", id),
            StockTarget::Sku(id) => write!(f, "sku:{}", id),
        }
    }
}

/// Stock counters shared by both models.
///
/// `total <= 0` means unlimited (manual stock only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCounters {
    pub total: i64,
    pub locked: i64,
    pub sold: i64,
}

impl StockCounters {
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.total <= 0
    }

    /// `None` when unlimited
    pub fn available(&self) -> Option<i64> {
        if self.is_unlimited() {
            None
        } else {
            Some((self.total - self.locked - self.sold).max(0))
        }
    }

    pub fn can_reserve(&self, quantity: i64) -> bool {
        self.available().is_none_or(|a| a >= quantity)
    }
}

/// Card-secret lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum SecretStatus {
    Available = 0,
    Locked = 1,
    Sold = 2,
    Disabled = 3,
}

impl SecretStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SecretStatus::Available),
            1 => Some(SecretStatus::Locked),
            2 => Some(SecretStatus::Sold),
            3 => Some(SecretStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardSecret {
    pub id: SecretId,
    pub sku_id: SkuId,
    pub secret: String,
    pub status: SecretStatus,
    pub reservation_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ReservationState {
    Held = 0,
    Committed = 1,
    Released = 2,
}

impl ReservationState {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ReservationState::Held),
            1 => Some(ReservationState::Committed),
            2 => Some(ReservationState::Released),
            _ => None,
        }
    }
}

/// Opaque claim on stock.
///
/// For manual stock it is a counted delta; for card secrets it also pins the
/// identities of the claimed secret rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub token: String,
    /// Order number (or other owner reference) the claim was made for
    pub order_ref: String,
    pub target: StockTarget,
    pub quantity: i64,
    pub secret_ids: Vec<SecretId>,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
}

/// Result of committing a reservation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// `false` when the token had already been committed (replay)
    pub newly_committed: bool,
    /// Secrets bound to the reservation. A replay returns the same set, so a
    /// caller that crashed before recording the delivery can finish it.
    pub secrets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_available() {
        let c = StockCounters {
            total: 10,
            locked: 3,
            sold: 5,
        };
        assert_eq!(c.available(), Some(2));
        assert!(c.can_reserve(2));
        assert!(!c.can_reserve(3));

        let unlimited = StockCounters::default();
        assert!(unlimited.is_unlimited());
        assert_eq!(unlimited.available(), None);
        assert!(unlimited.can_reserve(1_000_000));
    }

    #[test]
    fn test_target_parts() {
        let t = StockTarget::Sku(42);
        assert_eq!(StockTarget::from_parts(t.kind_id(), t.raw_id()), Some(t));
        assert_eq!(StockTarget::from_parts(9, 1), None);
        assert_eq!(t.to_string(), "sku:42");
    }
}
