//! Order state machine
//!
//! ```text
//! PENDING_PAYMENT ──► PAID ──► FULFILLING ──► COMPLETED
//!   │    │              │          │
//!   │    │              │          └──► REFUNDED
//!   │    │              ├──► COMPLETED
//!   │    │              └──► REFUNDED
//!   │    └──► EXPIRED
//!   └──► CANCELLED
//! ```
//!
//! State IDs are stored as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum OrderStatus {
    PendingPayment = 0,
    Paid = 10,
    Fulfilling = 20,
    /// Terminal
    Completed = 30,
    /// Terminal
    Cancelled = -10,
    /// Terminal
    Expired = -20,
    /// Terminal
    Refunded = -30,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Refunded
        )
    }

    /// Money has been received for this order
    #[inline]
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Fulfilling | OrderStatus::Completed | OrderStatus::Refunded
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (PendingPayment, Expired)
                | (Paid, Fulfilling)
                | (Paid, Completed)
                | (Paid, Refunded)
                | (Fulfilling, Completed)
                | (Fulfilling, Refunded)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatus::PendingPayment),
            10 => Some(OrderStatus::Paid),
            20 => Some(OrderStatus::Fulfilling),
            30 => Some(OrderStatus::Completed),
            -10 => Some(OrderStatus::Cancelled),
            -20 => Some(OrderStatus::Expired),
            -30 => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilling => "fulfilling",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::Fulfilling,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Expired,
        OrderStatus::Refunded,
    ];

    #[test]
    fn test_no_transition_out_of_terminal() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_pending_transitions() {
        let p = OrderStatus::PendingPayment;
        assert!(p.can_transition_to(OrderStatus::Paid));
        assert!(p.can_transition_to(OrderStatus::Cancelled));
        assert!(p.can_transition_to(OrderStatus::Expired));
        assert!(!p.can_transition_to(OrderStatus::Completed));
        assert!(!p.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn test_paid_cannot_be_cancelled() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::PendingPayment));
    }

    #[test]
    fn test_id_roundtrip() {
        for s in ALL {
            assert_eq!(OrderStatus::from_id(s.id()), Some(s));
        }
        assert_eq!(OrderStatus::from_id(99), None);
    }
}
