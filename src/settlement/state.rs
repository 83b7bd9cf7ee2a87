//! Settlement FSM Phase Definitions
//!
//! Stored on the payment row as SMALLINT (`settle_phase`).
//!
//! ```text
//! NONE ──► CLAIMED ──► OWNER_SETTLED ──► STOCK_COMMITTED ──► COUNTERS_APPLIED ──► DONE
//!  │          │              │
//!  │          └──────────────┴──► NEEDS_REFUND
//!  └──► RELEASED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum SettlePhase {
    /// Nothing applied yet
    None = 0,

    /// Won the `pending -> success` CAS; only the winner drives forward
    Claimed = 10,

    /// Order rows paid (wallet part debited), or recharge credited
    OwnerSettled = 20,

    /// Reservations committed, secrets delivered
    StockCommitted = 30,

    /// Coupon / promotion usage recorded
    CountersApplied = 40,

    /// Terminal: notification emitted
    Done = 50,

    /// Terminal: money received but the order could not take it
    NeedsRefund = -10,

    /// Terminal: failure path applied, reservations released
    Released = -20,
}

impl SettlePhase {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlePhase::Done | SettlePhase::NeedsRefund | SettlePhase::Released
        )
    }

    /// Success path started but not finished
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SettlePhase::Claimed
                | SettlePhase::OwnerSettled
                | SettlePhase::StockCommitted
                | SettlePhase::CountersApplied
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SettlePhase::None),
            10 => Some(SettlePhase::Claimed),
            20 => Some(SettlePhase::OwnerSettled),
            30 => Some(SettlePhase::StockCommitted),
            40 => Some(SettlePhase::CountersApplied),
            50 => Some(SettlePhase::Done),
            -10 => Some(SettlePhase::NeedsRefund),
            -20 => Some(SettlePhase::Released),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlePhase::None => "NONE",
            SettlePhase::Claimed => "CLAIMED",
            SettlePhase::OwnerSettled => "OWNER_SETTLED",
            SettlePhase::StockCommitted => "STOCK_COMMITTED",
            SettlePhase::CountersApplied => "COUNTERS_APPLIED",
            SettlePhase::Done => "DONE",
            SettlePhase::NeedsRefund => "NEEDS_REFUND",
            SettlePhase::Released => "RELEASED",
        }
    }

    /// Next phase on the success path
    pub fn next(&self) -> Option<SettlePhase> {
        match self {
            SettlePhase::Claimed => Some(SettlePhase::OwnerSettled),
            SettlePhase::OwnerSettled => Some(SettlePhase::StockCommitted),
            SettlePhase::StockCommitted => Some(SettlePhase::CountersApplied),
            SettlePhase::CountersApplied => Some(SettlePhase::Done),
            _ => None,
        }
    }
}

impl fmt::Display for SettlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SettlePhase {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SettlePhase::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_order() {
        let mut phase = SettlePhase::Claimed;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(phase, SettlePhase::Done);
        assert_eq!(seen.len(), 5);
        assert!(seen[..4].iter().all(|p| p.is_in_flight()));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(SettlePhase::Done.is_terminal());
        assert!(SettlePhase::NeedsRefund.is_terminal());
        assert!(SettlePhase::Released.is_terminal());
        assert!(!SettlePhase::None.is_terminal());
        assert!(!SettlePhase::Claimed.is_terminal());
        assert_eq!(SettlePhase::NeedsRefund.next(), None);
    }

    #[test]
    fn test_phase_id_roundtrip() {
        for id in [0, 10, 20, 30, 40, 50, -10, -20] {
            let phase = SettlePhase::from_id(id).unwrap();
            assert_eq!(phase.id(), id);
        }
        assert!(SettlePhase::from_id(999).is_none());
        assert_eq!(SettlePhase::OwnerSettled.to_string(), "OWNER_SETTLED");
    }
}
