use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{ChannelId, Currency, OrderId, PaymentId, RechargeId, UserId};

/// One row per user, created lazily on first access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    pub user_id: UserId,
    pub balance: Decimal,
    pub currency: Currency,
    /// Bumped on every balance change
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Why a balance moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TxKind {
    Recharge = 1,
    /// Wallet part of an order payment
    Payment = 2,
    Refund = 3,
    AdminAdjust = 4,
    GiftCard = 5,
    /// Compensation for a debit whose order could not be settled
    Reversal = 6,
}

impl TxKind {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TxKind::Recharge),
            2 => Some(TxKind::Payment),
            3 => Some(TxKind::Refund),
            4 => Some(TxKind::AdminAdjust),
            5 => Some(TxKind::GiftCard),
            6 => Some(TxKind::Reversal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Recharge => "recharge",
            TxKind::Payment => "payment",
            TxKind::Refund => "refund",
            TxKind::AdminAdjust => "admin_adjust",
            TxKind::GiftCard => "gift_card",
            TxKind::Reversal => "reversal",
        }
    }
}

/// Append-only ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: i64,
    pub user_id: UserId,
    pub kind: TxKind,
    /// Signed: credits positive, debits negative
    pub delta: Decimal,
    pub balance_after: Decimal,
    pub remark: String,
    /// Unique idempotency key, e.g. `payment:42:wallet`
    pub correlation: String,
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn is_credit(&self) -> bool {
        self.delta > Decimal::ZERO
    }
}

/// Input of [`super::WalletLedger::adjust`]
#[derive(Debug, Clone)]
pub struct AdjustRequest {
    pub user_id: UserId,
    pub delta: Decimal,
    pub kind: TxKind,
    pub remark: String,
    pub correlation: String,
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
}

impl AdjustRequest {
    pub fn new(user_id: UserId, delta: Decimal, kind: TxKind, correlation: impl Into<String>) -> Self {
        Self {
            user_id,
            delta,
            kind,
            remark: String::new(),
            correlation: correlation.into(),
            order_id: None,
            payment_id: None,
        }
    }

    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct AdjustOutcome {
    pub account: WalletAccount,
    pub transaction: WalletTransaction,
    /// `false` when the correlation had already been applied
    pub applied: bool,
}

/// Recharge order status, mirrors the payment it is paid by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RechargeStatus {
    Pending = 0,
    Success = 10,
    Failed = -10,
    Expired = -20,
}

impl RechargeStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RechargeStatus::Pending),
            10 => Some(RechargeStatus::Success),
            -10 => Some(RechargeStatus::Failed),
            -20 => Some(RechargeStatus::Expired),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RechargeStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeOrder {
    pub id: RechargeId,
    pub recharge_no: String,
    pub user_id: UserId,
    pub payment_id: Option<PaymentId>,
    pub channel_id: ChannelId,
    /// Credited on success
    pub amount: Decimal,
    pub fee: Decimal,
    /// `amount + fee`, charged by the provider
    pub payable_amount: Decimal,
    pub currency: Currency,
    pub status: RechargeStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum GiftCardStatus {
    Unused = 0,
    Redeemed = 1,
    Disabled = 2,
}

impl GiftCardStatus {
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(GiftCardStatus::Unused),
            1 => Some(GiftCardStatus::Redeemed),
            2 => Some(GiftCardStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftCard {
    pub id: i64,
    pub code: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: GiftCardStatus,
    pub redeemed_by: Option<UserId>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GiftCard {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}
