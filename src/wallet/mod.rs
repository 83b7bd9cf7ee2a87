//! Wallet Ledger
//!
//! Account balance plus an append-only transaction log. Every balance change
//! goes through [`WalletStore::adjust`], which checks the balance, updates the
//! account and appends the log row as one atomic unit, keyed by a unique
//! correlation so replays apply nothing twice.

pub mod db;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::{Currency, PaymentId, RechargeId, UserId};

pub use db::PgWalletStore;
pub use error::WalletError;
pub use ledger::WalletLedger;
pub use memory::MemoryWalletStore;
pub use types::{
    AdjustOutcome, AdjustRequest, GiftCard, GiftCardStatus, RechargeOrder, RechargeStatus,
    TxKind, WalletAccount, WalletTransaction,
};

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Get the account, creating an empty one in `currency` if missing
    async fn account(&self, user_id: UserId, currency: &Currency) -> Result<WalletAccount, WalletError>;

    /// Apply a signed delta atomically.
    ///
    /// A correlation that was already applied returns the original row with
    /// `applied = false`; the same correlation with a different user or delta
    /// is a [`WalletError::CorrelationConflict`].
    async fn adjust(
        &self,
        req: &AdjustRequest,
        currency: &Currency,
    ) -> Result<AdjustOutcome, WalletError>;

    /// Newest first
    async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, WalletError>;

    async fn find_transaction(&self, correlation: &str) -> Result<Option<WalletTransaction>, WalletError>;

    // === Recharge orders ===

    async fn insert_recharge(&self, recharge: RechargeOrder) -> Result<RechargeOrder, WalletError>;

    async fn get_recharge(&self, id: RechargeId) -> Result<Option<RechargeOrder>, WalletError>;

    async fn get_recharge_by_no(&self, recharge_no: &str) -> Result<Option<RechargeOrder>, WalletError>;

    async fn attach_recharge_payment(
        &self,
        id: RechargeId,
        payment_id: PaymentId,
    ) -> Result<(), WalletError>;

    /// CAS on status
    async fn transition_recharge(
        &self,
        id: RechargeId,
        from: RechargeStatus,
        to: RechargeStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, WalletError>;

    // === Gift cards ===

    async fn insert_gift_card(
        &self,
        code: &str,
        amount: Decimal,
        currency: &Currency,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GiftCard, WalletError>;

    async fn get_gift_card(&self, code: &str) -> Result<Option<GiftCard>, WalletError>;

    /// CAS `unused -> redeemed`
    async fn mark_gift_card_redeemed(
        &self,
        id: i64,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, WalletError>;
}
