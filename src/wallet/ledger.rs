//! Wallet Ledger service
//!
//! The only entry point that changes a balance. Recharge, admin adjustment,
//! refund-to-wallet, order payment and gift cards all land in [`WalletLedger::adjust`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::WalletError;
use super::types::{
    AdjustOutcome, AdjustRequest, GiftCardStatus, TxKind, WalletAccount, WalletTransaction,
};
use super::WalletStore;
use crate::core_types::{Currency, UserId};
use crate::money::AMOUNT_SCALE;

#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
    currency: Currency,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn WalletStore>, currency: Currency) -> Self {
        Self { store, currency }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub async fn account(&self, user_id: UserId) -> Result<WalletAccount, WalletError> {
        self.store.account(user_id, &self.currency).await
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Decimal, WalletError> {
        Ok(self.account(user_id).await?.balance)
    }

    pub async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        self.store
            .transactions(user_id, limit.clamp(1, 200), offset.max(0))
            .await
    }

    /// Apply one signed balance change
    pub async fn adjust(&self, req: AdjustRequest) -> Result<AdjustOutcome, WalletError> {
        if req.delta.is_zero() || req.delta.normalize().scale() > AMOUNT_SCALE {
            return Err(WalletError::InvalidAmount);
        }
        if req.correlation.trim().is_empty() {
            return Err(WalletError::InvalidAmount);
        }
        let outcome = self.store.adjust(&req, &self.currency).await?;
        if outcome.applied {
            info!(
                user_id = req.user_id,
                kind = req.kind.as_str(),
                delta = %req.delta,
                balance = %outcome.account.balance,
                correlation = %req.correlation,
                "Wallet adjusted"
            );
        }
        Ok(outcome)
    }

    /// Admin adjustment; `request_id` makes resubmission safe
    pub async fn admin_adjust(
        &self,
        user_id: UserId,
        delta: Decimal,
        remark: &str,
        admin_id: UserId,
        request_id: &str,
    ) -> Result<AdjustOutcome, WalletError> {
        self.adjust(
            AdjustRequest::new(user_id, delta, TxKind::AdminAdjust, format!("admin:{request_id}"))
                .remark(format!("[admin {admin_id}] {remark}")),
        )
        .await
    }

    /// Redeem a gift card into the user's wallet.
    ///
    /// A card already redeemed by the same user re-applies its credit, which
    /// is a no-op unless an earlier attempt stopped between the two steps.
    pub async fn redeem_gift_card(
        &self,
        user_id: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<AdjustOutcome, WalletError> {
        let card = self
            .store
            .get_gift_card(code.trim())
            .await?
            .ok_or(WalletError::GiftCardNotFound)?;

        if !card.currency.matches(self.currency.as_str()) {
            return Err(WalletError::CurrencyMismatch {
                expected: self.currency.to_string(),
                actual: card.currency.to_string(),
            });
        }
        match card.status {
            GiftCardStatus::Disabled => return Err(WalletError::GiftCardDisabled),
            GiftCardStatus::Redeemed if card.redeemed_by != Some(user_id) => {
                return Err(WalletError::GiftCardRedeemed);
            }
            GiftCardStatus::Redeemed => {}
            GiftCardStatus::Unused => {
                if card.is_expired(now) {
                    return Err(WalletError::GiftCardExpired);
                }
                if !self.store.mark_gift_card_redeemed(card.id, user_id, now).await? {
                    warn!(code = %card.code, user_id, "Gift card redeemed concurrently");
                    return Err(WalletError::GiftCardRedeemed);
                }
            }
        }

        self.adjust(
            AdjustRequest::new(user_id, card.amount, TxKind::GiftCard, format!("gift_card:{}", card.id))
                .remark(format!("Gift card {}", card.code)),
        )
        .await
    }
}
