//! In-process wallet store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::WalletError;
use super::types::{
    AdjustOutcome, AdjustRequest, GiftCard, GiftCardStatus, RechargeOrder, RechargeStatus,
    WalletAccount, WalletTransaction,
};
use super::WalletStore;
use crate::core_types::{Currency, PaymentId, RechargeId, UserId};

#[derive(Default)]
struct WalletState {
    accounts: HashMap<UserId, WalletAccount>,
    transactions: Vec<WalletTransaction>,
    by_correlation: HashMap<String, usize>,
    recharges: HashMap<RechargeId, RechargeOrder>,
    gift_cards: HashMap<i64, GiftCard>,
    next_recharge_id: RechargeId,
    next_gift_card_id: i64,
}

impl WalletState {
    fn account_mut(&mut self, user_id: UserId, currency: &Currency) -> &mut WalletAccount {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| WalletAccount {
                user_id,
                balance: Decimal::ZERO,
                currency: currency.clone(),
                version: 0,
                updated_at: Utc::now(),
            })
    }
}

#[derive(Default)]
pub struct MemoryWalletStore {
    state: Mutex<WalletState>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn account(&self, user_id: UserId, currency: &Currency) -> Result<WalletAccount, WalletError> {
        Ok(self.lock().account_mut(user_id, currency).clone())
    }

    async fn adjust(
        &self,
        req: &AdjustRequest,
        currency: &Currency,
    ) -> Result<AdjustOutcome, WalletError> {
        let mut state = self.lock();

        if let Some(&idx) = state.by_correlation.get(&req.correlation) {
            let existing = state.transactions[idx].clone();
            if existing.user_id != req.user_id || existing.delta != req.delta {
                return Err(WalletError::CorrelationConflict(req.correlation.clone()));
            }
            let account = state.account_mut(req.user_id, currency).clone();
            return Ok(AdjustOutcome {
                account,
                transaction: existing,
                applied: false,
            });
        }

        let account = state.account_mut(req.user_id, currency);
        if account.balance + req.delta < Decimal::ZERO {
            return Err(WalletError::InsufficientBalance {
                available: account.balance,
                requested: -req.delta,
            });
        }
        let now = Utc::now();
        account.balance += req.delta;
        account.version += 1;
        account.updated_at = now;
        let account = account.clone();

        let transaction = WalletTransaction {
            id: state.transactions.len() as i64 + 1,
            user_id: req.user_id,
            kind: req.kind,
            delta: req.delta,
            balance_after: account.balance,
            remark: req.remark.clone(),
            correlation: req.correlation.clone(),
            order_id: req.order_id,
            payment_id: req.payment_id,
            created_at: now,
        };
        let idx = state.transactions.len();
        state.transactions.push(transaction.clone());
        state.by_correlation.insert(req.correlation.clone(), idx);

        Ok(AdjustOutcome {
            account,
            transaction,
            applied: true,
        })
    }

    async fn transactions(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        Ok(self
            .lock()
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_transaction(&self, correlation: &str) -> Result<Option<WalletTransaction>, WalletError> {
        let state = self.lock();
        Ok(state
            .by_correlation
            .get(correlation)
            .map(|&idx| state.transactions[idx].clone()))
    }

    async fn insert_recharge(&self, mut recharge: RechargeOrder) -> Result<RechargeOrder, WalletError> {
        let mut state = self.lock();
        state.next_recharge_id += 1;
        recharge.id = state.next_recharge_id;
        state.recharges.insert(recharge.id, recharge.clone());
        Ok(recharge)
    }

    async fn get_recharge(&self, id: RechargeId) -> Result<Option<RechargeOrder>, WalletError> {
        Ok(self.lock().recharges.get(&id).cloned())
    }

    async fn get_recharge_by_no(&self, recharge_no: &str) -> Result<Option<RechargeOrder>, WalletError> {
        Ok(self
            .lock()
            .recharges
            .values()
            .find(|r| r.recharge_no == recharge_no)
            .cloned())
    }

    async fn attach_recharge_payment(
        &self,
        id: RechargeId,
        payment_id: PaymentId,
    ) -> Result<(), WalletError> {
        if let Some(r) = self.lock().recharges.get_mut(&id) {
            r.payment_id = Some(payment_id);
        }
        Ok(())
    }

    async fn transition_recharge(
        &self,
        id: RechargeId,
        from: RechargeStatus,
        to: RechargeStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, WalletError> {
        let mut state = self.lock();
        match state.recharges.get_mut(&id) {
            Some(r) if r.status == from => {
                r.status = to;
                if paid_at.is_some() {
                    r.paid_at = paid_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_gift_card(
        &self,
        code: &str,
        amount: Decimal,
        currency: &Currency,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GiftCard, WalletError> {
        let mut state = self.lock();
        if state.gift_cards.values().any(|g| g.code == code) {
            return Err(WalletError::DatabaseError(format!("duplicate gift card {code}")));
        }
        state.next_gift_card_id += 1;
        let card = GiftCard {
            id: state.next_gift_card_id,
            code: code.to_string(),
            amount,
            currency: currency.clone(),
            status: GiftCardStatus::Unused,
            redeemed_by: None,
            redeemed_at: None,
            expires_at,
        };
        state.gift_cards.insert(card.id, card.clone());
        Ok(card)
    }

    async fn get_gift_card(&self, code: &str) -> Result<Option<GiftCard>, WalletError> {
        Ok(self
            .lock()
            .gift_cards
            .values()
            .find(|g| g.code == code)
            .cloned())
    }

    async fn mark_gift_card_redeemed(
        &self,
        id: i64,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, WalletError> {
        let mut state = self.lock();
        match state.gift_cards.get_mut(&id) {
            Some(g) if g.status == GiftCardStatus::Unused => {
                g.status = GiftCardStatus::Redeemed;
                g.redeemed_by = Some(user_id);
                g.redeemed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
