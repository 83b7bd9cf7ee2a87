//! In-process payment store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::PaymentStore;
use super::error::PaymentError;
use super::types::{Payment, PaymentChannel, PaymentIntent, PaymentStatus};
use crate::core_types::{ChannelId, OrderId, PaymentId};
use crate::settlement::state::SettlePhase;

#[derive(Default)]
struct PaymentState {
    payments: BTreeMap<PaymentId, Payment>,
    by_no: HashMap<String, PaymentId>,
    channels: BTreeMap<ChannelId, PaymentChannel>,
    next_id: PaymentId,
    next_channel_id: ChannelId,
}

#[derive(Default)]
pub struct MemoryPaymentStore {
    state: Mutex<PaymentState>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert(&self, mut payment: Payment) -> Result<Payment, PaymentError> {
        let mut state = self.lock();
        if state.by_no.contains_key(&payment.payment_no) {
            return Err(PaymentError::DatabaseError(format!(
                "duplicate payment_no {}",
                payment.payment_no
            )));
        }
        state.next_id += 1;
        payment.id = state.next_id;
        state.by_no.insert(payment.payment_no.clone(), payment.id);
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn get_by_no(&self, payment_no: &str) -> Result<Option<Payment>, PaymentError> {
        let state = self.lock();
        Ok(state
            .by_no
            .get(payment_no)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, PaymentError> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|p| p.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn set_intent(&self, id: PaymentId, intent: &PaymentIntent) -> Result<(), PaymentError> {
        let mut state = self.lock();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::PaymentNotFound(id.to_string()))?;
        payment.pay_url = intent.pay_url.clone();
        payment.qr_code = intent.qr_code.clone();
        if intent.provider_ref.is_some() {
            payment.provider_ref = intent.provider_ref.clone();
        }
        payment.provider_payload = intent.payload.clone();
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        phase: SettlePhase,
        provider_ref: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PaymentError> {
        let mut state = self.lock();
        let Some(payment) = state.payments.get_mut(&id) else {
            return Ok(false);
        };
        if payment.status != from {
            return Ok(false);
        }
        payment.status = to;
        payment.settle_phase = phase;
        if let Some(r) = provider_ref {
            payment.provider_ref = Some(r.to_string());
        }
        if paid_at.is_some() {
            payment.paid_at = paid_at;
        }
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn advance_phase(
        &self,
        id: PaymentId,
        from: SettlePhase,
        to: SettlePhase,
    ) -> Result<bool, PaymentError> {
        let mut state = self.lock();
        match state.payments.get_mut(&id) {
            Some(p) if p.settle_phase == from => {
                p.settle_phase = to;
                p.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_unsettled(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|p| p.status.is_terminal() && !p.settle_phase.is_terminal())
            .filter(|p| p.updated_at <= older_than)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.expires_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, PaymentError> {
        Ok(self.lock().channels.values().cloned().collect())
    }

    async fn upsert_channel(&self, mut channel: PaymentChannel) -> Result<PaymentChannel, PaymentError> {
        let mut state = self.lock();
        if channel.id == 0 {
            state.next_channel_id += 1;
            channel.id = state.next_channel_id;
        } else {
            state.next_channel_id = state.next_channel_id.max(channel.id);
        }
        state.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<PaymentChannel>, PaymentError> {
        Ok(self.lock().channels.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::testing::payment;
    use crate::payment::types::ProviderType;
    use chrono::Duration;

    #[tokio::test]
    async fn test_status_cas_single_winner() {
        let store = std::sync::Arc::new(MemoryPaymentStore::new());
        let p = store.insert(payment("P1", ProviderType::Epay)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .transition(
                            p.id,
                            PaymentStatus::Pending,
                            PaymentStatus::Success,
                            SettlePhase::Claimed,
                            Some("T-1"),
                            Some(Utc::now()),
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();
        let wins = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(wins, 1);

        let row = store.get_by_no("P1").await.unwrap().unwrap();
        assert_eq!(row.settle_phase, SettlePhase::Claimed);
        assert_eq!(row.provider_ref.as_deref(), Some("T-1"));
        assert!(store.insert(payment("P1", ProviderType::Epay)).await.is_err());
    }

    #[tokio::test]
    async fn test_recovery_and_expiry_scans() {
        let store = MemoryPaymentStore::new();
        let now = Utc::now();
        let mut stale = payment("P1", ProviderType::Epay);
        stale.expires_at = now - Duration::minutes(1);
        let stale = store.insert(stale).await.unwrap();
        let mut fresh = payment("P2", ProviderType::Epay);
        fresh.expires_at = now + Duration::minutes(10);
        store.insert(fresh).await.unwrap();

        let expired = store.find_expired_pending(now, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        store
            .transition(stale.id, PaymentStatus::Pending, PaymentStatus::Success, SettlePhase::Claimed, None, None)
            .await
            .unwrap();
        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(store.find_unsettled(later, 10).await.unwrap().len(), 1);

        store
            .advance_phase(stale.id, SettlePhase::Claimed, SettlePhase::Done)
            .await
            .unwrap();
        assert!(store.find_unsettled(later, 10).await.unwrap().is_empty());
        assert!(!store
            .advance_phase(stale.id, SettlePhase::Claimed, SettlePhase::Done)
            .await
            .unwrap());
    }
}
