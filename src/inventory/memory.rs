//! In-process Inventory Ledger store.
//!
//! One mutex guards counters, secret rows and reservations together, which
//! gives every operation the same all-or-nothing behavior as the SQL version.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::error::InventoryError;
use super::types::{
    CardSecret, CommitOutcome, Reservation, ReservationState, SecretStatus, StockCounters,
    StockTarget,
};
use super::InventoryStore;
use crate::core_types::{ProductId, SecretId, SkuId};

#[derive(Default)]
struct InventoryState {
    manual: HashMap<ProductId, StockCounters>,
    pools: HashMap<SkuId, StockCounters>,
    secrets: BTreeMap<SecretId, CardSecret>,
    reservations: HashMap<String, Reservation>,
    next_secret_id: SecretId,
}

impl InventoryState {
    fn counters_mut(&mut self, target: StockTarget) -> &mut StockCounters {
        match target {
            StockTarget::Product(id) => self.manual.entry(id).or_default(),
            StockTarget::Sku(id) => self.pools.entry(id).or_default(),
        }
    }
}

#[derive(Default)]
pub struct MemoryInventory {
    state: Mutex<InventoryState>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Secret rows of a SKU pool (admin/test inspection)
    pub fn secrets_of(&self, sku_id: SkuId) -> Vec<CardSecret> {
        self.lock()
            .secrets
            .values()
            .filter(|s| s.sku_id == sku_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn reserve(
        &self,
        order_ref: &str,
        target: StockTarget,
        quantity: i64,
    ) -> Result<Reservation, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        let mut state = self.lock();
        let token = Uuid::new_v4().to_string();

        let secret_ids = match target {
            StockTarget::Product(_) => {
                let counters = state.counters_mut(target);
                if !counters.can_reserve(quantity) {
                    return Err(InventoryError::InsufficientStock {
                        target,
                        requested: quantity,
                    });
                }
                counters.locked += quantity;
                Vec::new()
            }
            StockTarget::Sku(sku_id) => {
                let mut candidates: Vec<&CardSecret> = state
                    .secrets
                    .values()
                    .filter(|s| s.sku_id == sku_id && s.status == SecretStatus::Available)
                    .collect();
                candidates.sort_by_key(|s| (s.created_at, s.id));
                if (candidates.len() as i64) < quantity {
                    return Err(InventoryError::InsufficientStock {
                        target,
                        requested: quantity,
                    });
                }
                let ids: Vec<SecretId> = candidates
                    .iter()
                    .take(quantity as usize)
                    .map(|s| s.id)
                    .collect();
                for id in &ids {
                    if let Some(secret) = state.secrets.get_mut(id) {
                        secret.status = SecretStatus::Locked;
                        secret.reservation_token = Some(token.clone());
                    }
                }
                state.counters_mut(target).locked += quantity;
                ids
            }
        };

        let reservation = Reservation {
            token: token.clone(),
            order_ref: order_ref.to_string(),
            target,
            quantity,
            secret_ids,
            state: ReservationState::Held,
            created_at: Utc::now(),
        };
        state.reservations.insert(token, reservation.clone());
        Ok(reservation)
    }

    async fn commit(&self, token: &str) -> Result<CommitOutcome, InventoryError> {
        let mut state = self.lock();
        let reservation = state
            .reservations
            .get(token)
            .cloned()
            .ok_or_else(|| InventoryError::ReservationNotFound(token.to_string()))?;

        match reservation.state {
            ReservationState::Committed => {
                let secrets = reservation
                    .secret_ids
                    .iter()
                    .filter_map(|id| state.secrets.get(id).map(|s| s.secret.clone()))
                    .collect();
                return Ok(CommitOutcome {
                    newly_committed: false,
                    secrets,
                });
            }
            ReservationState::Released => {
                return Err(InventoryError::ReservationReleased(token.to_string()));
            }
            ReservationState::Held => {}
        }

        let mut revealed = Vec::with_capacity(reservation.secret_ids.len());
        for id in &reservation.secret_ids {
            if let Some(secret) = state.secrets.get_mut(id)
                && secret.status == SecretStatus::Locked
            {
                secret.status = SecretStatus::Sold;
                revealed.push(secret.secret.clone());
            }
        }
        let counters = state.counters_mut(reservation.target);
        counters.locked = (counters.locked - reservation.quantity).max(0);
        counters.sold += reservation.quantity;
        if let Some(r) = state.reservations.get_mut(token) {
            r.state = ReservationState::Committed;
        }

        Ok(CommitOutcome {
            newly_committed: true,
            secrets: revealed,
        })
    }

    async fn release(&self, token: &str) -> Result<bool, InventoryError> {
        let mut state = self.lock();
        let reservation = state
            .reservations
            .get(token)
            .cloned()
            .ok_or_else(|| InventoryError::ReservationNotFound(token.to_string()))?;

        match reservation.state {
            ReservationState::Released => return Ok(false),
            ReservationState::Committed => {
                return Err(InventoryError::ReservationCommitted(token.to_string()));
            }
            ReservationState::Held => {}
        }

        for id in &reservation.secret_ids {
            if let Some(secret) = state.secrets.get_mut(id)
                && secret.status == SecretStatus::Locked
            {
                secret.status = SecretStatus::Available;
                secret.reservation_token = None;
            }
        }
        let counters = state.counters_mut(reservation.target);
        counters.locked = (counters.locked - reservation.quantity).max(0);
        if let Some(r) = state.reservations.get_mut(token) {
            r.state = ReservationState::Released;
        }
        Ok(true)
    }

    async fn get_reservation(&self, token: &str) -> Result<Option<Reservation>, InventoryError> {
        Ok(self.lock().reservations.get(token).cloned())
    }

    async fn counters(&self, target: StockTarget) -> Result<StockCounters, InventoryError> {
        let state = self.lock();
        let counters = match target {
            StockTarget::Product(id) => state.manual.get(&id),
            StockTarget::Sku(id) => state.pools.get(&id),
        };
        Ok(counters.copied().unwrap_or_default())
    }

    async fn set_manual_total(
        &self,
        product_id: ProductId,
        total: i64,
    ) -> Result<(), InventoryError> {
        self.lock().manual.entry(product_id).or_default().total = total;
        Ok(())
    }

    async fn add_secrets(
        &self,
        sku_id: SkuId,
        secrets: &[String],
    ) -> Result<Vec<SecretId>, InventoryError> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut ids = Vec::with_capacity(secrets.len());
        for secret in secrets {
            state.next_secret_id += 1;
            let id = state.next_secret_id;
            state.secrets.insert(
                id,
                CardSecret {
                    id,
                    sku_id,
                    secret: secret.clone(),
                    status: SecretStatus::Available,
                    reservation_token: None,
                    created_at: now,
                },
            );
            ids.push(id);
        }
        state.pools.entry(sku_id).or_default().total += secrets.len() as i64;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_manual_reserve_commit_release() {
        let inv = MemoryInventory::new();
        inv.set_manual_total(1, 3).await.unwrap();

        let r1 = inv.reserve("A", StockTarget::Product(1), 2).await.unwrap();
        let r2 = inv.reserve("B", StockTarget::Product(1), 1).await.unwrap();
        assert!(matches!(
            inv.reserve("C", StockTarget::Product(1), 1).await,
            Err(InventoryError::InsufficientStock { .. })
        ));

        let out = inv.commit(&r1.token).await.unwrap();
        assert!(out.newly_committed);
        assert!(inv.release(&r2.token).await.unwrap());
        assert!(!inv.release(&r2.token).await.unwrap());

        let c = inv.counters(StockTarget::Product(1)).await.unwrap();
        assert_eq!((c.total, c.locked, c.sold), (3, 0, 2));
        assert_eq!(c.available(), Some(1));
    }

    #[tokio::test]
    async fn test_unlimited_manual_stock() {
        let inv = MemoryInventory::new();
        let r = inv.reserve("A", StockTarget::Product(9), 1000).await.unwrap();
        inv.commit(&r.token).await.unwrap();
        let c = inv.counters(StockTarget::Product(9)).await.unwrap();
        assert_eq!(c.sold, 1000);
        assert_eq!(c.available(), None);
    }

    #[tokio::test]
    async fn test_secret_pool_fifo_and_commit_replay() {
        let inv = MemoryInventory::new();
        inv.add_secrets(5, &["first".into(), "second".into(), "third".into()])
            .await
            .unwrap();

        let r = inv.reserve("A", StockTarget::Sku(5), 2).await.unwrap();
        let out = inv.commit(&r.token).await.unwrap();
        assert_eq!(out.secrets, vec!["first".to_string(), "second".to_string()]);

        let replay = inv.commit(&r.token).await.unwrap();
        assert!(!replay.newly_committed);
        assert_eq!(replay.secrets, out.secrets);

        let c = inv.counters(StockTarget::Sku(5)).await.unwrap();
        assert_eq!((c.total, c.locked, c.sold), (3, 0, 2));
    }

    #[tokio::test]
    async fn test_release_returns_secrets_to_pool() {
        let inv = MemoryInventory::new();
        inv.add_secrets(5, &["only".into()]).await.unwrap();
        let r = inv.reserve("A", StockTarget::Sku(5), 1).await.unwrap();
        assert!(inv.reserve("B", StockTarget::Sku(5), 1).await.is_err());
        inv.release(&r.token).await.unwrap();
        assert!(matches!(
            inv.commit(&r.token).await,
            Err(InventoryError::ReservationReleased(_))
        ));
        let again = inv.reserve("B", StockTarget::Sku(5), 1).await.unwrap();
        assert_eq!(again.secret_ids, r.secret_ids);
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_oversell() {
        let inv = Arc::new(MemoryInventory::new());
        inv.set_manual_total(1, 7).await.unwrap();
        inv.add_secrets(2, &(0..7).map(|i| format!("S{i}")).collect::<Vec<_>>())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..40 {
            let inv = inv.clone();
            let target = if i % 2 == 0 {
                StockTarget::Product(1)
            } else {
                StockTarget::Sku(2)
            };
            handles.push(tokio::spawn(async move {
                inv.reserve(&format!("O{i}"), target, 1).await.is_ok()
            }));
        }
        let ok = join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(ok, 14);

        let manual = inv.counters(StockTarget::Product(1)).await.unwrap();
        let pool = inv.counters(StockTarget::Sku(2)).await.unwrap();
        assert_eq!(manual.locked, 7);
        assert_eq!(pool.locked, 7);
    }
}
