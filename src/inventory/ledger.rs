//! Order-level reservation helpers on top of [`InventoryStore`]

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::error::InventoryError;
use super::types::{CommitOutcome, Reservation, StockTarget};
use super::InventoryStore;

/// Inventory Ledger facade used by orders and settlement
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn InventoryStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    pub async fn reserve(
        &self,
        order_ref: &str,
        target: StockTarget,
        quantity: i64,
    ) -> Result<Reservation, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        self.store.reserve(order_ref, target, quantity).await
    }

    /// Reserve every line or nothing.
    ///
    /// On failure the reservations already taken for earlier lines are
    /// released before the error is returned.
    pub async fn reserve_all(
        &self,
        order_ref: &str,
        lines: &[(StockTarget, i64)],
    ) -> Result<Vec<Reservation>, InventoryError> {
        let mut taken: Vec<Reservation> = Vec::with_capacity(lines.len());
        for (target, quantity) in lines {
            match self.reserve(order_ref, *target, *quantity).await {
                Ok(r) => taken.push(r),
                Err(e) => {
                    debug!(order_ref, target = %target, error = %e, "Reservation failed, rolling back");
                    let tokens: Vec<String> = taken.into_iter().map(|r| r.token).collect();
                    self.release_tokens(&tokens).await;
                    return Err(e);
                }
            }
        }
        Ok(taken)
    }

    pub async fn commit(&self, token: &str) -> Result<CommitOutcome, InventoryError> {
        self.store.commit(token).await
    }

    pub async fn release(&self, token: &str) -> Result<bool, InventoryError> {
        self.store.release(token).await
    }

    /// Best-effort release used on compensation paths. Committed tokens are
    /// left alone; anything else is logged.
    pub async fn release_tokens(&self, tokens: &[String]) {
        for token in tokens {
            let token = token.as_str();
            match self.store.release(token).await {
                Ok(_) => {}
                Err(InventoryError::ReservationCommitted(_)) => {
                    warn!(token, "Skip release: reservation already committed");
                }
                Err(e) => error!(token, error = %e, "Failed to release reservation"),
            }
        }
    }

    /// `None` when unlimited
    pub async fn available(&self, target: StockTarget) -> Result<Option<i64>, InventoryError> {
        Ok(self.store.counters(target).await?.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MemoryInventory;

    #[tokio::test]
    async fn test_reserve_all_is_all_or_nothing() {
        let store = Arc::new(MemoryInventory::new());
        store.set_manual_total(1, 5).await.unwrap();
        store.add_secrets(2, &["A".into()]).await.unwrap();
        let ledger = InventoryLedger::new(store.clone());

        let err = ledger
            .reserve_all("DS1", &[(StockTarget::Product(1), 2), (StockTarget::Sku(2), 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));

        // The product reservation was compensated
        let c = store.counters(StockTarget::Product(1)).await.unwrap();
        assert_eq!(c.locked, 0);
        assert_eq!(c.available(), Some(5));
        let s = store.counters(StockTarget::Sku(2)).await.unwrap();
        assert_eq!(s.locked, 0);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_ledger_futures_are_send() {
        let ledger = InventoryLedger::new(Arc::new(MemoryInventory::new()));
        let tokens = vec!["t1".to_string()];
        assert_send(&ledger.release_tokens(&tokens));
        assert_send(&ledger.reserve_all("DS1", &[(StockTarget::Product(1), 1)]));
    }

    #[tokio::test]
    async fn test_release_tokens_skips_unknown_and_frees_held() {
        let store = Arc::new(MemoryInventory::new());
        store.set_manual_total(1, 3).await.unwrap();
        let ledger = InventoryLedger::new(store.clone());
        let r = ledger.reserve("DS1", StockTarget::Product(1), 2).await.unwrap();

        ledger.release_tokens(&[r.token, "missing".to_string()]).await;
        let c = store.counters(StockTarget::Product(1)).await.unwrap();
        assert_eq!(c.locked, 0);
    }

    #[tokio::test]
    async fn test_reserve_rejects_zero_quantity() {
        let ledger = InventoryLedger::new(Arc::new(MemoryInventory::new()));
        assert_eq!(
            ledger.reserve("DS1", StockTarget::Product(1), 0).await.unwrap_err(),
            InventoryError::InvalidQuantity
        );
    }
}
