//! Payment channel cache
//!
//! Read-through over [`PaymentStore::list_channels`] with a TTL; admin writes
//! go through [`ChannelCache::upsert`], which invalidates.

use cached::{Cached, TimedCache};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::PaymentStore;
use super::error::PaymentError;
use super::types::PaymentChannel;
use crate::core_types::ChannelId;

pub struct ChannelCache {
    store: Arc<dyn PaymentStore>,
    cache: Mutex<TimedCache<(), Arc<Vec<PaymentChannel>>>>,
}

impl ChannelCache {
    pub fn new(store: Arc<dyn PaymentStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            cache: Mutex::new(TimedCache::with_lifespan(ttl_secs.max(1))),
        }
    }

    /// Every channel, sorted by `sort_order` then id
    pub async fn all(&self) -> Result<Arc<Vec<PaymentChannel>>, PaymentError> {
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.cache_get(&()) {
            return Ok(hit.clone());
        }
        let mut channels = self.store.list_channels().await?;
        channels.sort_by_key(|c| (c.sort_order, c.id));
        let channels = Arc::new(channels);
        debug!(count = channels.len(), "Payment channels loaded");
        cache.cache_set((), channels.clone());
        Ok(channels)
    }

    /// Active channels, for the storefront
    pub async fn active(&self) -> Result<Vec<PaymentChannel>, PaymentError> {
        Ok(self.all().await?.iter().filter(|c| c.active).cloned().collect())
    }

    pub async fn get(&self, id: ChannelId) -> Result<PaymentChannel, PaymentError> {
        self.all()
            .await?
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(PaymentError::ChannelNotFound(id))
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.cache_clear();
    }

    pub async fn upsert(&self, channel: PaymentChannel) -> Result<PaymentChannel, PaymentError> {
        let saved = self.store.upsert_channel(channel).await?;
        self.invalidate().await;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::memory::MemoryPaymentStore;
    use crate::payment::providers::testing::channel;
    use crate::payment::types::{InteractionMode, ProviderType};

    #[tokio::test]
    async fn test_cache_serves_stale_until_invalidated() {
        let store = Arc::new(MemoryPaymentStore::new());
        let cache = ChannelCache::new(store.clone(), 3600);

        let mut ch = channel(ProviderType::Epay, &[InteractionMode::Redirect], serde_json::json!({}));
        ch.id = 0;
        let saved = cache.upsert(ch).await.unwrap();
        assert_eq!(cache.active().await.unwrap().len(), 1);

        // Direct store write bypasses the cache
        let mut disabled = saved.clone();
        disabled.active = false;
        store.upsert_channel(disabled.clone()).await.unwrap();
        assert_eq!(cache.active().await.unwrap().len(), 1);

        cache.invalidate().await;
        assert!(cache.active().await.unwrap().is_empty());
        assert!(!cache.get(saved.id).await.unwrap().active);
        assert!(matches!(cache.get(99).await, Err(PaymentError::ChannelNotFound(99))));
    }
}
