//! Service wiring
//!
//! Builds the whole core from an [`AppConfig`]: PostgreSQL stores when
//! `postgres_url` is set (schema bootstrapped first), in-memory stores
//! otherwise.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogStore, MemoryCatalog, PgCatalog};
use crate::config::AppConfig;
use crate::core_types::Currency;
use crate::db::Database;
use crate::gateway::auth::JwtAuth;
use crate::gateway::state::AppState;
use crate::inventory::{InventoryLedger, InventoryStore, MemoryInventory, PgInventory};
use crate::notify::{LogNotifier, Notifier};
use crate::order::{MemoryOrderStore, OrderNoGenerator, OrderService, OrderStore, PgOrderStore};
use crate::payment::{
    ChannelCache, MemoryPaymentStore, PaymentError, PaymentService, PaymentStore, PgPaymentStore,
    ProviderHttp, ProviderRegistry,
};
use crate::pricing::PricingEngine;
use crate::settlement::{ExpirySweeper, RecoveryWorker, SettlementCoordinator};
use crate::wallet::{MemoryWalletStore, PgWalletStore, WalletLedger, WalletStore};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payment setup: {0}")]
    Payment(#[from] PaymentError),
}

/// One set of store handles
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub orders: Arc<dyn OrderStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub wallet: Arc<dyn WalletStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            inventory: Arc::new(MemoryInventory::new()),
            orders: Arc::new(MemoryOrderStore::new()),
            payments: Arc::new(MemoryPaymentStore::new()),
            wallet: Arc::new(MemoryWalletStore::new()),
        }
    }

    pub fn postgres(db: &Database) -> Self {
        let pool = db.pool().clone();
        Self {
            catalog: Arc::new(PgCatalog::new(pool.clone())),
            inventory: Arc::new(PgInventory::new(pool.clone())),
            orders: Arc::new(PgOrderStore::new(pool.clone())),
            payments: Arc::new(PgPaymentStore::new(pool.clone())),
            wallet: Arc::new(PgWalletStore::new(pool)),
        }
    }
}

/// Everything `main` needs to serve
pub struct App {
    pub coordinator: Arc<SettlementCoordinator>,
    pub recovery: RecoveryWorker,
    pub sweeper: ExpirySweeper,
    pub state: Arc<AppState>,
}

impl App {
    /// Connect (or not) and wire
    pub async fn build(config: &AppConfig) -> Result<Self, AppError> {
        let (stores, pg_db) = match &config.postgres_url {
            Some(url) => {
                let db = Database::open(url, config.postgres_max_connections).await?;
                (Stores::postgres(&db), Some(Arc::new(db)))
            }
            None => {
                tracing::warn!("postgres_url not set; using in-memory stores");
                (Stores::memory(), None)
            }
        };
        let http = ProviderHttp::new(Duration::from_secs(config.payment.http_timeout_secs.max(1)))?;
        Ok(Self::wire(
            config,
            stores,
            ProviderRegistry::with_defaults(http),
            Arc::new(LogNotifier),
            pg_db,
        ))
    }

    /// Wire services over the given stores and providers
    pub fn wire(
        config: &AppConfig,
        stores: Stores,
        registry: ProviderRegistry,
        notifier: Arc<dyn Notifier>,
        pg_db: Option<Arc<Database>>,
    ) -> Self {
        let numbers = Arc::new(OrderNoGenerator::new(config.shop.machine_id));
        let order_settings = config.shop.order_settings();
        let currency: Currency = order_settings.currency.clone();

        let orders = Arc::new(OrderService::new(
            stores.orders,
            PricingEngine::new(stores.catalog.clone(), stores.inventory.clone()),
            InventoryLedger::new(stores.inventory),
            numbers.clone(),
            order_settings,
        ));
        let channels = Arc::new(ChannelCache::new(
            stores.payments.clone(),
            config.payment.channel_cache_ttl_secs,
        ));
        let payments = Arc::new(PaymentService::new(
            stores.payments,
            Arc::new(registry),
            channels,
            numbers.clone(),
            config.payment.settings(),
        ));
        let wallet = Arc::new(WalletLedger::new(stores.wallet, currency));
        let coordinator = Arc::new(SettlementCoordinator::new(
            payments,
            orders,
            wallet,
            stores.catalog,
            notifier,
            numbers,
        ));

        let worker_config = config.worker.worker_config();
        let state = Arc::new(AppState::new(
            coordinator.clone(),
            Arc::new(JwtAuth::new(config.gateway.jwt_secret.clone())),
            pg_db,
        ));
        Self {
            recovery: RecoveryWorker::new(coordinator.clone(), worker_config.clone()),
            sweeper: ExpirySweeper::new(coordinator.clone(), worker_config),
            coordinator,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_without_postgres_uses_memory() {
        let config = AppConfig::from_yaml_str("shop:\n  currency: usd\n").unwrap();
        let app = App::build(&config).await.unwrap();
        assert!(app.state.pg_db.is_none());
        assert_eq!(app.state.wallet().currency().as_str(), "USD");
        assert!(app.state.payments().channels().all().await.unwrap().is_empty());
    }
}
