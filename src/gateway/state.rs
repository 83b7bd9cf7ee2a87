use std::sync::Arc;

use super::auth::JwtAuth;
use crate::db::Database;
use crate::order::OrderService;
use crate::payment::PaymentService;
use crate::settlement::SettlementCoordinator;
use crate::wallet::WalletLedger;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SettlementCoordinator>,
    pub jwt: Arc<JwtAuth>,
    /// PostgreSQL pool for health checks; `None` on in-memory stores
    pub pg_db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<SettlementCoordinator>,
        jwt: Arc<JwtAuth>,
        pg_db: Option<Arc<Database>>,
    ) -> Self {
        Self {
            coordinator,
            jwt,
            pg_db,
        }
    }

    pub fn orders(&self) -> &Arc<OrderService> {
        self.coordinator.orders()
    }

    pub fn payments(&self) -> &Arc<PaymentService> {
        self.coordinator.payments()
    }

    pub fn wallet(&self) -> &Arc<WalletLedger> {
        self.coordinator.wallet()
    }
}
