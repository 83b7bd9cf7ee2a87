//! Settlement Orchestrator
//!
//! Ties inventory, orders, wallet, catalog counters and notifications to a
//! payment outcome, exactly once per payment.
//!
//! # Entry points
//! - [`SettlementCoordinator::handle_webhook`]: single webhook endpoint
//! - [`SettlementCoordinator::capture`]: active provider query
//! - [`SettlementCoordinator::pay_order`] / [`SettlementCoordinator::recharge`]
//! - [`SettlementCoordinator::refund_to_wallet`]
//! - [`RecoveryWorker`] and [`ExpirySweeper`] in the background
//!
//! # Idempotency
//! The payment row is the unit: `pending -> terminal` is a CAS, and the
//! stored [`SettlePhase`] records how far the effects got.

pub mod checkout;
pub mod coordinator;
pub mod error;
pub mod state;
pub mod webhook;
pub mod worker;

pub use checkout::{PayOrder, RechargeRequest};
pub use coordinator::SettlementCoordinator;
pub use error::SettlementError;
pub use state::SettlePhase;
pub use worker::{ExpirySweeper, RecoveryWorker, SweepStats, WorkerConfig};

#[cfg(test)]
pub(crate) mod testing {
    //! Whole core wired over in-memory stores

    use std::sync::Arc;

    use super::SettlementCoordinator;
    use crate::catalog::MemoryCatalog;
    use crate::core_types::Currency;
    use crate::inventory::MemoryInventory;
    use crate::notify::RecordingNotifier;
    use crate::order::{OrderNoGenerator, OrderService};
    use crate::payment::PaymentService;
    use crate::payment::testing::MockProvider;
    use crate::wallet::{MemoryWalletStore, WalletLedger};

    pub struct Harness {
        pub coordinator: Arc<SettlementCoordinator>,
        pub orders: Arc<OrderService>,
        pub payments: Arc<PaymentService>,
        pub wallet: Arc<WalletLedger>,
        pub catalog: Arc<MemoryCatalog>,
        pub inventory: Arc<MemoryInventory>,
        pub mock: Arc<MockProvider>,
        pub notifier: Arc<RecordingNotifier>,
    }

    /// Order fixture catalog (manual product 1, card-secret SKU 20) plus a
    /// mock channel 1 charging a 1% fee
    pub async fn harness() -> Harness {
        let f = crate::order::service::tests::fixture().await;
        let (payments, mock) = crate::payment::service::tests::fixture().await;
        let orders = Arc::new(f.service);
        let payments = Arc::new(payments);
        let wallet = Arc::new(WalletLedger::new(
            Arc::new(MemoryWalletStore::new()),
            Currency::default(),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let coordinator = Arc::new(SettlementCoordinator::new(
            payments.clone(),
            orders.clone(),
            wallet.clone(),
            f.catalog.clone(),
            notifier.clone(),
            Arc::new(OrderNoGenerator::default()),
        ));
        Harness {
            coordinator,
            orders,
            payments,
            wallet,
            catalog: f.catalog,
            inventory: f.inventory,
            mock,
            notifier,
        }
    }
}
