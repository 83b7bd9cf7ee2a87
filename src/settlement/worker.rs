//! Background workers
//!
//! - [`RecoveryWorker`]: resumes settlements stuck in a non-terminal phase
//! - [`ExpirySweeper`]: closes overdue orders and pending payments

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::coordinator::SettlementCoordinator;
use super::error::SettlementError;
use crate::notify::AlertKind;

/// Configuration shared by both workers
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a settlement must sit in one phase to be considered stuck
    pub stale_threshold: Duration,
    /// Maximum rows handled per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Recovery Worker
///
/// Periodically picks up payments whose status is final but whose settlement
/// phase is not, and drives them forward.
pub struct RecoveryWorker {
    coordinator: Arc<SettlementCoordinator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run the recovery loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting settlement recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan. Returns how many settlements reached a terminal phase.
    pub async fn scan_and_recover(&self) -> Result<usize, SettlementError> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stale = self
            .coordinator
            .payments()
            .store()
            .find_unsettled(Utc::now() - threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stuck settlements found");
            return Ok(0);
        }
        info!(count = stale.len(), "Found stuck settlements to recover");

        let mut recovered = 0;
        for payment in stale {
            debug!(
                payment_no = %payment.payment_no,
                status = %payment.status,
                phase = %payment.settle_phase,
                "Recovering settlement"
            );
            match self.coordinator.drive(payment.id).await {
                Ok(done) if done.settle_phase.is_terminal() => {
                    info!(
                        payment_no = %done.payment_no,
                        old_phase = %payment.settle_phase,
                        new_phase = %done.settle_phase,
                        "Settlement recovered"
                    );
                    recovered += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(payment_no = %payment.payment_no, error = %e, "Failed to recover settlement");
                    self.coordinator
                        .alert(
                            AlertKind::SettlementStuck,
                            &payment.payment_no,
                            format!("stuck in {}: {e}", payment.settle_phase),
                        )
                        .await;
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered settlements this scan");
        }
        Ok(recovered)
    }
}

/// Result of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub orders_expired: usize,
    pub payments_closed: usize,
}

/// Expiry Sweeper
pub struct ExpirySweeper {
    coordinator: Arc<SettlementCoordinator>,
    config: WorkerConfig,
}

impl ExpirySweeper {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            "Starting expiry sweeper"
        );
        loop {
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Expiry sweep failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Payments first: a late success must land before its order expires
    pub async fn sweep(&self) -> Result<SweepStats, SettlementError> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let overdue = self
            .coordinator
            .payments()
            .store()
            .find_expired_pending(now, self.config.batch_size)
            .await?;
        for payment in overdue {
            let payment_no = payment.payment_no.clone();
            match self.coordinator.expire_payment(payment, now).await {
                Ok(_) => stats.payments_closed += 1,
                Err(e) => error!(payment_no = %payment_no, error = %e, "Failed to close overdue payment"),
            }
        }

        stats.orders_expired = self
            .coordinator
            .orders()
            .expire_overdue(now, self.config.batch_size)
            .await?;

        if stats != SweepStats::default() {
            info!(
                orders = stats.orders_expired,
                payments = stats.payments_closed,
                "Expiry sweep"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryStore, StockTarget};
    use crate::order::OrderStatus;
    use crate::order::service::tests::{auto_line, user_checkout};
    use crate::payment::{InteractionMode, PaymentStatus};
    use crate::settlement::checkout::PayOrder;
    use crate::settlement::state::SettlePhase;
    use crate::settlement::testing::harness;

    fn immediate() -> WorkerConfig {
        WorkerConfig {
            scan_interval: Duration::from_millis(10),
            stale_threshold: Duration::ZERO,
            batch_size: 10,
        }
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_recovery_finishes_claimed_settlement() {
        let h = harness().await;
        let tree = h.orders.create(&user_checkout(vec![auto_line(1)]), Utc::now()).await.unwrap();
        let payment = h
            .coordinator
            .pay_order(
                tree.order.clone(),
                PayOrder {
                    channel_id: Some(1),
                    interaction_mode: InteractionMode::Redirect,
                    use_wallet: false,
                    client_ip: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        h.payments
            .store()
            .transition(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Success,
                SettlePhase::Claimed,
                None,
                Some(Utc::now()),
            )
            .await
            .unwrap();

        let worker = RecoveryWorker::new(h.coordinator.clone(), immediate());
        assert_eq!(worker.scan_and_recover().await.unwrap(), 1);
        assert_eq!(worker.scan_and_recover().await.unwrap(), 0);
        assert_eq!(h.orders.get(tree.order.id).await.unwrap().status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_sweep_closes_overdue_payment_and_order() {
        let h = harness().await;
        let past = Utc::now() - chrono::Duration::hours(1);
        // Created an hour ago with a 15 minute window
        let tree = h.orders.create(&user_checkout(vec![auto_line(1)]), past).await.unwrap();
        let payment = h
            .coordinator
            .pay_order(
                tree.order.clone(),
                PayOrder {
                    channel_id: Some(1),
                    interaction_mode: InteractionMode::Redirect,
                    use_wallet: false,
                    client_ip: None,
                },
                past,
            )
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(h.coordinator.clone(), immediate());
        let stats = sweeper.sweep().await.unwrap();
        assert_eq!(stats.payments_closed, 1);
        assert_eq!(stats.orders_expired, 1);

        let row = h.payments.get(payment.id).await.unwrap();
        assert_eq!(row.status, PaymentStatus::Expired);
        assert_eq!(h.orders.get(tree.order.id).await.unwrap().status, OrderStatus::Expired);
        let counters = h.inventory.counters(StockTarget::Sku(20)).await.unwrap();
        assert_eq!(counters.locked, 0);
    }
}
