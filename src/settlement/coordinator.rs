//! Settlement Coordinator
//!
//! Drives a payment through the settlement phases:
//!
//! 1. A callback (webhook or capture) wins the `pending -> terminal` CAS on
//!    the payment row. Replays and concurrent losers take the no-op path.
//! 2. The winner runs the phase FSM. Each phase applies one idempotent
//!    effect, then advances the stored phase with a CAS, so a crash between
//!    the two repeats only the effect, never doubles it.
//!
//! In-process calls for the same payment are serialized by a per-payment
//! guard; across processes the phase CAS plus idempotent effects suffice.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::error::SettlementError;
use super::state::SettlePhase;
use crate::catalog::{CatalogStore, UsageOutcome};
use crate::core_types::{OrderId, PaymentId, RechargeId};
use crate::money::format_amount;
use crate::notify::{AlertKind, Notification, Notifier};
use crate::order::{OrderError, OrderNoGenerator, OrderService, OrderStatus};
use crate::payment::{CallbackEvent, Payment, PaymentError, PaymentService, PaymentStatus};
use crate::wallet::{AdjustRequest, RechargeStatus, TxKind, WalletError, WalletLedger};

/// Upper bound on phase steps per drive; the success path needs five
const MAX_STEPS: usize = 16;

pub(crate) fn wallet_correlation(payment_id: PaymentId) -> String {
    format!("payment:{payment_id}:wallet")
}

fn reversal_correlation(payment_id: PaymentId) -> String {
    format!("payment:{payment_id}:wallet-reversal")
}

fn recharge_correlation(recharge_id: RechargeId) -> String {
    format!("recharge:{recharge_id}")
}

/// Amount and currency reported by the provider must equal the row
fn check_match(payment: &Payment, event: &CallbackEvent) -> Result<(), PaymentError> {
    if event.amount != payment.amount {
        return Err(PaymentError::AmountMismatch {
            expected: format_amount(payment.amount),
            actual: format_amount(event.amount),
        });
    }
    if let Some(currency) = &event.currency
        && !payment.currency.matches(currency.as_str())
    {
        return Err(PaymentError::CurrencyMismatch {
            expected: payment.currency.to_string(),
            actual: currency.to_string(),
        });
    }
    Ok(())
}

pub struct SettlementCoordinator {
    pub(super) payments: Arc<PaymentService>,
    pub(super) orders: Arc<OrderService>,
    pub(super) wallet: Arc<WalletLedger>,
    pub(super) catalog: Arc<dyn CatalogStore>,
    notifier: Arc<dyn Notifier>,
    pub(super) numbers: Arc<OrderNoGenerator>,
    guards: DashMap<PaymentId, Arc<Mutex<()>>>,
}

impl SettlementCoordinator {
    pub fn new(
        payments: Arc<PaymentService>,
        orders: Arc<OrderService>,
        wallet: Arc<WalletLedger>,
        catalog: Arc<dyn CatalogStore>,
        notifier: Arc<dyn Notifier>,
        numbers: Arc<OrderNoGenerator>,
    ) -> Self {
        Self {
            payments,
            orders,
            wallet,
            catalog,
            notifier,
            numbers,
            guards: DashMap::new(),
        }
    }

    pub fn payments(&self) -> &Arc<PaymentService> {
        &self.payments
    }

    pub fn orders(&self) -> &Arc<OrderService> {
        &self.orders
    }

    pub fn wallet(&self) -> &Arc<WalletLedger> {
        &self.wallet
    }

    pub(super) async fn alert(&self, kind: AlertKind, reference: &str, message: String) {
        self.notifier
            .notify(Notification::alert(kind, reference, message))
            .await;
    }

    /// Apply a verified provider event to the payment it names
    pub async fn apply(&self, event: &CallbackEvent) -> Result<Payment, SettlementError> {
        let payment = self.payments.get_by_no(&event.payment_no).await?;
        self.apply_to(payment, event).await
    }

    pub(super) async fn apply_to(
        &self,
        payment: Payment,
        event: &CallbackEvent,
    ) -> Result<Payment, SettlementError> {
        // 1. Terminal rows: replay or contradiction
        if payment.status.is_terminal() {
            return self.replay(payment, event.status).await;
        }
        if event.status == PaymentStatus::Pending {
            return Ok(payment);
        }

        // 2. Amount/currency, success only
        if event.status == PaymentStatus::Success
            && let Err(e) = check_match(&payment, event)
        {
            error!(payment_no = %payment.payment_no, error = %e, "Callback does not match payment");
            let kind = match e {
                PaymentError::CurrencyMismatch { .. } => AlertKind::CurrencyMismatch,
                _ => AlertKind::AmountMismatch,
            };
            self.alert(kind, &payment.payment_no, e.to_string()).await;
            return Err(e.into());
        }

        // 3. Claim
        let (phase, paid_at) = if event.status == PaymentStatus::Success {
            (SettlePhase::Claimed, Some(event.paid_at.unwrap_or_else(Utc::now)))
        } else {
            (SettlePhase::None, None)
        };
        let won = self
            .payments
            .store()
            .transition(
                payment.id,
                PaymentStatus::Pending,
                event.status,
                phase,
                event.provider_ref.as_deref(),
                paid_at,
            )
            .await?;
        if !won {
            let current = self.payments.get(payment.id).await?;
            if current.status.is_terminal() {
                return self.replay(current, event.status).await;
            }
            return Err(SettlementError::Stalled(payment.payment_no));
        }
        info!(
            payment_no = %payment.payment_no,
            status = %event.status,
            provider_ref = ?event.provider_ref,
            "Payment status changed"
        );

        // 4./5. Phase effects
        self.drive(payment.id).await
    }

    async fn replay(&self, payment: Payment, incoming: PaymentStatus) -> Result<Payment, SettlementError> {
        if incoming == payment.status || incoming == PaymentStatus::Pending {
            debug!(payment_no = %payment.payment_no, status = %payment.status, "Settlement replay");
            if payment.settle_phase.is_terminal() {
                return Ok(payment);
            }
            return self.drive(payment.id).await;
        }
        let e = PaymentError::PaymentStatusInvalid {
            from: payment.status,
            to: incoming,
        };
        error!(payment_no = %payment.payment_no, error = %e, "Conflicting payment callback");
        self.alert(AlertKind::StatusConflict, &payment.payment_no, e.to_string())
            .await;
        Err(e.into())
    }

    /// Run the phase FSM of a payment to a terminal phase
    pub async fn drive(&self, payment_id: PaymentId) -> Result<Payment, SettlementError> {
        let guard = self.guards.entry(payment_id).or_default().clone();
        let result = {
            let _held = guard.lock().await;
            self.run_phases(payment_id).await
        };
        drop(guard);
        self.guards
            .remove_if(&payment_id, |_, g| Arc::strong_count(g) == 1);
        result
    }

    async fn run_phases(&self, payment_id: PaymentId) -> Result<Payment, SettlementError> {
        for _ in 0..MAX_STEPS {
            let payment = self.payments.get(payment_id).await?;
            let from = payment.settle_phase;
            if from.is_terminal() || payment.status == PaymentStatus::Pending {
                return Ok(payment);
            }

            let to = match (payment.status, from) {
                (PaymentStatus::Success, SettlePhase::None) => SettlePhase::Claimed,
                (PaymentStatus::Success, SettlePhase::Claimed) => self.settle_owner(&payment).await?,
                (PaymentStatus::Success, SettlePhase::OwnerSettled) => {
                    self.commit_stock(&payment).await?;
                    SettlePhase::StockCommitted
                }
                (PaymentStatus::Success, SettlePhase::StockCommitted) => {
                    self.apply_counters(&payment).await?;
                    SettlePhase::CountersApplied
                }
                (PaymentStatus::Success, _) => {
                    self.emit(&payment).await?;
                    SettlePhase::Done
                }
                _ => {
                    self.release(&payment).await?;
                    SettlePhase::Released
                }
            };

            if self
                .payments
                .store()
                .advance_phase(payment_id, from, to)
                .await?
            {
                debug!(payment_no = %payment.payment_no, from = %from, to = %to, "Settlement phase advanced");
            }
        }
        Err(SettlementError::Stalled(payment_id.to_string()))
    }

    // === Success path ===

    /// CLAIMED -> OWNER_SETTLED: order paid (wallet part debited) or recharge credited
    async fn settle_owner(&self, payment: &Payment) -> Result<SettlePhase, SettlementError> {
        match (payment.order_id, payment.recharge_id) {
            (Some(order_id), _) => self.settle_order(payment, order_id).await,
            (None, Some(recharge_id)) => {
                self.credit_recharge(payment, recharge_id).await?;
                Ok(SettlePhase::OwnerSettled)
            }
            (None, None) => Err(SettlementError::PaymentOwnerMissing(
                payment.payment_no.clone(),
            )),
        }
    }

    async fn settle_order(
        &self,
        payment: &Payment,
        order_id: OrderId,
    ) -> Result<SettlePhase, SettlementError> {
        // Re-check right before touching money
        let root = match self.orders.check_settleable(order_id, payment.id).await {
            Ok(root) => root,
            Err(e @ OrderError::OrderStatusInvalid { .. }) => {
                return Err(self.flag_refund(payment, e.into()).await);
            }
            Err(e) => return Err(e.into()),
        };

        if payment.wallet_amount > Decimal::ZERO {
            let debit = match root.user_id {
                Some(user_id) => {
                    self.wallet
                        .adjust(
                            AdjustRequest::new(
                                user_id,
                                -payment.wallet_amount,
                                TxKind::Payment,
                                wallet_correlation(payment.id),
                            )
                            .order(root.id)
                            .payment(payment.id)
                            .remark(format!("Order {}", root.order_no)),
                        )
                        .await
                }
                None => Err(WalletError::NotSupportedForGuest),
            };
            match debit {
                Ok(_) => {}
                Err(
                    e @ (WalletError::InsufficientBalance { .. }
                    | WalletError::NotSupportedForGuest),
                ) => return Err(self.flag_refund(payment, e.into()).await),
                Err(e) => return Err(e.into()),
            }
        }

        let paid_at = payment.paid_at.unwrap_or_else(Utc::now);
        match self
            .orders
            .settle(root.id, payment.id, payment.wallet_amount, payment.online_amount(), paid_at)
            .await
        {
            Ok(outcome) => {
                info!(
                    order_no = %root.order_no,
                    payment_no = %payment.payment_no,
                    outcome = ?outcome,
                    "Order settled"
                );
                Ok(SettlePhase::OwnerSettled)
            }
            Err(e @ OrderError::OrderStatusInvalid { .. }) => {
                Err(self.flag_refund(payment, e.into()).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn credit_recharge(
        &self,
        payment: &Payment,
        recharge_id: RechargeId,
    ) -> Result<(), SettlementError> {
        let recharge = self
            .wallet
            .store()
            .get_recharge(recharge_id)
            .await?
            .ok_or_else(|| WalletError::RechargeNotFound(recharge_id.to_string()))?;

        // The requested amount is credited; the fee stays with the provider
        self.wallet
            .adjust(
                AdjustRequest::new(
                    recharge.user_id,
                    recharge.amount,
                    TxKind::Recharge,
                    recharge_correlation(recharge.id),
                )
                .payment(payment.id)
                .remark(format!("Recharge {}", recharge.recharge_no)),
            )
            .await?;

        if recharge.status != RechargeStatus::Success {
            if recharge.status != RechargeStatus::Pending {
                warn!(recharge_no = %recharge.recharge_no, status = ?recharge.status, "Recharge paid after it was closed");
            }
            self.wallet
                .store()
                .transition_recharge(recharge.id, recharge.status, RechargeStatus::Success, payment.paid_at)
                .await?;
        }
        Ok(())
    }

    /// Money arrived for an owner that can no longer take it.
    ///
    /// Reverses any wallet debit, parks the payment in NEEDS_REFUND and
    /// returns `cause` for the caller.
    async fn flag_refund(&self, payment: &Payment, cause: SettlementError) -> SettlementError {
        if let Err(e) = self.reverse_wallet_debit(payment).await {
            error!(payment_no = %payment.payment_no, error = %e, "Wallet reversal failed, settlement left claimed");
            return e;
        }
        if let Err(e) = self
            .payments
            .store()
            .advance_phase(payment.id, SettlePhase::Claimed, SettlePhase::NeedsRefund)
            .await
        {
            return e.into();
        }
        if payment.amount > Decimal::ZERO {
            error!(payment_no = %payment.payment_no, amount = %payment.amount, cause = %cause, "Payment needs manual refund");
            self.alert(
                AlertKind::ManualRefundRequired,
                &payment.payment_no,
                format!("{} {} received: {cause}", format_amount(payment.amount), payment.currency),
            )
            .await;
        } else {
            warn!(payment_no = %payment.payment_no, cause = %cause, "Wallet payment reversed");
        }
        cause
    }

    /// Credit back the wallet part of a payment, if it was ever debited
    async fn reverse_wallet_debit(&self, payment: &Payment) -> Result<(), SettlementError> {
        if payment.wallet_amount <= Decimal::ZERO {
            return Ok(());
        }
        let Some(debit) = self
            .wallet
            .store()
            .find_transaction(&wallet_correlation(payment.id))
            .await?
        else {
            return Ok(());
        };
        let mut req = AdjustRequest::new(
            debit.user_id,
            -debit.delta,
            TxKind::Reversal,
            reversal_correlation(payment.id),
        )
        .payment(payment.id)
        .remark(format!("Reversal of payment {}", payment.payment_no));
        if let Some(order_id) = debit.order_id {
            req = req.order(order_id);
        }
        self.wallet.adjust(req).await?;
        Ok(())
    }

    /// OWNER_SETTLED -> STOCK_COMMITTED
    async fn commit_stock(&self, payment: &Payment) -> Result<(), SettlementError> {
        let Some(order_id) = payment.order_id else {
            return Ok(());
        };
        let root = self.orders.get(order_id).await?;
        let tree = self.orders.tree(root).await?;
        let deliveries = self.orders.commit_stock(&tree).await?;
        self.orders.complete_automatic(order_id).await?;
        info!(
            order_no = %tree.order.order_no,
            delivered = deliveries.iter().map(|d| d.secrets.len()).sum::<usize>(),
            "Stock committed"
        );
        Ok(())
    }

    /// STOCK_COMMITTED -> COUNTERS_APPLIED
    async fn apply_counters(&self, payment: &Payment) -> Result<(), SettlementError> {
        let Some(order_id) = payment.order_id else {
            return Ok(());
        };
        let root = self.orders.get(order_id).await?;
        let tree = self.orders.tree(root.clone()).await?;

        if let Some(coupon_id) = root.coupon_id {
            let outcome = self
                .catalog
                .record_coupon_use(coupon_id, root.id, root.user_id)
                .await?;
            if outcome == UsageOutcome::LimitReached {
                warn!(order_no = %root.order_no, coupon_id, "Coupon limit reached at settlement");
                self.alert(
                    AlertKind::UsageLimitExceeded,
                    &root.order_no,
                    format!("coupon {coupon_id} limit reached after checkout"),
                )
                .await;
            }
        }

        let promotions: BTreeSet<_> = tree
            .all_items()
            .iter()
            .filter_map(|i| i.promotion_id)
            .chain(root.promotion_id)
            .collect();
        for promotion_id in promotions {
            let outcome = self
                .catalog
                .record_promotion_use(promotion_id, root.id)
                .await?;
            if outcome == UsageOutcome::LimitReached {
                warn!(order_no = %root.order_no, promotion_id, "Promotion limit reached at settlement");
                self.alert(
                    AlertKind::UsageLimitExceeded,
                    &root.order_no,
                    format!("promotion {promotion_id} limit reached after checkout"),
                )
                .await;
            }
        }
        Ok(())
    }

    /// COUNTERS_APPLIED -> DONE
    async fn emit(&self, payment: &Payment) -> Result<(), SettlementError> {
        if let Some(order_id) = payment.order_id {
            let root = self.orders.get(order_id).await?;
            self.notifier
                .notify(Notification::OrderPaid {
                    order_no: root.order_no.clone(),
                    payment_no: payment.payment_no.clone(),
                    user_id: root.user_id,
                    guest_email: root.guest_email.clone(),
                })
                .await;
            if root.status == OrderStatus::Completed {
                self.notifier
                    .notify(Notification::OrderCompleted {
                        order_no: root.order_no,
                    })
                    .await;
            }
        } else if let Some(recharge_id) = payment.recharge_id
            && let Some(recharge) = self.wallet.store().get_recharge(recharge_id).await?
        {
            self.notifier
                .notify(Notification::RechargeSucceeded {
                    recharge_no: recharge.recharge_no,
                    user_id: recharge.user_id,
                    amount: format_amount(recharge.amount),
                })
                .await;
        }
        Ok(())
    }

    // === Failure path ===

    /// NONE -> RELEASED for a failed or expired payment
    async fn release(&self, payment: &Payment) -> Result<(), SettlementError> {
        self.reverse_wallet_debit(payment).await?;

        if let Some(order_id) = payment.order_id {
            let root = self.orders.get(order_id).await?;
            if !self.other_pending(order_id, payment).await?
                && root.status == OrderStatus::PendingPayment
            {
                let tree = self.orders.tree(root).await?;
                self.orders.release_reservations(&tree).await;
                info!(order_no = %tree.order.order_no, payment_no = %payment.payment_no, "Reservations released after failed payment");
                // A payment opened since the check above relies on this stock
                if self.other_pending(order_id, payment).await?
                    && let Err(e) = self.orders.ensure_reserved(&tree).await
                {
                    warn!(order_no = %tree.order.order_no, error = %e, "Could not re-reserve for pending payment");
                }
            }
        }

        if let Some(recharge_id) = payment.recharge_id {
            let to = if payment.status == PaymentStatus::Expired {
                RechargeStatus::Expired
            } else {
                RechargeStatus::Failed
            };
            self.wallet
                .store()
                .transition_recharge(recharge_id, RechargeStatus::Pending, to, None)
                .await?;
        }
        Ok(())
    }

    async fn other_pending(
        &self,
        order_id: OrderId,
        payment: &Payment,
    ) -> Result<bool, SettlementError> {
        Ok(self
            .payments
            .store()
            .list_for_order(order_id)
            .await?
            .iter()
            .any(|p| p.id != payment.id && p.status == PaymentStatus::Pending))
    }

    // === Entry points besides webhooks ===

    /// Active capture: query the provider and settle on a final answer.
    ///
    /// Returns the payment as stored afterwards.
    pub async fn capture(&self, payment_no: &str) -> Result<Payment, SettlementError> {
        let payment = self.payments.get_by_no(payment_no).await?;
        if payment.status.is_terminal() {
            if payment.settle_phase.is_terminal() {
                return Ok(payment);
            }
            return self.drive(payment.id).await;
        }
        match self.payments.query_provider(&payment).await? {
            Some(event) if event.status != PaymentStatus::Pending => {
                self.apply_to(payment, &event).await
            }
            _ => Ok(payment),
        }
    }

    /// Close a pending payment past its expiry.
    ///
    /// The provider is asked first so a late success is settled instead.
    pub async fn expire_payment(
        &self,
        payment: Payment,
        now: DateTime<Utc>,
    ) -> Result<Payment, SettlementError> {
        if let Some(event) = self.payments.query_provider(&payment).await?
            && event.status != PaymentStatus::Pending
        {
            return self.apply_to(payment, &event).await;
        }
        let event = CallbackEvent {
            payment_no: payment.payment_no.clone(),
            provider_ref: None,
            status: PaymentStatus::Expired,
            amount: payment.amount,
            currency: None,
            paid_at: Some(now),
            raw: serde_json::Value::Null,
        };
        self.apply_to(payment, &event).await
    }
}
