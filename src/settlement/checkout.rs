//! Checkout, recharge and refund entry points

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, warn};

use super::coordinator::{SettlementCoordinator, wallet_correlation};
use super::error::SettlementError;
use crate::core_types::{ChannelId, UserId};
use crate::money::{AMOUNT_SCALE, format_amount};
use crate::notify::AlertKind;
use crate::order::{Order, OrderError, OrderStatus};
use crate::payment::{CallbackEvent, InteractionMode, OpenPayment, Payment, PaymentStatus};
use crate::pricing::PricingError;
use crate::wallet::{
    AdjustOutcome, AdjustRequest, RechargeOrder, RechargeStatus, TxKind, WalletError,
};

/// How the buyer wants to pay an order
#[derive(Debug, Clone, Deserialize)]
pub struct PayOrder {
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default = "default_mode")]
    pub interaction_mode: InteractionMode,
    /// Spend wallet balance first, up to the order total
    #[serde(default)]
    pub use_wallet: bool,
    #[serde(skip)]
    pub client_ip: Option<String>,
}

fn default_mode() -> InteractionMode {
    InteractionMode::Redirect
}

#[derive(Debug, Clone, Deserialize)]
pub struct RechargeRequest {
    #[serde(skip)]
    pub user_id: UserId,
    pub amount: Decimal,
    pub channel_id: ChannelId,
    #[serde(default = "default_mode")]
    pub interaction_mode: InteractionMode,
    #[serde(skip)]
    pub client_ip: Option<String>,
}

fn valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount.normalize().scale() <= AMOUNT_SCALE
}

fn wallet_event(payment: &Payment, status: PaymentStatus, now: DateTime<Utc>) -> CallbackEvent {
    CallbackEvent {
        payment_no: payment.payment_no.clone(),
        provider_ref: None,
        status,
        amount: payment.amount,
        currency: Some(payment.currency.clone()),
        paid_at: Some(now),
        raw: serde_json::Value::Null,
    }
}

impl SettlementCoordinator {
    /// Open a payment for a `pending_payment` order.
    ///
    /// Reservations released by an earlier failed payment are taken again
    /// first. When the wallet covers the total the payment settles here.
    pub async fn pay_order(
        &self,
        order: Order,
        req: PayOrder,
        now: DateTime<Utc>,
    ) -> Result<Payment, SettlementError> {
        let root = self.orders.root_of(order).await?;
        if root.status != OrderStatus::PendingPayment {
            return Err(SettlementError::OrderNotPayable {
                order_no: root.order_no,
                status: root.status,
            });
        }
        if root.expires_at <= now {
            return Err(OrderError::OrderExpired.into());
        }
        self.check_coupon_available(&root).await?;

        let wallet_amount = if req.use_wallet {
            let user_id = root.user_id.ok_or(WalletError::NotSupportedForGuest)?;
            self.wallet
                .balance(user_id)
                .await?
                .min(root.total_amount)
                .max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        let online_amount = root.total_amount - wallet_amount;

        let channel_id = if online_amount > Decimal::ZERO {
            let id = req.channel_id.ok_or(SettlementError::ChannelRequired)?;
            self.payments.usable_channel(id, req.interaction_mode).await?;
            Some(id)
        } else {
            None
        };

        let tree = self.orders.tree(root.clone()).await?;
        self.orders.ensure_reserved(&tree).await?;

        let payment = self
            .payments
            .open(OpenPayment {
                order_id: Some(root.id),
                recharge_id: None,
                user_id: root.user_id,
                channel_id,
                interaction_mode: req.interaction_mode,
                online_amount,
                wallet_amount,
                currency: root.currency.clone(),
                subject: format!("Order {}", root.order_no),
                client_ip: req.client_ip,
                expires_at: root.expires_at,
            })
            .await?;

        // A failing sibling payment may have released the stock between the
        // first check and the open; it is visible as pending from here on.
        if let Err(e) = self.orders.ensure_reserved(&tree).await {
            warn!(payment_no = %payment.payment_no, error = %e, "Stock lost while opening payment");
            self.apply_to(payment.clone(), &wallet_event(&payment, PaymentStatus::Failed, now))
                .await?;
            return Err(e.into());
        }

        if channel_id.is_some() {
            return Ok(payment);
        }
        self.settle_from_wallet(payment, &root, now).await
    }

    /// Coupon uses are only counted at settlement, so an order priced while
    /// the coupon still had room is checked again before money moves.
    async fn check_coupon_available(&self, root: &Order) -> Result<(), SettlementError> {
        let Some(coupon_id) = root.coupon_id else {
            return Ok(());
        };
        let rejected = |e: PricingError| SettlementError::from(OrderError::from(e));
        let coupon = self
            .catalog
            .get_coupon(coupon_id)
            .await?
            .ok_or_else(|| rejected(PricingError::CouponInvalid))?;
        if coupon.limit_reached() {
            warn!(order_no = %root.order_no, coupon = %coupon.code, "Coupon exhausted before payment");
            return Err(rejected(PricingError::CouponUsageLimit));
        }
        if let (Some(limit), Some(user_id)) = (coupon.per_user_limit, root.user_id)
            && limit > 0
            && self.catalog.coupon_uses_by_user(coupon_id, user_id).await? >= limit
        {
            return Err(rejected(PricingError::CouponPerUserLimit));
        }
        Ok(())
    }

    async fn settle_from_wallet(
        &self,
        payment: Payment,
        root: &Order,
        now: DateTime<Utc>,
    ) -> Result<Payment, SettlementError> {
        if payment.wallet_amount > Decimal::ZERO {
            let user_id = root.user_id.ok_or(WalletError::NotSupportedForGuest)?;
            let debit = self
                .wallet
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
                .await;
            if let Err(e) = debit {
                warn!(payment_no = %payment.payment_no, error = %e, "Wallet debit failed");
                self.apply_to(payment.clone(), &wallet_event(&payment, PaymentStatus::Failed, now))
                    .await?;
                return Err(e.into());
            }
        }
        let event = wallet_event(&payment, PaymentStatus::Success, now);
        self.apply_to(payment, &event).await
    }

    /// Create a recharge order and the payment that funds it
    pub async fn recharge(
        &self,
        req: RechargeRequest,
        now: DateTime<Utc>,
    ) -> Result<(RechargeOrder, Payment), SettlementError> {
        if !valid_amount(req.amount) {
            return Err(WalletError::InvalidAmount.into());
        }
        let (channel, _) = self
            .payments
            .usable_channel(req.channel_id, req.interaction_mode)
            .await?;
        let fee = channel.fee_for(req.amount);

        let mut recharge = self
            .wallet
            .store()
            .insert_recharge(RechargeOrder {
                id: 0,
                recharge_no: self.numbers.next("RC"),
                user_id: req.user_id,
                payment_id: None,
                channel_id: channel.id,
                amount: req.amount,
                fee,
                payable_amount: req.amount + fee,
                currency: self.wallet.currency().clone(),
                status: RechargeStatus::Pending,
                created_at: now,
                paid_at: None,
            })
            .await?;

        let opened = self
            .payments
            .open(OpenPayment {
                order_id: None,
                recharge_id: Some(recharge.id),
                user_id: Some(req.user_id),
                channel_id: Some(channel.id),
                interaction_mode: req.interaction_mode,
                online_amount: req.amount,
                wallet_amount: Decimal::ZERO,
                currency: recharge.currency.clone(),
                subject: format!("Wallet recharge {}", recharge.recharge_no),
                client_ip: req.client_ip,
                expires_at: now + Duration::minutes(self.orders.settings().expire_minutes),
            })
            .await;
        let payment = match opened {
            Ok(p) => p,
            Err(e) => {
                self.wallet
                    .store()
                    .transition_recharge(recharge.id, RechargeStatus::Pending, RechargeStatus::Failed, None)
                    .await?;
                return Err(e.into());
            }
        };

        self.wallet
            .store()
            .attach_recharge_payment(recharge.id, payment.id)
            .await?;
        recharge.payment_id = Some(payment.id);
        info!(
            recharge_no = %recharge.recharge_no,
            user_id = req.user_id,
            amount = %recharge.amount,
            payable = %recharge.payable_amount,
            "Recharge created"
        );
        Ok((recharge, payment))
    }

    /// Admin refund of a paid order into the buyer's wallet.
    ///
    /// Capped at what the order received minus earlier refunds. Both the
    /// refund record and the wallet credit are keyed by `request_id`, so
    /// retrying after a failed credit completes it without counting the
    /// refund twice.
    pub async fn refund_to_wallet(
        &self,
        order_no: &str,
        amount: Decimal,
        remark: &str,
        admin_id: UserId,
        request_id: &str,
    ) -> Result<(Order, AdjustOutcome), SettlementError> {
        if !valid_amount(amount) {
            return Err(WalletError::InvalidAmount.into());
        }
        let order = self.orders.get_by_no(order_no).await?;
        let user_id = order.user_id.ok_or(WalletError::NotSupportedForGuest)?;

        let updated = self.orders.apply_refund(order_no, amount, request_id).await?;
        let credit = AdjustRequest::new(
            user_id,
            amount,
            TxKind::Refund,
            format!("refund:{}:{request_id}", updated.id),
        )
        .order(updated.id)
        .remark(format!("[admin {admin_id}] refund {}: {remark}", updated.order_no));

        match self.wallet.adjust(credit).await {
            Ok(outcome) => Ok((updated, outcome)),
            Err(e) => {
                error!(order_no = %order_no, amount = %amount, error = %e, "Refund recorded but wallet credit failed");
                self.alert(
                    AlertKind::ManualRefundRequired,
                    order_no,
                    format!("refund of {} recorded, wallet credit failed: {e}", format_amount(amount)),
                )
                .await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::service::tests::{auto_line, d, manual_line, user_checkout};
    use crate::order::{CheckoutRequest, OrderOwner};
    use crate::payment::testing::MockProvider;
    use crate::settlement::state::SettlePhase;
    use crate::settlement::testing::harness;

    fn wallet_only() -> PayOrder {
        PayOrder {
            channel_id: None,
            interaction_mode: InteractionMode::Redirect,
            use_wallet: true,
            client_ip: None,
        }
    }

    #[tokio::test]
    async fn test_wallet_covers_total() {
        let h = harness().await;
        h.wallet
            .adjust(AdjustRequest::new(7, d("12.00"), TxKind::Recharge, "seed"))
            .await
            .unwrap();
        let tree = h.orders.create(&user_checkout(vec![auto_line(2)]), Utc::now()).await.unwrap();

        let payment = h
            .coordinator
            .pay_order(tree.order.clone(), wallet_only(), Utc::now())
            .await
            .unwrap();
        assert_eq!(payment.provider_type, crate::payment::ProviderType::Wallet);
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.settle_phase, SettlePhase::Done);
        assert_eq!(h.wallet.balance(7).await.unwrap(), d("2.00"));

        let order = h.orders.get(tree.order.id).await.unwrap();
        assert_eq!(order.wallet_paid, d("10.00"));
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_split_payment_debits_wallet_on_success() {
        let h = harness().await;
        h.wallet
            .adjust(AdjustRequest::new(7, d("4.00"), TxKind::Recharge, "seed"))
            .await
            .unwrap();
        let tree = h.orders.create(&user_checkout(vec![auto_line(2)]), Utc::now()).await.unwrap();

        // Online part without a channel
        assert!(matches!(
            h.coordinator.pay_order(tree.order.clone(), wallet_only(), Utc::now()).await,
            Err(SettlementError::ChannelRequired)
        ));

        let payment = h
            .coordinator
            .pay_order(
                tree.order.clone(),
                PayOrder {
                    channel_id: Some(1),
                    ..wallet_only()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(payment.wallet_amount, d("4.00"));
        assert_eq!(payment.amount, d("6.06"));
        assert_eq!(h.wallet.balance(7).await.unwrap(), d("4.00"));

        h.coordinator
            .apply(&MockProvider::event(&payment.payment_no, PaymentStatus::Success, d("6.06")))
            .await
            .unwrap();
        assert_eq!(h.wallet.balance(7).await.unwrap(), Decimal::ZERO);
        let order = h.orders.get(tree.order.id).await.unwrap();
        assert_eq!(order.wallet_paid, d("4.00"));
        assert_eq!(order.online_paid, d("6.00"));
    }

    #[tokio::test]
    async fn test_guest_cannot_use_wallet() {
        let h = harness().await;
        let req = CheckoutRequest {
            owner: OrderOwner::Guest {
                email: "g@example.com".into(),
                password: "pw".into(),
            },
            ..user_checkout(vec![auto_line(1)])
        };
        let tree = h.orders.create(&req, Utc::now()).await.unwrap();
        let err = h
            .coordinator
            .pay_order(tree.order, wallet_only(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_SUPPORTED_FOR_GUEST");
    }

    #[tokio::test]
    async fn test_recharge_credits_requested_amount() {
        let h = harness().await;
        let (recharge, payment) = h
            .coordinator
            .recharge(
                RechargeRequest {
                    user_id: 9,
                    amount: d("100"),
                    channel_id: 1,
                    interaction_mode: InteractionMode::Qr,
                    client_ip: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(recharge.fee, d("1.00"));
        assert_eq!(payment.amount, d("101.00"));
        assert_eq!(recharge.payment_id, Some(payment.id));

        let event = MockProvider::event(&payment.payment_no, PaymentStatus::Success, d("101.00"));
        h.coordinator.apply(&event).await.unwrap();
        h.coordinator.apply(&event).await.unwrap();
        assert_eq!(h.wallet.balance(9).await.unwrap(), d("100"));

        let stored = h.wallet.store().get_recharge(recharge.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RechargeStatus::Success);
    }

    #[tokio::test]
    async fn test_failed_recharge_never_credits() {
        let h = harness().await;
        let (recharge, payment) = h
            .coordinator
            .recharge(
                RechargeRequest {
                    user_id: 9,
                    amount: d("100"),
                    channel_id: 1,
                    interaction_mode: InteractionMode::Redirect,
                    client_ip: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        h.coordinator
            .apply(&MockProvider::event(&payment.payment_no, PaymentStatus::Failed, payment.amount))
            .await
            .unwrap();
        assert_eq!(h.wallet.balance(9).await.unwrap(), Decimal::ZERO);
        let stored = h.wallet.store().get_recharge(recharge.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RechargeStatus::Failed);
        assert!(h.wallet.transactions(9, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_is_capped_by_paid_amount() {
        let h = harness().await;
        let tree = h.orders.create(&user_checkout(vec![manual_line(1)]), Utc::now()).await.unwrap();
        let payment = h
            .coordinator
            .pay_order(
                tree.order.clone(),
                PayOrder {
                    channel_id: Some(1),
                    use_wallet: false,
                    ..wallet_only()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        h.coordinator
            .apply(&MockProvider::event(&payment.payment_no, PaymentStatus::Success, payment.amount))
            .await
            .unwrap();

        let no = &tree.order.order_no;
        let (order, _) = h.coordinator.refund_to_wallet(no, d("4"), "partial", 1, "rf-1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(matches!(
            h.coordinator.refund_to_wallet(no, d("6.01"), "too much", 1, "rf-2").await,
            Err(SettlementError::Order(OrderError::RefundExceedsPaid))
        ));
        let (order, _) = h.coordinator.refund_to_wallet(no, d("6"), "rest", 1, "rf-3").await.unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
        assert_eq!(h.wallet.balance(7).await.unwrap(), d("10"));
    }

    #[tokio::test]
    async fn test_refund_retry_after_missing_credit_counts_once() {
        let h = harness().await;
        let tree = h.orders.create(&user_checkout(vec![manual_line(1)]), Utc::now()).await.unwrap();
        let payment = h
            .coordinator
            .pay_order(
                tree.order.clone(),
                PayOrder {
                    channel_id: Some(1),
                    use_wallet: false,
                    ..wallet_only()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        h.coordinator
            .apply(&MockProvider::event(&payment.payment_no, PaymentStatus::Success, payment.amount))
            .await
            .unwrap();
        let no = &tree.order.order_no;

        // First attempt stopped after the refund was recorded
        h.orders.apply_refund(no, d("3"), "rf-9").await.unwrap();
        assert_eq!(h.wallet.balance(7).await.unwrap(), Decimal::ZERO);

        let (order, outcome) = h.coordinator.refund_to_wallet(no, d("3"), "retry", 1, "rf-9").await.unwrap();
        assert!(outcome.applied);
        assert_eq!(order.refunded_amount, d("3"));
        assert_eq!(h.wallet.balance(7).await.unwrap(), d("3"));

        let (order, outcome) = h.coordinator.refund_to_wallet(no, d("3"), "retry", 1, "rf-9").await.unwrap();
        assert!(!outcome.applied);
        assert_eq!(order.refunded_amount, d("3"));
        assert_eq!(h.wallet.balance(7).await.unwrap(), d("3"));
    }
}
