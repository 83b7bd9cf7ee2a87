//! Concurrency and settlement races against the wired core

mod common;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;

use common::*;
use digistore::catalog::FulfillmentType;
use digistore::inventory::{InventoryStore, StockTarget};
use digistore::notify::AlertKind;
use digistore::order::{CheckoutItem, CheckoutRequest, OrderOwner, OrderStatus};
use digistore::payment::{InteractionMode, Payment, PaymentStatus, PaymentStore};
use digistore::settlement::{PayOrder, SettlePhase};

fn manual_item(qty: i64) -> CheckoutItem {
    CheckoutItem {
        product_id: MANUAL_PRODUCT,
        sku_id: None,
        quantity: qty,
        fulfillment_type: Some(FulfillmentType::Manual),
        manual_form: json!({ "account": "player-1" }).as_object().cloned(),
    }
}

fn key_item(qty: i64) -> CheckoutItem {
    CheckoutItem {
        product_id: KEY_PRODUCT,
        sku_id: Some(KEY_SKU),
        quantity: qty,
        fulfillment_type: None,
        manual_form: None,
    }
}

fn checkout(user_id: i64, items: Vec<CheckoutItem>, coupon: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        owner: OrderOwner::User { user_id },
        currency: None,
        items,
        coupon_code: coupon.map(String::from),
        promotion_id: None,
    }
}

async fn pay_online(shop: &Shop, order_no: &str) -> Payment {
    let order = shop.app.coordinator.orders().get_by_no(order_no).await.unwrap();
    shop.app
        .coordinator
        .pay_order(
            order,
            PayOrder {
                channel_id: Some(shop.channel_id),
                interaction_mode: InteractionMode::Redirect,
                use_wallet: false,
                client_ip: None,
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_never_oversell() {
    let shop = shop(5, 0).await;
    let orders = shop.app.coordinator.orders().clone();

    let attempts: Vec<_> = (0..20)
        .map(|i| {
            let orders = orders.clone();
            tokio::spawn(async move {
                orders
                    .create(&checkout(100 + i, vec![manual_item(1)], None), Utc::now())
                    .await
            })
        })
        .collect();
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 5);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
    }
    let counters = shop
        .inventory
        .counters(StockTarget::Product(MANUAL_PRODUCT))
        .await
        .unwrap();
    assert_eq!(counters.locked, 5);
    assert_eq!(counters.available(), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_key_pool_hands_each_secret_out_once() {
    let shop = shop(0, 4).await;
    let orders = shop.app.coordinator.orders().clone();

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let orders = orders.clone();
            tokio::spawn(async move {
                orders
                    .create(&checkout(200 + i, vec![key_item(1)], None), Utc::now())
                    .await
            })
        })
        .collect();
    let trees: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap().ok())
        .collect();
    assert_eq!(trees.len(), 4);

    for tree in &trees {
        let payment = pay_online(&shop, &tree.order.order_no).await;
        shop.app.coordinator.handle_webhook(&epay_success(&payment)).await;
    }
    let mut delivered: Vec<String> = Vec::new();
    for tree in &trees {
        let tree = shop
            .app
            .coordinator
            .orders()
            .get_for_user(tree.order.user_id.unwrap(), &tree.order.order_no)
            .await
            .unwrap();
        assert_eq!(tree.order.status, OrderStatus::Completed);
        delivered.extend(tree.all_items().iter().flat_map(|i| i.delivered_secrets.clone()));
    }
    delivered.sort();
    delivered.dedup();
    assert_eq!(delivered.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_callbacks_settle_once() {
    let shop = shop(0, 2).await;
    let tree = shop
        .app
        .coordinator
        .orders()
        .create(&checkout(7, vec![key_item(1)], None), Utc::now())
        .await
        .unwrap();
    let payment = pay_online(&shop, &tree.order.order_no).await;

    let deliveries: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = shop.app.coordinator.clone();
            let req = epay_success(&payment);
            tokio::spawn(async move { coordinator.handle_webhook(&req).await })
        })
        .collect();
    for ack in join_all(deliveries).await {
        assert_eq!(ack.unwrap().body, "success");
    }

    let settled = shop.app.coordinator.payments().get(payment.id).await.unwrap();
    assert_eq!(settled.status, PaymentStatus::Success);
    assert_eq!(settled.settle_phase, SettlePhase::Done);
    let counters = shop.inventory.counters(StockTarget::Sku(KEY_SKU)).await.unwrap();
    assert_eq!(counters.sold, 1);
    assert_eq!(counters.locked, 0);
}

#[tokio::test]
async fn test_exhausted_coupon_rejected_before_payment() {
    let shop = shop(1, 2).await;
    shop.catalog.upsert_coupon(coupon(9, "ONCE", "1.00", Some(1)));
    let orders = shop.app.coordinator.orders();

    let first = orders
        .create(&checkout(7, vec![key_item(1)], Some("once")), Utc::now())
        .await
        .unwrap();
    let second = orders
        .create(&checkout(8, vec![key_item(1)], Some("ONCE")), Utc::now())
        .await
        .unwrap();
    assert_eq!(first.order.total_amount, d("4.00"));
    assert_eq!(second.order.total_amount, d("4.00"));

    let payment = pay_online(&shop, &first.order.order_no).await;
    let ack = shop.app.coordinator.handle_webhook(&epay_success(&payment)).await;
    assert_eq!(ack.body, "success");
    assert_eq!(shop.catalog.coupon(9).unwrap().used_count, 1);

    // The second order was priced while the coupon had room; it cannot pay now
    let err = shop
        .app
        .coordinator
        .pay_order(
            second.order.clone(),
            PayOrder {
                channel_id: Some(shop.channel_id),
                interaction_mode: InteractionMode::Redirect,
                use_wallet: false,
                client_ip: None,
            },
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "COUPON_USAGE_LIMIT");
    assert!(
        shop.app
            .coordinator
            .payments()
            .store()
            .list_for_order(second.order.id)
            .await
            .unwrap()
            .is_empty()
    );
    let order = orders.get(second.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(shop.notifier.alerts(AlertKind::UsageLimitExceeded), 0);

    // New checkouts are rejected at pricing
    let third = orders
        .create(&checkout(9, vec![manual_item(1)], Some("ONCE")), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(third.code(), "COUPON_USAGE_LIMIT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_coupon_settlements_count_once() {
    let shop = shop(1, 2).await;
    shop.catalog.upsert_coupon(coupon(9, "ONCE", "1.00", Some(1)));
    let orders = shop.app.coordinator.orders();

    let mut payments = Vec::new();
    for user_id in [7, 8] {
        let tree = orders
            .create(&checkout(user_id, vec![key_item(1)], Some("ONCE")), Utc::now())
            .await
            .unwrap();
        payments.push((tree.order.id, pay_online(&shop, &tree.order.order_no).await));
    }

    let deliveries: Vec<_> = payments
        .iter()
        .map(|(_, payment)| {
            let coordinator = shop.app.coordinator.clone();
            let req = epay_success(payment);
            tokio::spawn(async move { coordinator.handle_webhook(&req).await })
        })
        .collect();
    for ack in join_all(deliveries).await {
        assert_eq!(ack.unwrap().body, "success");
    }

    // Both buyers paid, so both orders complete; the usage counter moves once
    for (order_id, _) in &payments {
        let order = orders.get(*order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
    }
    assert_eq!(shop.catalog.coupon(9).unwrap().used_count, 1);
    assert_eq!(shop.notifier.alerts(AlertKind::UsageLimitExceeded), 1);
}

#[tokio::test]
async fn test_success_after_cancel_parks_payment_for_refund() {
    let shop = shop(0, 1).await;
    let orders = shop.app.coordinator.orders();
    let tree = orders
        .create(&checkout(7, vec![key_item(1)], None), Utc::now())
        .await
        .unwrap();
    let payment = pay_online(&shop, &tree.order.order_no).await;

    orders.cancel_for_user(7, &tree.order.order_no).await.unwrap();
    let ack = shop.app.coordinator.handle_webhook(&epay_success(&payment)).await;
    assert_eq!(ack.body, "success");

    let row = shop.app.coordinator.payments().get(payment.id).await.unwrap();
    assert_eq!(row.status, PaymentStatus::Success);
    assert_eq!(row.settle_phase, SettlePhase::NeedsRefund);
    assert_eq!(shop.notifier.alerts(AlertKind::ManualRefundRequired), 1);

    let order = orders.get(tree.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    let counters = shop.inventory.counters(StockTarget::Sku(KEY_SKU)).await.unwrap();
    assert_eq!(counters.sold, 0);
    assert_eq!(counters.available(), Some(1));

    // Redelivery changes nothing
    let again = shop.app.coordinator.handle_webhook(&epay_success(&payment)).await;
    assert_eq!(again.body, "success");
    assert_eq!(shop.notifier.alerts(AlertKind::ManualRefundRequired), 1);
}

#[tokio::test]
async fn test_callback_for_wrong_amount_is_acknowledged_not_settled() {
    let shop = shop(0, 1).await;
    let tree = shop
        .app
        .coordinator
        .orders()
        .create(&checkout(7, vec![key_item(1)], None), Utc::now())
        .await
        .unwrap();
    let payment = pay_online(&shop, &tree.order.order_no).await;

    let short = digistore::payment::WebhookRequest {
        body: epay_notify_body(&payment.payment_no, "0.01", EPAY_KEY).into_bytes(),
        ..Default::default()
    };
    let ack = shop.app.coordinator.handle_webhook(&short).await;
    assert_eq!(ack.body, "success");
    assert_eq!(shop.notifier.alerts(AlertKind::AmountMismatch), 1);

    let row = shop.app.coordinator.payments().get(payment.id).await.unwrap();
    assert_eq!(row.status, PaymentStatus::Pending);
}
