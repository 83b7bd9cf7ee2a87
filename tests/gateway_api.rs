//! End-to-end storefront flows through the HTTP router

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::*;
use digistore::gateway::auth::{JwtAuth, Role};
use digistore::gateway::build_router;
use digistore::inventory::{InventoryStore, StockTarget};

const BUYER: i64 = 7;
const ADMIN: i64 = 1;

fn token(user_id: i64, role: Role) -> String {
    JwtAuth::new(JWT_SECRET)
        .issue(user_id, role, Duration::hours(1))
        .unwrap()
}

async fn call(
    router: &Router,
    method: &str,
    path: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(path);
    if let Some(t) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let request = match body {
        Some(b) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn webhook(router: &Router, form: String) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

fn amount(v: &Value) -> rust_decimal::Decimal {
    d(v.as_str().unwrap())
}

fn key_cart(qty: i64) -> Value {
    json!({ "items": [{ "product_id": KEY_PRODUCT, "sku_id": KEY_SKU, "quantity": qty }] })
}

fn secrets_of(tree: &Value) -> Vec<String> {
    let mut out: Vec<String> = tree["items"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|i| i["delivered_secrets"].as_array().cloned().unwrap_or_default())
        .filter_map(|s| s.as_str().map(String::from))
        .collect();
    for child in tree["children"].as_array().into_iter().flatten() {
        out.extend(secrets_of(child));
    }
    out
}

#[tokio::test]
async fn test_health_on_memory_stores() {
    let shop = shop(1, 0).await;
    let router = build_router(shop.app.state.clone());
    let (status, body) = call(&router, "GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["storage"], "memory");
}

#[tokio::test]
async fn test_user_checkout_pay_webhook_delivers_keys_once() {
    let shop = shop(1, 3).await;
    let router = build_router(shop.app.state.clone());
    let buyer = token(BUYER, Role::User);

    let (status, preview) = call(
        &router,
        "POST",
        "/api/v1/checkout/preview",
        Some(&buyer),
        Some(key_cart(2)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&preview["data"]["total_amount"]), d("10"));

    let (status, created) =
        call(&router, "POST", "/api/v1/checkout", Some(&buyer), Some(key_cart(2))).await;
    assert_eq!(status, StatusCode::OK);
    let order = &created["data"]["order"];
    assert_eq!(amount(&order["total_amount"]), amount(&preview["data"]["total_amount"]));
    assert_eq!(order["status"], "pending_payment");
    let order_no = order["order_no"].as_str().unwrap().to_string();

    let (status, paid) = call(
        &router,
        "POST",
        &format!("/api/v1/orders/{order_no}/pay"),
        Some(&buyer),
        Some(json!({ "channel_id": shop.channel_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pay_url = paid["data"]["pay_url"].as_str().unwrap();
    assert!(pay_url.starts_with("https://pay.example.com/submit.php?"));
    let payment_no = paid["data"]["payment_no"].as_str().unwrap().to_string();
    let money = paid["data"]["amount"].as_str().unwrap().to_string();

    // The provider retries; both deliveries are acknowledged
    for _ in 0..2 {
        let (status, ack) =
            webhook(&router, epay_notify_body(&payment_no, &money, EPAY_KEY)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, "success");
    }

    let (status, tree) = call(
        &router,
        "GET",
        &format!("/api/v1/orders/{order_no}"),
        Some(&buyer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree["data"]["order"]["status"], "completed");
    let mut delivered = secrets_of(&tree["data"]);
    delivered.sort();
    assert_eq!(delivered, vec!["KEY-001".to_string(), "KEY-002".to_string()]);

    let counters = shop.inventory.counters(StockTarget::Sku(KEY_SKU)).await.unwrap();
    assert_eq!(counters.sold, 2);
    assert_eq!(counters.locked, 0);
}

#[tokio::test]
async fn test_forged_webhook_is_refused() {
    let shop = shop(1, 1).await;
    let router = build_router(shop.app.state.clone());
    let buyer = token(BUYER, Role::User);

    let (_, created) =
        call(&router, "POST", "/api/v1/checkout", Some(&buyer), Some(key_cart(1))).await;
    let order_no = created["data"]["order"]["order_no"].as_str().unwrap().to_string();
    let (_, paid) = call(
        &router,
        "POST",
        &format!("/api/v1/orders/{order_no}/pay"),
        Some(&buyer),
        Some(json!({ "channel_id": shop.channel_id })),
    )
    .await;
    let payment_no = paid["data"]["payment_no"].as_str().unwrap().to_string();

    let (status, ack) =
        webhook(&router, epay_notify_body(&payment_no, "5.00", "not-the-key")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, "fail");

    let (_, tree) = call(
        &router,
        "GET",
        &format!("/api/v1/orders/{order_no}"),
        Some(&buyer),
        None,
    )
    .await;
    assert_eq!(tree["data"]["order"]["status"], "pending_payment");
}

#[tokio::test]
async fn test_shortage_reserves_nothing() {
    let shop = shop(2, 1).await;
    let router = build_router(shop.app.state.clone());
    let buyer = token(BUYER, Role::User);

    let cart = json!({ "items": [
        { "product_id": MANUAL_PRODUCT, "quantity": 1, "manual_form": { "account": "p1" } },
        { "product_id": KEY_PRODUCT, "sku_id": KEY_SKU, "quantity": 2 },
    ]});
    let (status, body) = call(&router, "POST", "/api/v1/checkout", Some(&buyer), Some(cart)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["msg"].as_str().unwrap().starts_with("INSUFFICIENT_STOCK"));

    let manual = shop.inventory.counters(StockTarget::Product(MANUAL_PRODUCT)).await.unwrap();
    assert_eq!(manual.locked, 0);
    let keys = shop.inventory.counters(StockTarget::Sku(KEY_SKU)).await.unwrap();
    assert_eq!(keys.locked, 0);
}

#[tokio::test]
async fn test_guest_order_needs_matching_password() {
    let shop = shop(1, 0).await;
    let router = build_router(shop.app.state.clone());

    let cart = json!({
        "items": [{ "product_id": MANUAL_PRODUCT, "quantity": 1, "manual_form": { "account": "p1" } }],
        "guest": { "email": "Buyer@Example.com", "password": "order-pass" },
    });
    let (status, created) = call(&router, "POST", "/api/v1/checkout", None, Some(cart)).await;
    assert_eq!(status, StatusCode::OK);
    let order_no = created["data"]["order"]["order_no"].as_str().unwrap().to_string();
    assert!(created["data"]["order"].get("guest_password_hash").is_none());

    let lookup = format!("/api/v1/guest/orders/{order_no}");
    let (status, _) = call(
        &router,
        "POST",
        &lookup,
        None,
        Some(json!({ "email": "buyer@example.com", "password": "wrong-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, cancelled) = call(
        &router,
        "POST",
        &format!("{lookup}/cancel"),
        None,
        Some(json!({ "email": "buyer@example.com", "password": "order-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["data"]["order"]["status"], "cancelled");

    let manual = shop.inventory.counters(StockTarget::Product(MANUAL_PRODUCT)).await.unwrap();
    assert_eq!(manual.available(), Some(1));
}

#[tokio::test]
async fn test_checkout_without_identity_is_rejected() {
    let shop = shop(1, 0).await;
    let router = build_router(shop.app.state.clone());
    let (status, body) = call(&router, "POST", "/api/v1/checkout", None, Some(key_cart(1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["msg"].as_str().unwrap().starts_with("GUEST_CREDENTIALS_REQUIRED"));
}

#[tokio::test]
async fn test_recharge_then_wallet_order_then_capped_refund() {
    let shop = shop(1, 1).await;
    let router = build_router(shop.app.state.clone());
    let buyer = token(BUYER, Role::User);
    let admin = token(ADMIN, Role::Admin);

    let (status, recharge) = call(
        &router,
        "POST",
        "/api/v1/wallet/recharge",
        Some(&buyer),
        Some(json!({ "amount": "20.00", "channel_id": shop.channel_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payment_no = recharge["data"]["payment"]["payment_no"].as_str().unwrap().to_string();
    let (_, ack) = webhook(&router, epay_notify_body(&payment_no, "20.00", EPAY_KEY)).await;
    assert_eq!(ack, "success");

    let (_, wallet) = call(&router, "GET", "/api/v1/wallet", Some(&buyer), None).await;
    assert_eq!(amount(&wallet["data"]["balance"]), d("20"));

    let (_, created) =
        call(&router, "POST", "/api/v1/checkout", Some(&buyer), Some(key_cart(1))).await;
    let order_no = created["data"]["order"]["order_no"].as_str().unwrap().to_string();
    let (status, paid) = call(
        &router,
        "POST",
        &format!("/api/v1/orders/{order_no}/pay"),
        Some(&buyer),
        Some(json!({ "use_wallet": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["data"]["status"], "success");

    let (_, wallet) = call(&router, "GET", "/api/v1/wallet", Some(&buyer), None).await;
    assert_eq!(amount(&wallet["data"]["balance"]), d("15"));

    // Buyers cannot reach admin routes
    let refund_path = format!("/api/v1/admin/orders/{order_no}/refund");
    let (status, _) = call(
        &router,
        "POST",
        &refund_path,
        Some(&buyer),
        Some(json!({ "amount": "1.00", "remark": "x", "request_id": "rf-0" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &router,
        "POST",
        &refund_path,
        Some(&admin),
        Some(json!({ "amount": "6.00", "remark": "too much", "request_id": "rf-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["msg"].as_str().unwrap().starts_with("REFUND_EXCEEDS_PAID"));

    let (status, refunded) = call(
        &router,
        "POST",
        &refund_path,
        Some(&admin),
        Some(json!({ "amount": "5.00", "remark": "customer request", "request_id": "rf-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&refunded["data"]["order"]["refunded_amount"]), d("5"));
    assert_eq!(amount(&refunded["data"]["wallet"]["balance"]), d("20"));

    // Resubmitting the same request is a no-op
    let (status, again) = call(
        &router,
        "POST",
        &refund_path,
        Some(&admin),
        Some(json!({ "amount": "5.00", "remark": "customer request", "request_id": "rf-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&again["data"]["order"]["refunded_amount"]), d("5"));
    assert_eq!(amount(&again["data"]["wallet"]["balance"]), d("20"));

    // Ledger replays to the balance
    let (_, txs) = call(
        &router,
        "GET",
        "/api/v1/wallet/transactions?limit=50",
        Some(&buyer),
        None,
    )
    .await;
    let mut rows: Vec<Value> = txs["data"].as_array().unwrap().clone();
    rows.sort_by_key(|r| r["id"].as_i64().unwrap());
    assert_eq!(rows.len(), 3);
    let mut running = d("0");
    for row in &rows {
        running += amount(&row["delta"]);
        assert_eq!(running, amount(&row["balance_after"]));
    }
    assert_eq!(running, d("20.00"));
}

#[tokio::test]
async fn test_admin_adjust_is_idempotent_per_request_id() {
    let shop = shop(1, 0).await;
    let router = build_router(shop.app.state.clone());
    let admin = token(ADMIN, Role::Admin);
    let body = json!({
        "user_id": BUYER,
        "delta": "8.50",
        "remark": "goodwill",
        "request_id": "ticket-77",
    });

    let (status, first) =
        call(&router, "POST", "/api/v1/admin/wallet/adjust", Some(&admin), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["applied"], true);
    let (_, second) =
        call(&router, "POST", "/api/v1/admin/wallet/adjust", Some(&admin), Some(body)).await;
    assert_eq!(second["data"]["applied"], false);
    assert_eq!(amount(&second["data"]["balance"]), d("8.5"));
}

#[tokio::test]
async fn test_protected_routes_need_bearer() {
    let shop = shop(1, 0).await;
    let router = build_router(shop.app.state.clone());
    let (status, body) = call(&router, "GET", "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_ne!(body["code"], 0);
}

#[tokio::test]
async fn test_capture_is_limited_to_the_payment_owner() {
    let shop = shop(1, 1).await;
    let router = build_router(shop.app.state.clone());
    let buyer = token(BUYER, Role::User);

    let (_, created) =
        call(&router, "POST", "/api/v1/checkout", Some(&buyer), Some(key_cart(1))).await;
    let order_no = created["data"]["order"]["order_no"].as_str().unwrap().to_string();
    let (_, paid) = call(
        &router,
        "POST",
        &format!("/api/v1/orders/{order_no}/pay"),
        Some(&buyer),
        Some(json!({ "channel_id": shop.channel_id })),
    )
    .await;
    let payment_no = paid["data"]["payment_no"].as_str().unwrap().to_string();
    let money = paid["data"]["amount"].as_str().unwrap().to_string();
    webhook(&router, epay_notify_body(&payment_no, &money, EPAY_KEY)).await;

    let capture = format!("/api/v1/payments/{payment_no}/capture");
    let (status, body) = call(&router, "POST", &capture, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["msg"].as_str().map(|m| m.contains(&payment_no)), Some(true));

    let stranger = token(BUYER + 1, Role::User);
    let (status, _) = call(&router, "POST", &capture, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&router, "POST", &capture, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "success");

    let admin = token(ADMIN, Role::Admin);
    let (status, _) = call(&router, "POST", &capture, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_guest_capture_needs_order_credentials() {
    let shop = shop(1, 0).await;
    let router = build_router(shop.app.state.clone());

    let cart = json!({
        "items": [{ "product_id": MANUAL_PRODUCT, "quantity": 1, "manual_form": { "account": "p1" } }],
        "guest": { "email": "guest@example.com", "password": "order-pass" },
    });
    let (_, created) = call(&router, "POST", "/api/v1/checkout", None, Some(cart)).await;
    let order_no = created["data"]["order"]["order_no"].as_str().unwrap().to_string();
    let (status, paid) = call(
        &router,
        "POST",
        &format!("/api/v1/guest/orders/{order_no}/pay"),
        None,
        Some(json!({
            "email": "guest@example.com",
            "password": "order-pass",
            "channel_id": shop.channel_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payment_no = paid["data"]["payment_no"].as_str().unwrap().to_string();
    let money = paid["data"]["amount"].as_str().unwrap().to_string();
    webhook(&router, epay_notify_body(&payment_no, &money, EPAY_KEY)).await;

    let capture = format!("/api/v1/payments/{payment_no}/capture");
    let wrong = json!({ "guest": { "email": "guest@example.com", "password": "wrong-pass" } });
    let (status, _) = call(&router, "POST", &capture, None, Some(wrong)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A signed-in user does not own a guest payment
    let buyer = token(BUYER, Role::User);
    let (status, _) = call(&router, "POST", &capture, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let right = json!({ "guest": { "email": "guest@example.com", "password": "order-pass" } });
    let (status, body) = call(&router, "POST", &capture, None, Some(right)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "success");
}
