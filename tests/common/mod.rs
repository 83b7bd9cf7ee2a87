//! Shared fixture: the full core over in-memory stores, with a real Epay
//! channel so callbacks go through genuine signature checks.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;

use digistore::app::{App, Stores};
use digistore::catalog::{
    Coupon, DiscountType, FulfillmentType, ManualFormField, MemoryCatalog, Product, Sku,
};
use digistore::config::AppConfig;
use digistore::core_types::Currency;
use digistore::inventory::{InventoryStore, MemoryInventory};
use digistore::notify::RecordingNotifier;
use digistore::order::MemoryOrderStore;
use digistore::payment::providers::EpayProvider;
use digistore::payment::{
    InteractionMode, MemoryPaymentStore, Payment, PaymentChannel, ProviderHttp, ProviderRegistry,
    ProviderType, WebhookRequest,
};
use digistore::wallet::MemoryWalletStore;

pub const EPAY_PID: &str = "1001";
pub const EPAY_KEY: &str = "integration-key";
pub const JWT_SECRET: &str = "integration-secret";

pub const MANUAL_PRODUCT: i64 = 1;
pub const KEY_PRODUCT: i64 = 2;
pub const KEY_SKU: i64 = 20;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub struct Shop {
    pub app: App,
    pub catalog: Arc<MemoryCatalog>,
    pub inventory: Arc<MemoryInventory>,
    pub notifier: Arc<RecordingNotifier>,
    pub channel_id: i64,
}

/// Manual product 1 (10.00, `manual_stock` units), key product 2 with SKU 20
/// (5.00, `keys` card secrets), one Epay channel without fee.
pub async fn shop(manual_stock: i64, keys: usize) -> Shop {
    let config = AppConfig::from_yaml_str(&format!(
        "gateway:\n  host: 127.0.0.1\n  port: 0\n  jwt_secret: {JWT_SECRET}\n"
    ))
    .unwrap();

    let catalog = Arc::new(MemoryCatalog::new());
    let inventory = Arc::new(MemoryInventory::new());
    let stores = Stores {
        catalog: catalog.clone(),
        inventory: inventory.clone(),
        orders: Arc::new(MemoryOrderStore::new()),
        payments: Arc::new(MemoryPaymentStore::new()),
        wallet: Arc::new(MemoryWalletStore::new()),
    };
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(EpayProvider::new(ProviderHttp::default())));
    let notifier = Arc::new(RecordingNotifier::new());
    let app = App::wire(&config, stores, registry, notifier.clone(), None);

    catalog.upsert_product(Product {
        id: MANUAL_PRODUCT,
        name: "Game top-up".into(),
        price: d("10.00"),
        currency: Currency::default(),
        active: true,
        fulfillment_type: FulfillmentType::Manual,
        manual_form: vec![ManualFormField {
            key: "account".into(),
            label: "Game account".into(),
            required: true,
            max_len: 32,
        }],
    });
    catalog.upsert_product(Product {
        id: KEY_PRODUCT,
        name: "Activation key".into(),
        price: d("5.00"),
        currency: Currency::default(),
        active: true,
        fulfillment_type: FulfillmentType::Auto,
        manual_form: Vec::new(),
    });
    catalog.upsert_sku(Sku {
        id: KEY_SKU,
        product_id: KEY_PRODUCT,
        name: "Standard".into(),
        price: None,
        active: true,
    });
    inventory.set_manual_total(MANUAL_PRODUCT, manual_stock).await.unwrap();
    let secrets: Vec<String> = (1..=keys).map(|i| format!("KEY-{i:03}")).collect();
    if !secrets.is_empty() {
        inventory.add_secrets(KEY_SKU, &secrets).await.unwrap();
    }

    let channel = app
        .coordinator
        .payments()
        .channels()
        .upsert(epay_channel())
        .await
        .unwrap();

    Shop {
        app,
        catalog,
        inventory,
        notifier,
        channel_id: channel.id,
    }
}

pub fn epay_channel() -> PaymentChannel {
    PaymentChannel {
        id: 0,
        name: "Alipay via Epay".into(),
        provider_type: ProviderType::Epay,
        channel_type: "alipay".into(),
        interaction_modes: vec![InteractionMode::Redirect],
        fee_rate: Decimal::ZERO,
        active: true,
        config: json!({
            "pid": EPAY_PID,
            "key": EPAY_KEY,
            "gateway_url": "https://pay.example.com",
        }),
        sort_order: 0,
    }
}

pub fn coupon(id: i64, code: &str, value: &str, usage_limit: Option<i64>) -> Coupon {
    Coupon {
        id,
        code: code.into(),
        discount_type: DiscountType::Fixed,
        value: d(value),
        max_discount: None,
        min_amount: Decimal::ZERO,
        currency: Currency::default(),
        scope_product_ids: Vec::new(),
        scope_sku_ids: Vec::new(),
        usage_limit,
        per_user_limit: None,
        used_count: 0,
        starts_at: None,
        ends_at: None,
        active: true,
    }
}

/// Form-encoded Epay notify for `payment`, signed with `key`
pub fn epay_notify_body(payment_no: &str, money: &str, key: &str) -> String {
    let mut form: BTreeMap<String, String> = [
        ("pid", EPAY_PID),
        ("trade_no", "EP2024000001"),
        ("out_trade_no", payment_no),
        ("type", "alipay"),
        ("name", "digistore order"),
        ("money", money),
        ("trade_status", "TRADE_SUCCESS"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let sign = EpayProvider::sign(&form, key);
    form.insert("sign".into(), sign);
    form.insert("sign_type".into(), "MD5".into());
    serde_urlencoded::to_string(&form).unwrap()
}

pub fn epay_success(payment: &Payment) -> WebhookRequest {
    WebhookRequest {
        body: epay_notify_body(&payment.payment_no, &payment.amount.to_string(), EPAY_KEY)
            .into_bytes(),
        ..Default::default()
    }
}
