//! PostgreSQL schema bootstrap
//!
//! Idempotent DDL for every table the Pg stores touch. Executed once at
//! startup when `postgres_url` is configured.

use sqlx::PgPool;

/// Create all storefront tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");

    for &(name, ddl) in TABLES {
        // Some entries carry an index too; raw_sql allows multiple statements
        sqlx::raw_sql(ddl)
            .execute(pool)
            .await
            .inspect_err(|e| tracing::error!(table = name, error = %e, "Failed to apply DDL"))?;
    }

    tracing::info!("PostgreSQL schema ready ({} statements)", TABLES.len());
    Ok(())
}

const TABLES: &[(&str, &str)] = &[
    ("products_tb", CREATE_PRODUCTS_TABLE),
    ("skus_tb", CREATE_SKUS_TABLE),
    ("coupons_tb", CREATE_COUPONS_TABLE),
    ("coupon_usages_tb", CREATE_COUPON_USAGES_TABLE),
    ("promotions_tb", CREATE_PROMOTIONS_TABLE),
    ("promotion_usages_tb", CREATE_PROMOTION_USAGES_TABLE),
    ("product_stock_tb", CREATE_PRODUCT_STOCK_TABLE),
    ("sku_stock_tb", CREATE_SKU_STOCK_TABLE),
    ("card_secrets_tb", CREATE_CARD_SECRETS_TABLE),
    ("card_secrets_tb index", CREATE_CARD_SECRETS_INDEX),
    ("stock_reservations_tb", CREATE_STOCK_RESERVATIONS_TABLE),
    ("orders_tb", CREATE_ORDERS_TABLE),
    ("orders_tb index", CREATE_ORDERS_EXPIRY_INDEX),
    ("order_items_tb", CREATE_ORDER_ITEMS_TABLE),
    ("order_refunds_tb", CREATE_ORDER_REFUNDS_TABLE),
    ("wallet_accounts_tb", CREATE_WALLET_ACCOUNTS_TABLE),
    ("wallet_transactions_tb", CREATE_WALLET_TRANSACTIONS_TABLE),
    ("wallet_recharges_tb", CREATE_WALLET_RECHARGES_TABLE),
    ("gift_cards_tb", CREATE_GIFT_CARDS_TABLE),
    ("payment_channels_tb", CREATE_PAYMENT_CHANNELS_TABLE),
    ("payments_tb", CREATE_PAYMENTS_TABLE),
    ("payments_tb index", CREATE_PAYMENTS_UNSETTLED_INDEX),
];

const CREATE_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS products_tb (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    price NUMERIC(20, 2) NOT NULL,
    currency VARCHAR(8) NOT NULL DEFAULT 'CNY',
    active BOOLEAN NOT NULL DEFAULT TRUE,
    fulfillment_type VARCHAR(16) NOT NULL,
    manual_form JSONB NOT NULL DEFAULT '[]'::jsonb
)
"#;

const CREATE_SKUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS skus_tb (
    id BIGSERIAL PRIMARY KEY,
    product_id BIGINT NOT NULL REFERENCES products_tb(id),
    name VARCHAR(255) NOT NULL,
    price NUMERIC(20, 2),
    active BOOLEAN NOT NULL DEFAULT TRUE
)
"#;

const CREATE_COUPONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS coupons_tb (
    id BIGSERIAL PRIMARY KEY,
    code VARCHAR(64) NOT NULL,
    discount_type VARCHAR(16) NOT NULL,
    value NUMERIC(20, 2) NOT NULL,
    max_discount NUMERIC(20, 2),
    min_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    currency VARCHAR(8) NOT NULL DEFAULT 'CNY',
    scope_product_ids BIGINT[] NOT NULL DEFAULT '{}',
    scope_sku_ids BIGINT[] NOT NULL DEFAULT '{}',
    usage_limit BIGINT,
    per_user_limit BIGINT,
    used_count BIGINT NOT NULL DEFAULT 0 CHECK (used_count >= 0),
    starts_at TIMESTAMPTZ,
    ends_at TIMESTAMPTZ,
    active BOOLEAN NOT NULL DEFAULT TRUE
);
CREATE UNIQUE INDEX IF NOT EXISTS coupons_code_idx ON coupons_tb (lower(code))
"#;

const CREATE_COUPON_USAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS coupon_usages_tb (
    coupon_id BIGINT NOT NULL REFERENCES coupons_tb(id),
    order_id BIGINT NOT NULL,
    user_id BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (coupon_id, order_id)
)
"#;

const CREATE_PROMOTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS promotions_tb (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    product_id BIGINT NOT NULL REFERENCES products_tb(id),
    sku_id BIGINT,
    discount_type VARCHAR(16) NOT NULL,
    value NUMERIC(20, 2) NOT NULL,
    min_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    usage_limit BIGINT,
    used_count BIGINT NOT NULL DEFAULT 0 CHECK (used_count >= 0),
    starts_at TIMESTAMPTZ,
    ends_at TIMESTAMPTZ,
    active BOOLEAN NOT NULL DEFAULT TRUE
)
"#;

const CREATE_PROMOTION_USAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS promotion_usages_tb (
    promotion_id BIGINT NOT NULL REFERENCES promotions_tb(id),
    order_id BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (promotion_id, order_id)
)
"#;

// locked + sold never exceeds total for manual stock
const CREATE_PRODUCT_STOCK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS product_stock_tb (
    product_id BIGINT PRIMARY KEY,
    total BIGINT NOT NULL DEFAULT 0,
    locked BIGINT NOT NULL DEFAULT 0 CHECK (locked >= 0),
    sold BIGINT NOT NULL DEFAULT 0 CHECK (sold >= 0)
)
"#;

const CREATE_SKU_STOCK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sku_stock_tb (
    sku_id BIGINT PRIMARY KEY,
    total BIGINT NOT NULL DEFAULT 0,
    locked BIGINT NOT NULL DEFAULT 0 CHECK (locked >= 0),
    sold BIGINT NOT NULL DEFAULT 0 CHECK (sold >= 0)
)
"#;

const CREATE_CARD_SECRETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS card_secrets_tb (
    id BIGSERIAL PRIMARY KEY,
    sku_id BIGINT NOT NULL,
    secret TEXT NOT NULL,
    status SMALLINT NOT NULL,
    reservation_token VARCHAR(64),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_CARD_SECRETS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS card_secrets_pool_idx ON card_secrets_tb (sku_id, status, created_at, id)
"#;

const CREATE_STOCK_RESERVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stock_reservations_tb (
    token VARCHAR(64) PRIMARY KEY,
    order_ref VARCHAR(64) NOT NULL,
    target_kind SMALLINT NOT NULL,
    target_id BIGINT NOT NULL,
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    secret_ids BIGINT[] NOT NULL DEFAULT '{}',
    state SMALLINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders_tb (
    id BIGSERIAL PRIMARY KEY,
    order_no VARCHAR(64) NOT NULL UNIQUE,
    parent_id BIGINT REFERENCES orders_tb(id),
    user_id BIGINT,
    guest_email VARCHAR(255),
    guest_password_hash VARCHAR(255),
    status SMALLINT NOT NULL,
    currency VARCHAR(8) NOT NULL,
    original_amount NUMERIC(20, 2) NOT NULL,
    discount_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    promotion_discount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    total_amount NUMERIC(20, 2) NOT NULL CHECK (total_amount >= 0),
    wallet_paid NUMERIC(20, 2) NOT NULL DEFAULT 0,
    online_paid NUMERIC(20, 2) NOT NULL DEFAULT 0,
    refunded_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    coupon_id BIGINT,
    promotion_id BIGINT,
    paid_payment_id BIGINT,
    delivery_text TEXT,
    expires_at TIMESTAMPTZ NOT NULL,
    paid_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (refunded_amount <= total_amount)
)
"#;

const CREATE_ORDERS_EXPIRY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS orders_expiry_idx ON orders_tb (status, expires_at) WHERE parent_id IS NULL
"#;

const CREATE_ORDER_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_items_tb (
    id BIGSERIAL PRIMARY KEY,
    order_id BIGINT NOT NULL REFERENCES orders_tb(id),
    product_id BIGINT NOT NULL,
    sku_id BIGINT,
    name VARCHAR(255) NOT NULL,
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    fulfillment_type VARCHAR(16) NOT NULL,
    unit_price NUMERIC(20, 2) NOT NULL,
    original_amount NUMERIC(20, 2) NOT NULL,
    promotion_id BIGINT,
    promotion_discount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    coupon_discount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    total_amount NUMERIC(20, 2) NOT NULL,
    manual_form JSONB NOT NULL DEFAULT '{}'::jsonb,
    reservation_token VARCHAR(64),
    delivered_secrets TEXT[] NOT NULL DEFAULT '{}'
)
"#;

const CREATE_ORDER_REFUNDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_refunds_tb (
    order_id BIGINT NOT NULL REFERENCES orders_tb(id),
    request_id VARCHAR(64) NOT NULL,
    amount NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (order_id, request_id)
)
"#;

const CREATE_WALLET_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_accounts_tb (
    user_id BIGINT PRIMARY KEY,
    balance NUMERIC(20, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    currency VARCHAR(8) NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

// correlation is the idempotency key of a balance change
const CREATE_WALLET_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_transactions_tb (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES wallet_accounts_tb(user_id),
    kind SMALLINT NOT NULL,
    delta NUMERIC(20, 2) NOT NULL,
    balance_after NUMERIC(20, 2) NOT NULL,
    remark TEXT NOT NULL DEFAULT '',
    correlation VARCHAR(128) NOT NULL UNIQUE,
    order_id BIGINT,
    payment_id BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS wallet_transactions_user_idx ON wallet_transactions_tb (user_id, id DESC)
"#;

const CREATE_WALLET_RECHARGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_recharges_tb (
    id BIGSERIAL PRIMARY KEY,
    recharge_no VARCHAR(64) NOT NULL UNIQUE,
    user_id BIGINT NOT NULL,
    payment_id BIGINT,
    channel_id BIGINT NOT NULL,
    amount NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    fee NUMERIC(20, 2) NOT NULL DEFAULT 0,
    payable_amount NUMERIC(20, 2) NOT NULL,
    currency VARCHAR(8) NOT NULL,
    status SMALLINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    paid_at TIMESTAMPTZ
)
"#;

const CREATE_GIFT_CARDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS gift_cards_tb (
    id BIGSERIAL PRIMARY KEY,
    code VARCHAR(64) NOT NULL UNIQUE,
    amount NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    currency VARCHAR(8) NOT NULL,
    status SMALLINT NOT NULL,
    redeemed_by BIGINT,
    redeemed_at TIMESTAMPTZ,
    expires_at TIMESTAMPTZ
)
"#;

const CREATE_PAYMENT_CHANNELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payment_channels_tb (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(128) NOT NULL,
    provider_type VARCHAR(32) NOT NULL,
    channel_type VARCHAR(32) NOT NULL,
    interaction_modes TEXT[] NOT NULL DEFAULT '{}',
    fee_rate NUMERIC(10, 4) NOT NULL DEFAULT 0,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    config JSONB NOT NULL DEFAULT '{}'::jsonb,
    sort_order INTEGER NOT NULL DEFAULT 0
)
"#;

const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments_tb (
    id BIGSERIAL PRIMARY KEY,
    payment_no VARCHAR(64) NOT NULL UNIQUE,
    order_id BIGINT,
    recharge_id BIGINT,
    user_id BIGINT,
    channel_id BIGINT,
    provider_type VARCHAR(32) NOT NULL,
    channel_type VARCHAR(32) NOT NULL DEFAULT '',
    interaction_mode VARCHAR(16) NOT NULL,
    amount NUMERIC(20, 2) NOT NULL CHECK (amount >= 0),
    fee NUMERIC(20, 2) NOT NULL DEFAULT 0,
    wallet_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
    currency VARCHAR(8) NOT NULL,
    status SMALLINT NOT NULL,
    settle_phase SMALLINT NOT NULL,
    provider_ref VARCHAR(128),
    provider_payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    pay_url TEXT,
    qr_code TEXT,
    expires_at TIMESTAMPTZ NOT NULL,
    paid_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK ((order_id IS NULL) <> (recharge_id IS NULL))
);
CREATE INDEX IF NOT EXISTS payments_order_idx ON payments_tb (order_id)
"#;

const CREATE_PAYMENTS_UNSETTLED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS payments_unsettled_idx ON payments_tb (status, settle_phase, updated_at)
"#;
