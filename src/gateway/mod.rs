//! HTTP Gateway
//!
//! axum surface over the settlement coordinator. Route groups:
//! - public: health, checkout and capture (optional bearer), guest orders, webhook
//! - user: orders and wallet (bearer required)
//! - admin: wallet adjust, refunds, fulfilment, payment channels (admin role)

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use state::AppState;

/// Build the complete router
pub fn build_router(state: Arc<AppState>) -> Router {
    // ==========================================================================
    // Public Routes (bearer optional)
    // ==========================================================================
    let checkout_routes = Router::new()
        .route("/preview", post(handlers::order::preview_checkout))
        .route("/", post(handlers::order::create_checkout))
        .layer(from_fn_with_state(
            state.clone(),
            auth::optional_auth_middleware,
        ));

    let guest_routes = Router::new()
        .route("/orders/{order_no}", post(handlers::order::guest_get_order))
        .route(
            "/orders/{order_no}/cancel",
            post(handlers::order::guest_cancel_order),
        )
        .route("/orders/{order_no}/pay", post(handlers::order::guest_pay_order));

    let capture_routes = Router::new()
        .route(
            "/{payment_no}/capture",
            post(handlers::payment::capture_payment),
        )
        .layer(from_fn_with_state(
            state.clone(),
            auth::optional_auth_middleware,
        ));

    let payment_routes = Router::new()
        .route("/webhook", post(handlers::payment::payment_webhook))
        .merge(capture_routes);

    // ==========================================================================
    // User Routes - Protected by JWT
    // ==========================================================================
    let user_routes = Router::new()
        .route("/orders", get(handlers::order::list_orders))
        .route("/orders/{order_no}", get(handlers::order::get_order))
        .route("/orders/{order_no}/cancel", post(handlers::order::cancel_order))
        .route("/orders/{order_no}/pay", post(handlers::order::pay_order))
        .route("/wallet", get(handlers::wallet::get_balance))
        .route("/wallet/transactions", get(handlers::wallet::list_transactions))
        .route("/wallet/recharge", post(handlers::wallet::recharge))
        .route(
            "/wallet/gift-cards/redeem",
            post(handlers::wallet::redeem_gift_card),
        )
        .layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    // ==========================================================================
    // Admin Routes - JWT with admin role
    // ==========================================================================
    let admin_routes = Router::new()
        .route("/wallet/adjust", post(handlers::admin::adjust_wallet))
        .route("/orders/{order_no}/refund", post(handlers::admin::refund_order))
        .route(
            "/orders/{order_no}/fulfilling",
            post(handlers::admin::mark_fulfilling),
        )
        .route(
            "/orders/{order_no}/complete",
            post(handlers::admin::complete_fulfillment),
        )
        .route(
            "/payment-channels",
            get(handlers::admin::list_channels).post(handlers::admin::upsert_channel),
        )
        .route(
            "/payment-channels/invalidate",
            post(handlers::admin::invalidate_channels),
        )
        .layer(from_fn_with_state(state.clone(), auth::admin_auth_middleware));

    let app = Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1/checkout", checkout_routes)
        .nest("/api/v1/guest", guest_routes)
        .nest("/api/v1/payments", payment_routes)
        .nest("/api/v1", user_routes)
        .nest("/api/v1/admin", admin_routes);

    // [SECURITY] Mock API routes - only compiled when 'mock-api' feature is enabled.
    // Production builds MUST be compiled with `--no-default-features` to exclude this.
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route("/token", post(handlers::mock::issue_token)),
    );

    app.with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind; is the port already in use?");
        e
    })?;

    tracing::info!(addr = %addr, "Gateway listening");
    tracing::info!("Public API:  /api/v1/checkout, /api/v1/guest/*, /api/v1/payments/*");
    tracing::info!("User API:    /api/v1/orders, /api/v1/wallet (bearer required)");
    tracing::info!("Admin API:   /api/v1/admin/* (admin role)");

    axum::serve(listener, app).await
}
