//! Checkout and order handlers (users and guests)

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use validator::Validate;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CheckoutBody, GuestCredentials, GuestPayBody, PageQuery, PaymentView, ok,
};
use super::helpers::client_ip;
use crate::order::{CheckoutRequest, Order, OrderError, OrderTree};
use crate::payment::InteractionMode;
use crate::pricing::PricedOrder;
use crate::settlement::PayOrder;

fn checkout_request(
    user: Option<Extension<AuthUser>>,
    body: CheckoutBody,
) -> Result<CheckoutRequest, ApiError> {
    body.validate()?;
    body.into_request(user.map(|Extension(u)| u.user_id))
        .ok_or_else(|| OrderError::GuestCredentialsRequired.into())
}

/// POST /api/v1/checkout/preview
///
/// Prices the cart without reserving anything.
pub async fn preview_checkout(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthUser>>,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<PricedOrder> {
    let req = checkout_request(user, body)?;
    ok(state.orders().preview(&req, Utc::now()).await?)
}

/// POST /api/v1/checkout
///
/// Reserves stock and creates the order in `pending_payment`.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthUser>>,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<OrderTree> {
    let req = checkout_request(user, body)?;
    let tree = state.orders().create(&req, Utc::now()).await?;
    tracing::info!(order_no = %tree.order.order_no, total = %tree.order.total_amount, "Checkout created");
    ok(tree)
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Vec<Order>> {
    ok(state
        .orders()
        .list_for_user(user.user_id, page.limit.clamp(1, 100), page.offset.max(0))
        .await?)
}

/// GET /api/v1/orders/{order_no}
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_no): Path<String>,
) -> ApiResult<OrderTree> {
    ok(state.orders().get_for_user(user.user_id, &order_no).await?)
}

/// POST /api/v1/orders/{order_no}/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_no): Path<String>,
) -> ApiResult<OrderTree> {
    ok(state.orders().cancel_for_user(user.user_id, &order_no).await?)
}

/// POST /api/v1/orders/{order_no}/pay
///
/// Opens a payment; `use_wallet` spends balance first.
pub async fn pay_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_no): Path<String>,
    headers: HeaderMap,
    Json(mut req): Json<PayOrder>,
) -> ApiResult<PaymentView> {
    let tree = state.orders().get_for_user(user.user_id, &order_no).await?;
    let root = state.orders().root_of(tree.order).await?;
    req.client_ip = client_ip(&headers);
    let payment = state.coordinator.pay_order(root, req, Utc::now()).await?;
    ok(payment.into())
}

/// POST /api/v1/guest/orders/{order_no}
pub async fn guest_get_order(
    State(state): State<Arc<AppState>>,
    Path(order_no): Path<String>,
    Json(creds): Json<GuestCredentials>,
) -> ApiResult<OrderTree> {
    creds.validate()?;
    ok(state
        .orders()
        .get_for_guest(&creds.email, &creds.password, &order_no)
        .await?)
}

/// POST /api/v1/guest/orders/{order_no}/cancel
pub async fn guest_cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_no): Path<String>,
    Json(creds): Json<GuestCredentials>,
) -> ApiResult<OrderTree> {
    creds.validate()?;
    ok(state
        .orders()
        .cancel_for_guest(&creds.email, &creds.password, &order_no)
        .await?)
}

/// POST /api/v1/guest/orders/{order_no}/pay
///
/// Guests have no wallet; the whole total goes through the channel.
pub async fn guest_pay_order(
    State(state): State<Arc<AppState>>,
    Path(order_no): Path<String>,
    headers: HeaderMap,
    Json(body): Json<GuestPayBody>,
) -> ApiResult<PaymentView> {
    body.validate()?;
    let tree = state
        .orders()
        .get_for_guest(&body.credentials.email, &body.credentials.password, &order_no)
        .await?;
    let root = state.orders().root_of(tree.order).await?;
    let req = PayOrder {
        channel_id: Some(body.channel_id),
        interaction_mode: body.interaction_mode.unwrap_or(InteractionMode::Redirect),
        use_wallet: false,
        client_ip: client_ip(&headers),
    };
    let payment = state.coordinator.pay_order(root, req, Utc::now()).await?;
    ok(payment.into())
}
