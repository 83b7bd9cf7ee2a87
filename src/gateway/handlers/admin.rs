//! Admin handlers
//!
//! Every route here sits behind `admin_auth_middleware`; the admin id is
//! written into wallet remarks for audit.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use validator::Validate;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    AdjustView, AdminAdjustBody, AdminRefundBody, ApiError, ApiResult, CompleteFulfillmentBody, ok,
};
use crate::order::Order;
use crate::payment::PaymentChannel;

#[derive(Debug, serde::Serialize)]
pub struct RefundView {
    pub order: Order,
    pub wallet: AdjustView,
}

/// POST /api/v1/admin/wallet/adjust
pub async fn adjust_wallet(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<AdminAdjustBody>,
) -> ApiResult<AdjustView> {
    body.validate()?;
    if body.request_id.trim().is_empty() {
        return ApiError::bad_request("request_id is required").into_err();
    }
    let outcome = state
        .wallet()
        .admin_adjust(body.user_id, body.delta, &body.remark, admin.user_id, &body.request_id)
        .await?;
    tracing::info!(
        admin_id = admin.user_id,
        user_id = body.user_id,
        delta = %body.delta,
        applied = outcome.applied,
        "Admin wallet adjustment"
    );
    ok(outcome.into())
}

/// POST /api/v1/admin/orders/{order_no}/refund
///
/// Credits the buyer's wallet, capped at what the order received.
pub async fn refund_order(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Path(order_no): Path<String>,
    Json(body): Json<AdminRefundBody>,
) -> ApiResult<RefundView> {
    body.validate()?;
    let (order, outcome) = state
        .coordinator
        .refund_to_wallet(
            &order_no,
            body.amount,
            &body.remark,
            admin.user_id,
            &body.request_id,
        )
        .await?;
    ok(RefundView {
        order,
        wallet: outcome.into(),
    })
}

/// POST /api/v1/admin/orders/{order_no}/fulfilling
pub async fn mark_fulfilling(
    State(state): State<Arc<AppState>>,
    Path(order_no): Path<String>,
) -> ApiResult<Order> {
    ok(state.orders().mark_fulfilling(&order_no).await?)
}

/// POST /api/v1/admin/orders/{order_no}/complete
pub async fn complete_fulfillment(
    State(state): State<Arc<AppState>>,
    Path(order_no): Path<String>,
    Json(body): Json<CompleteFulfillmentBody>,
) -> ApiResult<Order> {
    body.validate()?;
    if body.delivery_text.trim().is_empty() {
        return ApiError::bad_request("delivery_text is required").into_err();
    }
    ok(state
        .orders()
        .complete_fulfillment(&order_no, &body.delivery_text)
        .await?)
}

/// GET /api/v1/admin/payment-channels
pub async fn list_channels(State(state): State<Arc<AppState>>) -> ApiResult<Vec<PaymentChannel>> {
    let channels = state.payments().channels().all().await?;
    ok(channels.as_ref().clone())
}

/// POST /api/v1/admin/payment-channels
///
/// `id = 0` creates a channel. The cache is dropped on every write.
pub async fn upsert_channel(
    State(state): State<Arc<AppState>>,
    Json(channel): Json<PaymentChannel>,
) -> ApiResult<PaymentChannel> {
    ok(state.payments().channels().upsert(channel).await?)
}

/// POST /api/v1/admin/payment-channels/invalidate
pub async fn invalidate_channels(State(state): State<Arc<AppState>>) -> ApiResult<()> {
    state.payments().channels().invalidate().await;
    tracing::info!("Payment channel cache invalidated");
    ok(())
}
