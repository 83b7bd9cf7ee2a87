//! Wallet handlers (signed-in users only)

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use validator::Validate;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    AdjustView, ApiResult, BalanceView, GiftCardBody, PageQuery, RechargeView, ok,
};
use super::helpers::client_ip;
use crate::settlement::RechargeRequest;
use crate::wallet::WalletTransaction;

/// GET /api/v1/wallet
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<BalanceView> {
    let account = state.wallet().account(user.user_id).await?;
    ok(BalanceView {
        user_id: account.user_id,
        balance: account.balance,
        currency: account.currency,
    })
}

/// GET /api/v1/wallet/transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Vec<WalletTransaction>> {
    ok(state
        .wallet()
        .transactions(user.user_id, page.limit, page.offset)
        .await?)
}

/// POST /api/v1/wallet/recharge
pub async fn recharge(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(mut req): Json<RechargeRequest>,
) -> ApiResult<RechargeView> {
    req.user_id = user.user_id;
    req.client_ip = client_ip(&headers);
    let (recharge, payment) = state.coordinator.recharge(req, Utc::now()).await?;
    ok(RechargeView {
        recharge,
        payment: payment.into(),
    })
}

/// POST /api/v1/wallet/gift-cards/redeem
pub async fn redeem_gift_card(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<GiftCardBody>,
) -> ApiResult<AdjustView> {
    body.validate()?;
    let outcome = state
        .wallet()
        .redeem_gift_card(user.user_id, &body.code, Utc::now())
        .await?;
    ok(outcome.into())
}
