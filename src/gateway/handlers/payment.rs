//! Payment handlers: active capture and the single provider webhook

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use validator::Validate;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, CaptureBody, PaymentView, ok};
use crate::payment::{Payment, PaymentError, WebhookAck, WebhookRequest};

/// POST /api/v1/payments/{payment_no}/capture
///
/// Asks the provider for the live status and settles a confirmed success.
/// Returns the stored status when the provider cannot be queried.
///
/// Owners only: the paying user (or an admin) by bearer, a guest by the
/// order's credentials. Anyone else sees `PAYMENT_NOT_FOUND`.
pub async fn capture_payment(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthUser>>,
    Path(payment_no): Path<String>,
    body: Option<Json<CaptureBody>>,
) -> ApiResult<PaymentView> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    body.validate()?;
    let payment = state.payments().get_by_no(&payment_no).await?;
    authorize_capture(&state, user.map(|Extension(u)| u), &body, &payment).await?;

    let payment = state.coordinator.capture(&payment_no).await?;
    ok(payment.into())
}

async fn authorize_capture(
    state: &AppState,
    user: Option<AuthUser>,
    body: &CaptureBody,
    payment: &Payment,
) -> Result<(), ApiError> {
    let not_found = || ApiError::from(PaymentError::PaymentNotFound(payment.payment_no.clone()));
    match (user, &body.guest) {
        (Some(u), _) if u.is_admin() || payment.user_id == Some(u.user_id) => Ok(()),
        (None, Some(guest)) if payment.user_id.is_none() => {
            let order_id = payment.order_id.ok_or_else(not_found)?;
            let order = state.orders().get(order_id).await?;
            state
                .orders()
                .get_for_guest(&guest.email, &guest.password, &order.order_no)
                .await
                .map_err(|_| not_found())?;
            Ok(())
        }
        _ => Err(not_found()),
    }
}

/// POST /api/v1/payments/webhook
///
/// Every provider posts here; the body is sniffed to find the adapter. The
/// response is the literal acknowledgement that provider expects.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let req = WebhookRequest {
        headers: lowercase_headers(&headers),
        query: query.unwrap_or_default(),
        body: body.to_vec(),
    };
    let ack = state.coordinator.handle_webhook(&req).await;
    ack_response(ack)
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn ack_response(ack: WebhookAck) -> Response {
    let status = StatusCode::from_u16(ack.status).unwrap_or(StatusCode::OK);
    let mut response = (status, ack.body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(ack.content_type));
    response
}
