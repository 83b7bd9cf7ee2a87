//! Request and response bodies of the storefront API

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core_types::{ChannelId, Currency, PromotionId, UserId};
use crate::order::{CheckoutItem, CheckoutRequest, OrderOwner};
use crate::payment::{InteractionMode, Payment, PaymentStatus};
use crate::settlement::SettlePhase;
use crate::wallet::{AdjustOutcome, RechargeOrder, WalletTransaction};

/// Email + order password a guest re-presents on every access
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GuestCredentials {
    #[validate(email(message = "invalid email"))]
    pub email: String,
    #[validate(length(min = 6, max = 64, message = "order password must be 6-64 characters"))]
    pub password: String,
}

/// Checkout body shared by preview and create.
///
/// Signed-in callers are owners through their token; guests must include
/// `guest` credentials.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutBody {
    #[validate(length(min = 1, max = 50, message = "1-50 items per order"))]
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub promotion_id: Option<PromotionId>,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    #[validate(nested)]
    pub guest: Option<GuestCredentials>,
}

impl CheckoutBody {
    pub fn into_request(self, user_id: Option<UserId>) -> Option<CheckoutRequest> {
        let owner = match (user_id, self.guest) {
            (Some(user_id), _) => OrderOwner::User { user_id },
            (None, Some(g)) => OrderOwner::Guest {
                email: g.email,
                password: g.password,
            },
            (None, None) => return None,
        };
        Some(CheckoutRequest {
            owner,
            currency: self.currency,
            items: self.items,
            coupon_code: self.coupon_code,
            promotion_id: self.promotion_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GuestPayBody {
    #[serde(flatten)]
    #[validate(nested)]
    pub credentials: GuestCredentials,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub interaction_mode: Option<InteractionMode>,
}

/// Capture body: guests prove ownership of the paid order, signed-in
/// callers send nothing
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CaptureBody {
    #[serde(default)]
    #[validate(nested)]
    pub guest: Option<GuestCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GiftCardBody {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AdminAdjustBody {
    pub user_id: UserId,
    pub delta: Decimal,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub remark: String,
    /// Client-chosen idempotency key
    #[validate(length(min = 1, max = 64, message = "request_id is required"))]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AdminRefundBody {
    pub amount: Decimal,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub remark: String,
    /// Client-chosen idempotency key
    #[validate(length(min = 1, max = 64, message = "request_id is required"))]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CompleteFulfillmentBody {
    #[validate(length(min = 1, message = "delivery_text is required"))]
    pub delivery_text: String,
}

/// Buyer-facing view of a payment; provider payloads stay server-side
#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    pub payment_no: String,
    pub status: PaymentStatus,
    pub settle_phase: SettlePhase,
    pub provider_type: String,
    pub interaction_mode: InteractionMode,
    pub amount: Decimal,
    pub fee: Decimal,
    pub wallet_amount: Decimal,
    pub currency: Currency,
    pub pay_url: Option<String>,
    pub qr_code: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentView {
    fn from(p: Payment) -> Self {
        Self {
            payment_no: p.payment_no,
            status: p.status,
            settle_phase: p.settle_phase,
            provider_type: p.provider_type.as_str().to_string(),
            interaction_mode: p.interaction_mode,
            amount: p.amount,
            fee: p.fee,
            wallet_amount: p.wallet_amount,
            currency: p.currency,
            pay_url: p.pay_url,
            qr_code: p.qr_code,
            expires_at: p.expires_at,
            paid_at: p.paid_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize)]
pub struct RechargeView {
    pub recharge: RechargeOrder,
    pub payment: PaymentView,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustView {
    /// False when the request replayed an earlier identical adjustment
    pub applied: bool,
    pub balance: Decimal,
    pub transaction: WalletTransaction,
}

impl From<AdjustOutcome> for AdjustView {
    fn from(o: AdjustOutcome) -> Self {
        Self {
            applied: o.applied,
            balance: o.account.balance,
            transaction: o.transaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_owner_resolution() {
        let body: CheckoutBody = serde_json::from_str(
            r#"{"items":[{"product_id":1,"quantity":1}],"guest":{"email":"a@b.co","password":"pw"}}"#,
        )
        .unwrap();

        let as_user = body.clone().into_request(Some(7)).unwrap();
        assert_eq!(as_user.owner.user_id(), Some(7));

        let as_guest = body.into_request(None).unwrap();
        assert!(matches!(as_guest.owner, OrderOwner::Guest { .. }));

        let anonymous: CheckoutBody =
            serde_json::from_str(r#"{"items":[{"product_id":1,"quantity":1}]}"#).unwrap();
        assert!(anonymous.into_request(None).is_none());
    }

    #[test]
    fn test_guest_pay_body_flattens_credentials() {
        let body: GuestPayBody =
            serde_json::from_str(r#"{"email":"a@b.co","password":"pw","channel_id":3}"#).unwrap();
        assert_eq!(body.credentials.email, "a@b.co");
        assert_eq!(body.channel_id, 3);
        assert!(body.interaction_mode.is_none());
    }

    #[test]
    fn test_body_validation() {
        let short: CheckoutBody = serde_json::from_str(
            r#"{"items":[{"product_id":1,"quantity":1}],"guest":{"email":"a@b.co","password":"pw"}}"#,
        )
        .unwrap();
        assert!(short.validate().is_err());

        let empty: CheckoutBody = serde_json::from_str(r#"{"items":[]}"#).unwrap();
        assert!(empty.validate().is_err());

        let ok: GuestPayBody = serde_json::from_str(
            r#"{"email":"buyer@example.com","password":"order-pass","channel_id":3}"#,
        )
        .unwrap();
        assert!(ok.validate().is_ok());

        let adjust: AdminAdjustBody =
            serde_json::from_str(r#"{"user_id":7,"delta":"1.00","request_id":""}"#).unwrap();
        assert!(adjust.validate().is_err());
    }
}
