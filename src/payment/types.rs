use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core_types::{ChannelId, Currency, OrderId, PaymentId, RechargeId, UserId};
use crate::money::percent_of;
use crate::settlement::state::SettlePhase;

/// Payment provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Alipay,
    Wechat,
    Paypal,
    Stripe,
    /// Aggregator gateway with MD5-signed form callbacks
    Epay,
    /// USDT aggregator gateway
    Epusdt,
    /// Balance-only payment, settled without a provider
    Wallet,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Alipay => "alipay",
            ProviderType::Wechat => "wechat",
            ProviderType::Paypal => "paypal",
            ProviderType::Stripe => "stripe",
            ProviderType::Epay => "epay",
            ProviderType::Epusdt => "epusdt",
            ProviderType::Wallet => "wallet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alipay" => Some(ProviderType::Alipay),
            "wechat" => Some(ProviderType::Wechat),
            "paypal" => Some(ProviderType::Paypal),
            "stripe" => Some(ProviderType::Stripe),
            "epay" => Some(ProviderType::Epay),
            "epusdt" => Some(ProviderType::Epusdt),
            "wallet" => Some(ProviderType::Wallet),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UX shape of a payment intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Desktop redirect page
    Redirect,
    /// QR code to scan
    Qr,
    /// In-page form / hosted checkout
    Page,
    /// Mobile web
    Wap,
}

impl InteractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMode::Redirect => "redirect",
            InteractionMode::Qr => "qr",
            InteractionMode::Page => "page",
            InteractionMode::Wap => "wap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "redirect" => Some(InteractionMode::Redirect),
            "qr" => Some(InteractionMode::Qr),
            "page" => Some(InteractionMode::Page),
            "wap" => Some(InteractionMode::Wap),
            _ => None,
        }
    }
}

/// Payment lifecycle. Only `pending` moves, and only to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PaymentStatus {
    Pending = 0,
    Success = 10,
    Failed = -10,
    Expired = -20,
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        *self == PaymentStatus::Pending && next.is_terminal()
    }

    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentStatus::Pending),
            10 => Some(PaymentStatus::Success),
            -10 => Some(PaymentStatus::Failed),
            -20 => Some(PaymentStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin-configured provider credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub id: ChannelId,
    pub name: String,
    pub provider_type: ProviderType,
    /// Provider sub-type, e.g. `alipay` / `wxpay` behind an aggregator
    pub channel_type: String,
    pub interaction_modes: Vec<InteractionMode>,
    /// Percent of the online amount added as fee
    pub fee_rate: Decimal,
    pub active: bool,
    /// Provider credentials; never serialized to clients
    #[serde(skip_serializing)]
    pub config: serde_json::Value,
    pub sort_order: i32,
}

impl PaymentChannel {
    pub fn supports(&self, mode: InteractionMode) -> bool {
        self.interaction_modes.contains(&mode)
    }

    pub fn fee_for(&self, amount: Decimal) -> Decimal {
        if self.fee_rate <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            percent_of(amount, self.fee_rate)
        }
    }

    /// String credential from `config`
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// One payment attempt; the unit of settlement idempotency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub payment_no: String,
    /// Root order paid by this payment; `None` for a wallet recharge
    pub order_id: Option<OrderId>,
    pub recharge_id: Option<RechargeId>,
    pub user_id: Option<UserId>,
    /// `None` for wallet-only payments
    pub channel_id: Option<ChannelId>,
    pub provider_type: ProviderType,
    pub channel_type: String,
    pub interaction_mode: InteractionMode,
    /// Charged by the provider: online part plus fee
    pub amount: Decimal,
    pub fee: Decimal,
    /// Wallet part, debited at settlement
    pub wallet_amount: Decimal,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub settle_phase: SettlePhase,
    pub provider_ref: Option<String>,
    pub provider_payload: serde_json::Value,
    pub pay_url: Option<String>,
    pub qr_code: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Amount applied to the order, excluding the fee
    pub fn online_amount(&self) -> Decimal {
        self.amount - self.fee
    }

    pub fn is_recharge(&self) -> bool {
        self.recharge_id.is_some()
    }
}

/// Input of [`super::PaymentProvider::create_intent`]
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub payment_no: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub subject: String,
    pub interaction_mode: InteractionMode,
    pub client_ip: Option<String>,
    pub notify_url: String,
    pub return_url: String,
    pub expires_at: DateTime<Utc>,
}

/// What the buyer needs to pay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub pay_url: Option<String>,
    pub qr_code: Option<String>,
    pub provider_ref: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub payload: serde_json::Value,
}

/// Provider-reported state of one payment (webhook or active query)
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    pub payment_no: String,
    pub provider_ref: Option<String>,
    pub status: PaymentStatus,
    pub amount: Decimal,
    /// `None` when the provider does not report one
    pub currency: Option<Currency>,
    pub paid_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

/// Verified webhook content
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Payment(CallbackEvent),
    /// Authentic but carries no payment state change
    Ignored(String),
}

/// Raw inbound callback
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub query: String,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }

    /// Form fields from the body, falling back to the query string
    pub fn form(&self) -> HashMap<String, String> {
        let from_body: HashMap<String, String> =
            serde_urlencoded::from_bytes(&self.body).unwrap_or_default();
        if !from_body.is_empty() {
            return from_body;
        }
        serde_urlencoded::from_str(&self.query).unwrap_or_default()
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Literal reply a provider expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl WebhookAck {
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.to_string(),
        }
    }

    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Success));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Expired));
        assert!(!PaymentStatus::Success.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Success));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn test_channel_fee_and_config() {
        let channel = PaymentChannel {
            id: 1,
            name: "Alipay".into(),
            provider_type: ProviderType::Alipay,
            channel_type: "alipay".into(),
            interaction_modes: vec![InteractionMode::Redirect],
            fee_rate: Decimal::from_str("0.6").unwrap(),
            active: true,
            config: serde_json::json!({"app_id": " 2021 ", "empty": ""}),
            sort_order: 0,
        };
        assert_eq!(
            channel.fee_for(Decimal::from_str("100.00").unwrap()),
            Decimal::from_str("0.60").unwrap()
        );
        assert_eq!(channel.config_str("app_id"), Some("2021"));
        assert_eq!(channel.config_str("empty"), None);
        assert!(!channel.supports(InteractionMode::Qr));
    }

    #[test]
    fn test_webhook_form_fallback_to_query() {
        let req = WebhookRequest {
            query: "pid=1&trade_status=TRADE_SUCCESS".into(),
            ..Default::default()
        };
        assert_eq!(req.form().get("pid").map(String::as_str), Some("1"));
    }
}
