//! Payment Gateway Abstraction
//!
//! - [`PaymentProvider`]: one adapter per provider type, each owning its
//!   signature scheme (RSA2, WeChat v3 envelope, PayPal verify API, Stripe
//!   HMAC, aggregator MD5)
//! - [`ProviderRegistry`]: lookup by type and webhook sniffing
//! - [`ChannelCache`]: TTL read-through cache over admin-configured channels
//! - [`PaymentService`]: payment rows, intents, webhook verification, capture
//!
//! Nothing here settles anything. A verified [`CallbackEvent`] is handed to
//! the settlement orchestrator.

pub mod channel_cache;
pub mod db;
pub mod error;
pub mod http;
pub mod memory;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod service;
pub mod sign;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core_types::{ChannelId, OrderId, PaymentId};
use crate::settlement::state::SettlePhase;

pub use channel_cache::ChannelCache;
pub use db::PgPaymentStore;
pub use error::PaymentError;
pub use http::ProviderHttp;
pub use memory::MemoryPaymentStore;
pub use provider::PaymentProvider;
pub use registry::ProviderRegistry;
pub use service::{OpenPayment, PaymentService, PaymentSettings, WebhookDispatch};
pub use types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    PaymentStatus, ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

/// Persistence contract for payments and channels
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new row; `id` is assigned here
    async fn insert(&self, payment: Payment) -> Result<Payment, PaymentError>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError>;

    async fn get_by_no(&self, payment_no: &str) -> Result<Option<Payment>, PaymentError>;

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, PaymentError>;

    /// Store what `create_intent` returned
    async fn set_intent(&self, id: PaymentId, intent: &PaymentIntent) -> Result<(), PaymentError>;

    /// CAS on status; also writes the settlement phase and provider facts
    async fn transition(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        phase: SettlePhase,
        provider_ref: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PaymentError>;

    /// CAS on settlement phase
    async fn advance_phase(
        &self,
        id: PaymentId,
        from: SettlePhase,
        to: SettlePhase,
    ) -> Result<bool, PaymentError>;

    /// Terminal payments whose settlement phase has not reached a terminal
    /// phase, untouched since `older_than`
    async fn find_unsettled(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError>;

    /// Pending payments past `expires_at`
    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentError>;

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, PaymentError>;

    /// Insert when `id == 0`, else update
    async fn upsert_channel(&self, channel: PaymentChannel) -> Result<PaymentChannel, PaymentError>;

    async fn get_channel(&self, id: ChannelId) -> Result<Option<PaymentChannel>, PaymentError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stand-in provider and row builders for tests

    use super::*;
    use crate::core_types::Currency;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    pub fn payment(payment_no: &str, provider_type: ProviderType) -> Payment {
        let now = Utc::now();
        Payment {
            id: 1,
            payment_no: payment_no.to_string(),
            order_id: Some(1),
            recharge_id: None,
            user_id: Some(1),
            channel_id: Some(1),
            provider_type,
            channel_type: provider_type.to_string(),
            interaction_mode: InteractionMode::Redirect,
            amount: Decimal::TEN,
            fee: Decimal::ZERO,
            wallet_amount: Decimal::ZERO,
            currency: Currency::default(),
            status: PaymentStatus::Pending,
            settle_phase: SettlePhase::None,
            provider_ref: None,
            provider_payload: serde_json::Value::Null,
            pay_url: None,
            qr_code: None,
            expires_at: now,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Accepts webhooks carrying `x-mock-signature: ok` with a JSON
    /// [`CallbackEvent`]-shaped body; capture answers from a scripted queue.
    #[derive(Default)]
    pub struct MockProvider {
        pub captures: Mutex<Vec<Result<CallbackEvent, PaymentError>>>,
        pub intents: Mutex<Vec<IntentRequest>>,
        pub fail_intent: Mutex<Option<PaymentError>>,
    }

    impl MockProvider {
        pub fn event(payment_no: &str, status: PaymentStatus, amount: Decimal) -> CallbackEvent {
            CallbackEvent {
                payment_no: payment_no.to_string(),
                provider_ref: Some(format!("MOCK-{payment_no}")),
                status,
                amount,
                currency: None,
                paid_at: Some(Utc::now()),
                raw: serde_json::Value::Null,
            }
        }

        pub fn webhook(payment_no: &str, status: PaymentStatus, amount: Decimal, signed: bool) -> WebhookRequest {
            let body = serde_json::json!({
                "payment_no": payment_no,
                "status": status.as_str(),
                "amount": amount.to_string(),
            });
            WebhookRequest {
                headers: [(
                    "x-mock-signature".to_string(),
                    if signed { "ok" } else { "bad" }.to_string(),
                )]
                .into_iter()
                .collect(),
                query: String::new(),
                body: body.to_string().into_bytes(),
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Epay
        }

        fn supported_modes(&self) -> &'static [InteractionMode] {
            &[InteractionMode::Redirect, InteractionMode::Qr]
        }

        fn sniff(&self, req: &WebhookRequest) -> bool {
            req.header("x-mock-signature").is_some()
        }

        fn validate_config(&self, _channel: &PaymentChannel) -> Result<(), PaymentError> {
            Ok(())
        }

        async fn create_intent(
            &self,
            channel: &PaymentChannel,
            req: &IntentRequest,
        ) -> Result<PaymentIntent, PaymentError> {
            provider::check_intent(self, channel, req.interaction_mode)?;
            if let Some(e) = self.fail_intent.lock().unwrap().take() {
                return Err(e);
            }
            self.intents.lock().unwrap().push(req.clone());
            Ok(PaymentIntent {
                pay_url: Some(format!("https://mock.pay/{}", req.payment_no)),
                provider_ref: Some(format!("MOCK-{}", req.payment_no)),
                expires_at: Some(req.expires_at),
                ..Default::default()
            })
        }

        async fn capture(
            &self,
            _channel: &PaymentChannel,
            payment: &Payment,
        ) -> Result<CallbackEvent, PaymentError> {
            let mut queue = self.captures.lock().unwrap();
            if queue.is_empty() {
                return Ok(Self::event(&payment.payment_no, payment.status, payment.amount));
            }
            queue.remove(0)
        }

        async fn verify_webhook(
            &self,
            _channel: &PaymentChannel,
            req: &WebhookRequest,
        ) -> Result<WebhookEvent, PaymentError> {
            if req.header("x-mock-signature") != Some("ok") {
                return Err(PaymentError::SignatureInvalid("mock".into()));
            }
            let body = req.json().unwrap_or_default();
            let status = match body["status"].as_str() {
                Some("success") => PaymentStatus::Success,
                Some("failed") => PaymentStatus::Failed,
                Some("expired") => PaymentStatus::Expired,
                _ => return Ok(WebhookEvent::Ignored("mock pending".into())),
            };
            let amount = body["amount"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            Ok(WebhookEvent::Payment(Self::event(
                body["payment_no"].as_str().unwrap_or_default(),
                status,
                amount,
            )))
        }

        fn ack(&self, success: bool) -> WebhookAck {
            WebhookAck::text(200, if success { "success" } else { "fail" })
        }
    }
}
