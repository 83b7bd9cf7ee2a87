//! Stripe Checkout Sessions
//!
//! Webhooks carry `Stripe-Signature: t=...,v1=...`, an HMAC-SHA256 of
//! `{t}.{payload}` with the endpoint secret.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::warn;

use super::missing;
use crate::core_types::Currency;
use crate::money::{from_minor_units, to_minor_units};
use crate::payment::error::PaymentError;
use crate::payment::http::ProviderHttp;
use crate::payment::provider::{PaymentProvider, check_intent, required};
use crate::payment::sign::hmac_sha256_verify_hex;
use crate::payment::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    PaymentStatus, ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
const PROVIDER: &str = "stripe";
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Stripe rejects sessions expiring sooner than this
const MIN_SESSION_MINUTES: i64 = 30;

pub struct StripeProvider {
    http: ProviderHttp,
}

impl StripeProvider {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn base_url(channel: &PaymentChannel) -> &str {
        channel
            .config_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// Verify a `Stripe-Signature` header against the raw payload
    pub fn verify_signature(
        payload: &[u8],
        sig_header: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        let mut timestamp = "";
        let mut signatures = Vec::new();
        for part in sig_header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = t;
            } else if let Some(v) = part.strip_prefix("v1=") {
                signatures.push(v);
            }
        }
        if timestamp.is_empty() || signatures.is_empty() {
            return Err(PaymentError::SignatureInvalid("invalid Stripe-Signature header".into()));
        }

        let mut signed_payload = format!("{timestamp}.").into_bytes();
        signed_payload.extend_from_slice(payload);
        // Several v1 entries appear while a secret is being rolled
        if !signatures
            .iter()
            .any(|sig| hmac_sha256_verify_hex(secret.as_bytes(), &signed_payload, sig).is_ok())
        {
            return Err(PaymentError::SignatureInvalid("stripe signature mismatch".into()));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| PaymentError::SignatureInvalid("invalid timestamp".into()))?;
        if (now.timestamp() - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
            return Err(PaymentError::SignatureInvalid("webhook timestamp too old".into()));
        }
        Ok(())
    }

    /// Checkout session object to a payment event
    pub(crate) fn parse_session(session: &Value, status: PaymentStatus) -> Result<CallbackEvent, PaymentError> {
        let payment_no = session["client_reference_id"]
            .as_str()
            .or(session["metadata"]["payment_no"].as_str())
            .ok_or_else(|| missing(PROVIDER, "client_reference_id"))?;
        let minor = session["amount_total"]
            .as_i64()
            .ok_or_else(|| missing(PROVIDER, "amount_total"))?;
        Ok(CallbackEvent {
            payment_no: payment_no.to_string(),
            provider_ref: session["id"].as_str().map(String::from),
            status,
            amount: from_minor_units(minor),
            currency: session["currency"].as_str().map(Currency::new),
            paid_at: (status == PaymentStatus::Success).then(Utc::now),
            raw: session.clone(),
        })
    }

    pub(crate) fn parse_event(event: &Value) -> Result<WebhookEvent, PaymentError> {
        let event_type = event["type"].as_str().unwrap_or_default();
        let session = &event["data"]["object"];
        let status = match event_type {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                if session["payment_status"].as_str() != Some("paid") {
                    return Ok(WebhookEvent::Ignored("session completed but unpaid".into()));
                }
                PaymentStatus::Success
            }
            "checkout.session.async_payment_failed" => PaymentStatus::Failed,
            "checkout.session.expired" => PaymentStatus::Expired,
            other => return Ok(WebhookEvent::Ignored(format!("event type {other}"))),
        };
        Ok(WebhookEvent::Payment(Self::parse_session(session, status)?))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Stripe
    }

    fn supported_modes(&self) -> &'static [InteractionMode] {
        &[InteractionMode::Redirect, InteractionMode::Page]
    }

    fn sniff(&self, req: &WebhookRequest) -> bool {
        req.header("stripe-signature").is_some()
    }

    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError> {
        required(channel, "secret_key")?;
        required(channel, "webhook_secret")?;
        Ok(())
    }

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        check_intent(self, channel, req.interaction_mode)?;
        let minor = to_minor_units(req.amount).map_err(|_| PaymentError::InvalidAmount)?;
        let expires_at = req
            .expires_at
            .max(Utc::now() + Duration::minutes(MIN_SESSION_MINUTES));

        let form = [
            ("mode", "payment".to_string()),
            ("success_url", req.return_url.clone()),
            ("cancel_url", req.return_url.clone()),
            ("client_reference_id", req.payment_no.clone()),
            ("metadata[payment_no]", req.payment_no.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                req.currency.as_str().to_ascii_lowercase(),
            ),
            ("line_items[0][price_data][unit_amount]", minor.to_string()),
            ("line_items[0][price_data][product_data][name]", req.subject.clone()),
            ("expires_at", expires_at.timestamp().to_string()),
        ];
        let session = self
            .http
            .send_json(
                PROVIDER,
                self.http
                    .client()
                    .post(format!("{}/v1/checkout/sessions", Self::base_url(channel)))
                    .basic_auth(required(channel, "secret_key")?, None::<&str>)
                    .form(&form),
            )
            .await?;

        Ok(PaymentIntent {
            pay_url: Some(
                session["url"]
                    .as_str()
                    .ok_or_else(|| missing(PROVIDER, "url"))?
                    .to_string(),
            ),
            provider_ref: session["id"].as_str().map(String::from),
            expires_at: Some(expires_at),
            payload: session,
            ..Default::default()
        })
    }

    async fn capture(
        &self,
        channel: &PaymentChannel,
        payment: &Payment,
    ) -> Result<CallbackEvent, PaymentError> {
        let session_id = payment
            .provider_ref
            .as_deref()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("stripe session id unknown".into()))?;
        let session = self
            .http
            .send_json(
                PROVIDER,
                self.http
                    .client()
                    .get(format!("{}/v1/checkout/sessions/{session_id}", Self::base_url(channel)))
                    .basic_auth(required(channel, "secret_key")?, None::<&str>),
            )
            .await?;
        let status = match (session["status"].as_str(), session["payment_status"].as_str()) {
            (Some("complete"), Some("paid")) => PaymentStatus::Success,
            (Some("expired"), _) => PaymentStatus::Expired,
            _ => PaymentStatus::Pending,
        };
        Self::parse_session(&session, status)
    }

    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError> {
        let header = req
            .header("stripe-signature")
            .ok_or_else(|| PaymentError::SignatureInvalid("missing Stripe-Signature".into()))?;
        if let Err(e) = Self::verify_signature(
            &req.body,
            header,
            required(channel, "webhook_secret")?,
            Utc::now(),
        ) {
            warn!(channel_id = channel.id, error = %e, "Stripe webhook rejected");
            return Err(e);
        }
        let event = req
            .json()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("stripe body is not JSON".into()))?;
        Self::parse_event(&event)
    }

    fn ack(&self, success: bool) -> WebhookAck {
        if success {
            WebhookAck::json(200, serde_json::json!({ "received": true }))
        } else {
            WebhookAck::json(400, serde_json::json!({ "received": false }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::providers::testing::channel;
    use crate::payment::sign::hmac_sha256;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    const SECRET: &str = "whsec_test";

    fn signed(payload: &str, at: DateTime<Utc>) -> WebhookRequest {
        let t = at.timestamp();
        let sig = hex::encode(hmac_sha256(SECRET.as_bytes(), format!("{t}.{payload}").as_bytes()).unwrap());
        WebhookRequest {
            headers: [("stripe-signature".to_string(), format!("t={t},v1={sig}"))]
                .into_iter()
                .collect(),
            query: String::new(),
            body: payload.as_bytes().to_vec(),
        }
    }

    fn completed() -> String {
        json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "client_reference_id": "PAY300",
                "amount_total": 1999,
                "currency": "usd",
                "payment_status": "paid",
                "status": "complete"
            }}
        })
        .to_string()
    }

    fn stripe_channel() -> PaymentChannel {
        channel(
            ProviderType::Stripe,
            &[InteractionMode::Redirect],
            json!({ "secret_key": "sk_test", "webhook_secret": SECRET }),
        )
    }

    #[tokio::test]
    async fn test_signed_completed_session() {
        let provider = StripeProvider::new(ProviderHttp::default());
        let req = signed(&completed(), Utc::now());
        assert!(provider.sniff(&req));
        match provider.verify_webhook(&stripe_channel(), &req).await.unwrap() {
            WebhookEvent::Payment(e) => {
                assert_eq!(e.payment_no, "PAY300");
                assert_eq!(e.amount, Decimal::from_str("19.99").unwrap());
                assert_eq!(e.currency, Some(Currency::new("USD")));
                assert_eq!(e.status, PaymentStatus::Success);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_signature_mismatch_and_stale() {
        let payload = completed();
        let now = Utc::now();
        let req = signed(&payload, now);
        let header = req.header("stripe-signature").unwrap();

        assert!(StripeProvider::verify_signature(payload.as_bytes(), header, SECRET, now).is_ok());
        assert!(StripeProvider::verify_signature(b"{}", header, SECRET, now).is_err());
        assert!(StripeProvider::verify_signature(payload.as_bytes(), header, "whsec_other", now).is_err());
        assert!(
            StripeProvider::verify_signature(
                payload.as_bytes(),
                header,
                SECRET,
                now + Duration::minutes(6)
            )
            .is_err()
        );
        assert!(StripeProvider::verify_signature(payload.as_bytes(), "garbage", SECRET, now).is_err());
    }

    #[test]
    fn test_expired_and_unrelated_events() {
        let expired = json!({
            "type": "checkout.session.expired",
            "data": { "object": {
                "id": "cs_test_2", "client_reference_id": "PAY301",
                "amount_total": 500, "currency": "usd", "status": "expired"
            }}
        });
        match StripeProvider::parse_event(&expired).unwrap() {
            WebhookEvent::Payment(e) => assert_eq!(e.status, PaymentStatus::Expired),
            other => panic!("unexpected: {:?}", other),
        }
        let other = json!({ "type": "customer.created", "data": { "object": {} } });
        assert!(matches!(
            StripeProvider::parse_event(&other).unwrap(),
            WebhookEvent::Ignored(_)
        ));
    }
}
