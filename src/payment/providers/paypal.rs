//! PayPal Orders v2
//!
//! Intent = order with `intent: CAPTURE`; the buyer approves on PayPal and
//! capture finalizes it. Webhooks are verified by PayPal's
//! `verify-webhook-signature` API against the configured `webhook_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{missing, provider_amount};
use crate::core_types::Currency;
use crate::money::format_amount;
use crate::payment::error::PaymentError;
use crate::payment::http::ProviderHttp;
use crate::payment::provider::{PaymentProvider, check_intent, required};
use crate::payment::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    PaymentStatus, ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

const DEFAULT_BASE_URL: &str = "https://api-m.paypal.com";
const PROVIDER: &str = "paypal";

pub struct PaypalProvider {
    http: ProviderHttp,
}

impl PaypalProvider {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn base_url(channel: &PaymentChannel) -> &str {
        channel
            .config_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    async fn access_token(&self, channel: &PaymentChannel) -> Result<String, PaymentError> {
        let resp = self
            .http
            .send_json(
                PROVIDER,
                self.http
                    .client()
                    .post(format!("{}/v1/oauth2/token", Self::base_url(channel)))
                    .basic_auth(
                        required(channel, "client_id")?,
                        Some(required(channel, "client_secret")?),
                    )
                    .form(&[("grant_type", "client_credentials")]),
            )
            .await?;
        resp["access_token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| missing(PROVIDER, "access_token"))
    }

    async fn call(
        &self,
        channel: &PaymentChannel,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, PaymentError> {
        let token = self.access_token(channel).await?;
        let mut builder = self
            .http
            .client()
            .request(method, format!("{}{}", Self::base_url(channel), path))
            .bearer_auth(token);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        self.http.send_json(PROVIDER, builder).await
    }

    /// Order (GET or capture response) to a payment event
    pub(crate) fn parse_order(order: &Value) -> Result<CallbackEvent, PaymentError> {
        let unit = &order["purchase_units"][0];
        let payment_no = unit["custom_id"]
            .as_str()
            .or(unit["invoice_id"].as_str())
            .ok_or_else(|| missing(PROVIDER, "purchase_units[0].custom_id"))?;
        let capture = &unit["payments"]["captures"][0];
        let status = match (order["status"].as_str(), capture["status"].as_str()) {
            (Some("COMPLETED"), Some("COMPLETED")) => PaymentStatus::Success,
            (_, Some("DECLINED")) | (Some("VOIDED"), _) => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        };
        let amount_node = if capture.is_object() { &capture["amount"] } else { &unit["amount"] };
        let amount = provider_amount(
            PROVIDER,
            amount_node["value"].as_str().ok_or_else(|| missing(PROVIDER, "amount.value"))?,
        )?;
        Ok(CallbackEvent {
            payment_no: payment_no.to_string(),
            provider_ref: order["id"].as_str().map(String::from),
            status,
            amount,
            currency: amount_node["currency_code"].as_str().map(Currency::new),
            paid_at: capture["create_time"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            raw: order.clone(),
        })
    }

    /// Webhook event (already verified) to a payment event
    pub(crate) fn parse_event(event: &Value) -> Result<WebhookEvent, PaymentError> {
        let event_type = event["event_type"].as_str().unwrap_or_default();
        let status = match event_type {
            "PAYMENT.CAPTURE.COMPLETED" => PaymentStatus::Success,
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => PaymentStatus::Failed,
            other => return Ok(WebhookEvent::Ignored(format!("event_type {other}"))),
        };
        let resource = &event["resource"];
        let payment_no = resource["custom_id"]
            .as_str()
            .or(resource["invoice_id"].as_str())
            .ok_or_else(|| missing(PROVIDER, "resource.custom_id"))?;
        let amount = provider_amount(
            PROVIDER,
            resource["amount"]["value"]
                .as_str()
                .ok_or_else(|| missing(PROVIDER, "resource.amount.value"))?,
        )?;
        Ok(WebhookEvent::Payment(CallbackEvent {
            payment_no: payment_no.to_string(),
            provider_ref: resource["supplementary_data"]["related_ids"]["order_id"]
                .as_str()
                .map(String::from),
            status,
            amount,
            currency: resource["amount"]["currency_code"].as_str().map(Currency::new),
            paid_at: resource["create_time"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            raw: event.clone(),
        }))
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Paypal
    }

    fn supported_modes(&self) -> &'static [InteractionMode] {
        &[InteractionMode::Redirect]
    }

    fn sniff(&self, req: &WebhookRequest) -> bool {
        req.header("paypal-transmission-sig").is_some()
    }

    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError> {
        required(channel, "client_id")?;
        required(channel, "client_secret")?;
        required(channel, "webhook_id")?;
        Ok(())
    }

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        check_intent(self, channel, req.interaction_mode)?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "custom_id": req.payment_no,
                "invoice_id": req.payment_no,
                "description": req.subject,
                "amount": {
                    "currency_code": req.currency.as_str(),
                    "value": format_amount(req.amount),
                },
            }],
            "application_context": {
                "return_url": req.return_url,
                "cancel_url": req.return_url,
                "user_action": "PAY_NOW",
            },
        });
        let order = self
            .call(channel, reqwest::Method::POST, "/v2/checkout/orders", Some(body))
            .await?;
        let approve = order["links"]
            .as_array()
            .and_then(|links| {
                links.iter().find(|l| {
                    matches!(l["rel"].as_str(), Some("approve") | Some("payer-action"))
                })
            })
            .and_then(|l| l["href"].as_str())
            .ok_or_else(|| missing(PROVIDER, "links[rel=approve]"))?;
        Ok(PaymentIntent {
            pay_url: Some(approve.to_string()),
            provider_ref: order["id"].as_str().map(String::from),
            expires_at: Some(req.expires_at),
            payload: order.clone(),
            ..Default::default()
        })
    }

    async fn capture(
        &self,
        channel: &PaymentChannel,
        payment: &Payment,
    ) -> Result<CallbackEvent, PaymentError> {
        let order_id = payment
            .provider_ref
            .as_deref()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("paypal order id unknown".into()))?;
        let path = format!("/v2/checkout/orders/{order_id}");
        let order = self.call(channel, reqwest::Method::GET, &path, None).await?;

        // Approved orders are captured here; capture is idempotent on PayPal's side
        let order = if order["status"].as_str() == Some("APPROVED") {
            info!(payment_no = %payment.payment_no, order_id, "Capturing approved PayPal order");
            self.call(
                channel,
                reqwest::Method::POST,
                &format!("{path}/capture"),
                Some(json!({})),
            )
            .await?
        } else {
            order
        };
        Self::parse_order(&order)
    }

    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError> {
        let event = req
            .json()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("paypal body is not JSON".into()))?;
        let header = |name: &str| req.header(name).unwrap_or_default().to_string();
        let verification = json!({
            "auth_algo": header("paypal-auth-algo"),
            "cert_url": header("paypal-cert-url"),
            "transmission_id": header("paypal-transmission-id"),
            "transmission_sig": header("paypal-transmission-sig"),
            "transmission_time": header("paypal-transmission-time"),
            "webhook_id": required(channel, "webhook_id")?,
            "webhook_event": event,
        });
        let resp = self
            .call(
                channel,
                reqwest::Method::POST,
                "/v1/notifications/verify-webhook-signature",
                Some(verification),
            )
            .await?;
        if resp["verification_status"].as_str() != Some("SUCCESS") {
            warn!(channel_id = channel.id, "PayPal webhook verification failed");
            return Err(PaymentError::SignatureInvalid(
                "paypal verification_status not SUCCESS".into(),
            ));
        }
        Self::parse_event(&event)
    }

    fn ack(&self, success: bool) -> WebhookAck {
        if success {
            WebhookAck::text(200, "")
        } else {
            WebhookAck::text(500, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_capture_completed_event() {
        let event = json!({
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-1",
                "custom_id": "PAY200",
                "amount": { "currency_code": "USD", "value": "19.99" },
                "create_time": "2024-05-01T12:00:00Z",
                "supplementary_data": { "related_ids": { "order_id": "ORDER-9" } }
            }
        });
        match PaypalProvider::parse_event(&event).unwrap() {
            WebhookEvent::Payment(e) => {
                assert_eq!(e.payment_no, "PAY200");
                assert_eq!(e.status, PaymentStatus::Success);
                assert_eq!(e.amount, Decimal::from_str("19.99").unwrap());
                assert_eq!(e.currency, Some(Currency::new("USD")));
                assert_eq!(e.provider_ref.as_deref(), Some("ORDER-9"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_approved_event_is_ignored() {
        let event = json!({ "event_type": "CHECKOUT.ORDER.APPROVED", "resource": {} });
        assert!(matches!(
            PaypalProvider::parse_event(&event).unwrap(),
            WebhookEvent::Ignored(_)
        ));
    }

    #[test]
    fn test_parse_captured_order() {
        let order = json!({
            "id": "ORDER-9",
            "status": "COMPLETED",
            "purchase_units": [{
                "custom_id": "PAY200",
                "amount": { "currency_code": "USD", "value": "19.99" },
                "payments": { "captures": [{
                    "status": "COMPLETED",
                    "amount": { "currency_code": "USD", "value": "19.99" },
                    "create_time": "2024-05-01T12:00:00Z"
                }]}
            }]
        });
        let e = PaypalProvider::parse_order(&order).unwrap();
        assert_eq!(e.status, PaymentStatus::Success);
        assert!(e.paid_at.is_some());

        let created = json!({
            "id": "ORDER-9",
            "status": "CREATED",
            "purchase_units": [{
                "custom_id": "PAY200",
                "amount": { "currency_code": "USD", "value": "19.99" }
            }]
        });
        assert_eq!(
            PaypalProvider::parse_order(&created).unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[test]
    fn test_sniff_requires_transmission_sig() {
        let provider = PaypalProvider::new(ProviderHttp::default());
        let mut req = WebhookRequest::default();
        assert!(!provider.sniff(&req));
        req.headers
            .insert("paypal-transmission-sig".into(), "abc".into());
        assert!(provider.sniff(&req));
    }
}
