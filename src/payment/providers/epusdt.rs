//! Epusdt (USDT-TRC20 aggregator)
//!
//! JSON API and JSON callbacks, both signed with
//! `md5(sorted k=v&... + api_token)`. Numbers are rendered in their shortest
//! decimal form (`10`, `10.5`) inside the signed string.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use super::missing;
use crate::payment::error::PaymentError;
use crate::payment::http::ProviderHttp;
use crate::payment::provider::{PaymentProvider, check_intent, required};
use crate::payment::sign::{constant_time_eq, md5_hex};
use crate::payment::types::{
    CallbackEvent, IntentRequest, InteractionMode, PaymentChannel, PaymentIntent, PaymentStatus,
    ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

const PROVIDER: &str = "epusdt";

/// Callback `status`
const STATUS_PAID: i64 = 2;
const STATUS_EXPIRED: i64 = 3;

pub struct EpusdtProvider {
    http: ProviderHttp,
}

impl EpusdtProvider {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn render(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(
                Decimal::from_str(&n.to_string())
                    .map(|d| d.normalize().to_string())
                    .unwrap_or_else(|_| n.to_string()),
            ),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Signature over a JSON object's scalar fields
    pub fn sign(fields: &Map<String, Value>, token: &str) -> String {
        let sorted: BTreeMap<&str, String> = fields
            .iter()
            .filter(|(k, _)| k.as_str() != "signature")
            .filter_map(|(k, v)| Self::render(v).map(|s| (k.as_str(), s)))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        md5_hex(&format!("{joined}{token}"))
    }

    fn number(amount: Decimal) -> Result<Value, PaymentError> {
        amount
            .to_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or(PaymentError::InvalidAmount)
    }

    fn amount_of(value: &Value) -> Result<Decimal, PaymentError> {
        let raw = Self::render(value).ok_or_else(|| missing(PROVIDER, "amount"))?;
        Decimal::from_str(&raw)
            .map(|d| d.normalize())
            .map_err(|e| PaymentError::GatewayResponseInvalid(format!("epusdt amount `{raw}`: {e}")))
    }
}

#[async_trait]
impl PaymentProvider for EpusdtProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Epusdt
    }

    fn supported_modes(&self) -> &'static [InteractionMode] {
        &[InteractionMode::Redirect, InteractionMode::Qr]
    }

    fn sniff(&self, req: &WebhookRequest) -> bool {
        req.json().is_some_and(|body| {
            body.get("trade_id").is_some() && body.get("signature").is_some()
        })
    }

    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError> {
        required(channel, "gateway_url")?;
        required(channel, "api_token")?;
        Ok(())
    }

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        check_intent(self, channel, req.interaction_mode)?;
        let token = required(channel, "api_token")?;

        let mut body = Map::new();
        body.insert("order_id".into(), json!(req.payment_no));
        body.insert("amount".into(), Self::number(req.amount)?);
        body.insert("notify_url".into(), json!(req.notify_url));
        body.insert("redirect_url".into(), json!(req.return_url));
        let signature = Self::sign(&body, token);
        body.insert("signature".into(), json!(signature));

        let url = format!(
            "{}/api/v1/order/create-transaction",
            required(channel, "gateway_url")?.trim_end_matches('/')
        );
        let resp = self
            .http
            .send_json(PROVIDER, self.http.client().post(url).json(&body))
            .await?;
        if resp["status_code"].as_i64() != Some(200) {
            return Err(PaymentError::GatewayRequestFailed(format!(
                "epusdt: {}",
                resp["message"].as_str().unwrap_or("unknown")
            )));
        }
        let data = &resp["data"];
        let payment_url = data["payment_url"]
            .as_str()
            .ok_or_else(|| missing(PROVIDER, "data.payment_url"))?;
        debug!(payment_no = %req.payment_no, trade_id = ?data["trade_id"], "Epusdt transaction created");

        let (pay_url, qr_code) = if req.interaction_mode == InteractionMode::Qr {
            (None, data["token"].as_str().map(String::from))
        } else {
            (Some(payment_url.to_string()), None)
        };
        Ok(PaymentIntent {
            pay_url,
            qr_code,
            provider_ref: data["trade_id"].as_str().map(String::from),
            expires_at: Some(req.expires_at),
            payload: data.clone(),
        })
    }

    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError> {
        let body = req
            .json()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("epusdt body is not JSON".into()))?;
        let fields = body
            .as_object()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("epusdt body is not an object".into()))?;
        let signature = fields
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::SignatureInvalid("epusdt callback without signature".into()))?;
        let expected = Self::sign(fields, required(channel, "api_token")?);
        if !constant_time_eq(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes()) {
            return Err(PaymentError::SignatureInvalid("epusdt md5 mismatch".into()));
        }

        let status = match body["status"].as_i64() {
            Some(STATUS_PAID) => PaymentStatus::Success,
            Some(STATUS_EXPIRED) => PaymentStatus::Expired,
            other => return Ok(WebhookEvent::Ignored(format!("status {other:?}"))),
        };
        let payment_no = body["order_id"]
            .as_str()
            .ok_or_else(|| missing(PROVIDER, "order_id"))?;
        Ok(WebhookEvent::Payment(CallbackEvent {
            payment_no: payment_no.to_string(),
            provider_ref: body["trade_id"].as_str().map(String::from),
            status,
            amount: Self::amount_of(&body["amount"])?,
            currency: None,
            paid_at: None,
            raw: body.clone(),
        }))
    }

    fn ack(&self, success: bool) -> WebhookAck {
        WebhookAck::text(200, if success { "ok" } else { "fail" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::providers::testing::channel;

    fn epusdt_channel() -> PaymentChannel {
        channel(
            ProviderType::Epusdt,
            &[InteractionMode::Redirect],
            json!({ "gateway_url": "https://usdt.example.com", "api_token": "t0ken" }),
        )
    }

    fn callback(status: i64, token: &str) -> WebhookRequest {
        let mut body = json!({
            "trade_id": "T-1",
            "order_id": "PAY500",
            "amount": 10.5,
            "actual_amount": 1.45,
            "token": "TXYZ",
            "block_transaction_id": "0xabc",
            "status": status,
        });
        let signature = EpusdtProvider::sign(body.as_object().unwrap(), token);
        body["signature"] = json!(signature);
        WebhookRequest {
            body: body.to_string().into_bytes(),
            ..Default::default()
        }
    }

    #[test]
    fn test_number_rendering_in_signature() {
        let a = json!({ "amount": 10.0, "order_id": "X" });
        let b = json!({ "amount": "10", "order_id": "X" });
        assert_eq!(
            EpusdtProvider::sign(a.as_object().unwrap(), "t"),
            EpusdtProvider::sign(b.as_object().unwrap(), "t")
        );
        assert_eq!(
            EpusdtProvider::sign(b.as_object().unwrap(), "t"),
            md5_hex("amount=10&order_id=Xt")
        );
    }

    #[tokio::test]
    async fn test_paid_callback() {
        let provider = EpusdtProvider::new(ProviderHttp::default());
        let req = callback(STATUS_PAID, "t0ken");
        assert!(provider.sniff(&req));
        match provider.verify_webhook(&epusdt_channel(), &req).await.unwrap() {
            WebhookEvent::Payment(e) => {
                assert_eq!(e.payment_no, "PAY500");
                assert_eq!(e.status, PaymentStatus::Success);
                assert_eq!(e.amount, Decimal::from_str("10.5").unwrap());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_waiting_and_forged() {
        let provider = EpusdtProvider::new(ProviderHttp::default());
        let channel = epusdt_channel();
        match provider
            .verify_webhook(&channel, &callback(STATUS_EXPIRED, "t0ken"))
            .await
            .unwrap()
        {
            WebhookEvent::Payment(e) => assert_eq!(e.status, PaymentStatus::Expired),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            provider.verify_webhook(&channel, &callback(1, "t0ken")).await.unwrap(),
            WebhookEvent::Ignored(_)
        ));
        assert!(matches!(
            provider.verify_webhook(&channel, &callback(STATUS_PAID, "forged")).await,
            Err(PaymentError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_not_supported() {
        let provider = EpusdtProvider::new(ProviderHttp::default());
        let payment = crate::payment::testing::payment("PAY501", ProviderType::Epusdt);
        assert!(matches!(
            provider.capture(&epusdt_channel(), &payment).await,
            Err(PaymentError::ProviderNotSupported(_))
        ));
    }
}
