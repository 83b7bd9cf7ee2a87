//! WeChat Pay API v3
//!
//! Requests carry `Authorization: WECHATPAY2-SHA256-RSA2048 ...` signed with
//! the merchant key over `METHOD\nPATH\nTS\nNONCE\nBODY\n`. Callbacks are
//! signed by the platform key over `TS\nNONCE\nBODY\n` and carry an
//! AES-256-GCM encrypted `resource` keyed by the API v3 key.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rsa::RsaPrivateKey;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::missing;
use crate::core_types::Currency;
use crate::money::{from_minor_units, to_minor_units};
use crate::payment::error::PaymentError;
use crate::payment::http::ProviderHttp;
use crate::payment::provider::{PaymentProvider, check_intent, required};
use crate::payment::sign::{aes_gcm_decrypt, load_private_key, load_public_key, rsa_sign, rsa_verify};
use crate::payment::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    PaymentStatus, ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";
const PROVIDER: &str = "wechat";

/// Callback timestamps outside this window are rejected as replays
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

pub struct WechatProvider {
    http: ProviderHttp,
}

impl WechatProvider {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn base_url(channel: &PaymentChannel) -> &str {
        channel
            .config_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// `Authorization` header value for one request
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn authorization(
        mchid: &str,
        serial_no: &str,
        key: &RsaPrivateKey,
        method: &str,
        path: &str,
        body: &str,
        timestamp: i64,
        nonce: &str,
    ) -> String {
        let message = format!("{method}\n{path}\n{timestamp}\n{nonce}\n{body}\n");
        let signature = rsa_sign(key, &message);
        format!(
            "WECHATPAY2-SHA256-RSA2048 mchid=\"{mchid}\",nonce_str=\"{nonce}\",signature=\"{signature}\",timestamp=\"{timestamp}\",serial_no=\"{serial_no}\""
        )
    }

    async fn request(
        &self,
        channel: &PaymentChannel,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, PaymentError> {
        let mchid = required(channel, "mchid")?;
        let serial_no = required(channel, "serial_no")?;
        let key = load_private_key(required(channel, "private_key")?)?;
        let body_text = body.map(Value::to_string).unwrap_or_default();
        let nonce = Uuid::new_v4().simple().to_string();
        let auth = Self::authorization(
            mchid,
            serial_no,
            &key,
            method.as_str(),
            path,
            &body_text,
            Utc::now().timestamp(),
            &nonce,
        );

        let mut builder = self
            .http
            .client()
            .request(method, format!("{}{}", Self::base_url(channel), path))
            .header("Authorization", auth)
            .header("Accept", "application/json");
        if body.is_some() {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body_text);
        }
        self.http.send_json(PROVIDER, builder).await
    }

    /// Decode the decrypted `resource` of a transaction callback or a query
    pub(crate) fn parse_transaction(tx: &Value) -> Result<CallbackEvent, PaymentError> {
        let payment_no = tx["out_trade_no"]
            .as_str()
            .ok_or_else(|| missing(PROVIDER, "out_trade_no"))?;
        let status = match tx["trade_state"].as_str().unwrap_or_default() {
            "SUCCESS" => PaymentStatus::Success,
            "CLOSED" | "REVOKED" | "PAYERROR" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        };
        let total = tx["amount"]["total"]
            .as_i64()
            .ok_or_else(|| missing(PROVIDER, "amount.total"))?;
        Ok(CallbackEvent {
            payment_no: payment_no.to_string(),
            provider_ref: tx["transaction_id"].as_str().map(String::from),
            status,
            amount: from_minor_units(total),
            currency: tx["amount"]["currency"].as_str().map(Currency::new),
            paid_at: tx["success_time"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
            raw: tx.clone(),
        })
    }
}

#[async_trait]
impl PaymentProvider for WechatProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Wechat
    }

    fn supported_modes(&self) -> &'static [InteractionMode] {
        &[InteractionMode::Qr, InteractionMode::Wap]
    }

    fn sniff(&self, req: &WebhookRequest) -> bool {
        req.header("wechatpay-signature").is_some() && req.header("wechatpay-timestamp").is_some()
    }

    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError> {
        required(channel, "appid")?;
        required(channel, "mchid")?;
        required(channel, "serial_no")?;
        load_private_key(required(channel, "private_key")?)?;
        load_public_key(required(channel, "platform_public_key")?)?;
        if required(channel, "api_v3_key")?.len() != 32 {
            return Err(PaymentError::ChannelConfigInvalid(
                "api_v3_key must be 32 bytes".into(),
            ));
        }
        Ok(())
    }

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        check_intent(self, channel, req.interaction_mode)?;
        let total = to_minor_units(req.amount).map_err(|_| PaymentError::InvalidAmount)?;

        let mut body = json!({
            "appid": required(channel, "appid")?,
            "mchid": required(channel, "mchid")?,
            "description": req.subject,
            "out_trade_no": req.payment_no,
            "time_expire": req.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "notify_url": req.notify_url,
            "amount": { "total": total, "currency": req.currency.as_str() },
        });

        let path = if req.interaction_mode == InteractionMode::Wap {
            let ip = req.client_ip.as_deref().ok_or_else(|| {
                PaymentError::ChannelConfigInvalid("h5 payment requires the client ip".into())
            })?;
            body["scene_info"] = json!({
                "payer_client_ip": ip,
                "h5_info": { "type": "Wap" },
            });
            "/v3/pay/transactions/h5"
        } else {
            "/v3/pay/transactions/native"
        };

        let resp = self
            .request(channel, reqwest::Method::POST, path, Some(&body))
            .await?;
        let intent = if req.interaction_mode == InteractionMode::Wap {
            PaymentIntent {
                pay_url: Some(
                    resp["h5_url"]
                        .as_str()
                        .ok_or_else(|| missing(PROVIDER, "h5_url"))?
                        .to_string(),
                ),
                ..Default::default()
            }
        } else {
            PaymentIntent {
                qr_code: Some(
                    resp["code_url"]
                        .as_str()
                        .ok_or_else(|| missing(PROVIDER, "code_url"))?
                        .to_string(),
                ),
                ..Default::default()
            }
        };
        Ok(PaymentIntent {
            expires_at: Some(req.expires_at),
            payload: resp,
            ..intent
        })
    }

    async fn capture(
        &self,
        channel: &PaymentChannel,
        payment: &Payment,
    ) -> Result<CallbackEvent, PaymentError> {
        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}?mchid={}",
            payment.payment_no,
            required(channel, "mchid")?
        );
        let resp = self
            .request(channel, reqwest::Method::GET, &path, None)
            .await?;
        Self::parse_transaction(&resp)
    }

    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError> {
        let header = |name: &str| {
            req.header(name)
                .ok_or_else(|| PaymentError::SignatureInvalid(format!("missing {name}")))
        };
        let signature = header("wechatpay-signature")?;
        let timestamp = header("wechatpay-timestamp")?;
        let nonce = header("wechatpay-nonce")?;

        if let Some(expected) = channel.config_str("platform_serial")
            && req.header("wechatpay-serial") != Some(expected)
        {
            return Err(PaymentError::SignatureInvalid("platform serial mismatch".into()));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| PaymentError::SignatureInvalid("bad timestamp".into()))?;
        if (Utc::now().timestamp() - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
            return Err(PaymentError::SignatureInvalid("timestamp outside tolerance".into()));
        }

        let platform = load_public_key(required(channel, "platform_public_key")?)?;
        let message = format!("{timestamp}\n{nonce}\n{}\n", req.body_str());
        rsa_verify(&platform, &message, signature)?;

        let envelope = req
            .json()
            .ok_or_else(|| PaymentError::GatewayResponseInvalid("wechat body is not JSON".into()))?;
        let event_type = envelope["event_type"].as_str().unwrap_or_default();
        let resource = &envelope["resource"];
        let plain = aes_gcm_decrypt(
            required(channel, "api_v3_key")?.as_bytes(),
            resource["nonce"].as_str().unwrap_or_default().as_bytes(),
            resource["associated_data"].as_str().unwrap_or_default().as_bytes(),
            resource["ciphertext"]
                .as_str()
                .ok_or_else(|| missing(PROVIDER, "resource.ciphertext"))?,
        )?;
        let tx: Value = serde_json::from_slice(&plain)
            .map_err(|e| PaymentError::GatewayResponseInvalid(format!("wechat resource: {e}")))?;

        if tx["mchid"].as_str() != channel.config_str("mchid") {
            warn!(event_type, "WeChat callback for another merchant");
            return Err(PaymentError::SignatureInvalid("mchid mismatch".into()));
        }
        if !event_type.starts_with("TRANSACTION.") {
            info!(event_type, "WeChat callback ignored");
            return Ok(WebhookEvent::Ignored(format!("event_type {event_type}")));
        }

        let event = Self::parse_transaction(&tx)?;
        if event.status == PaymentStatus::Pending {
            return Ok(WebhookEvent::Ignored("trade_state not final".into()));
        }
        Ok(WebhookEvent::Payment(event))
    }

    fn ack(&self, success: bool) -> WebhookAck {
        if success {
            WebhookAck::json(200, json!({ "code": "SUCCESS", "message": "OK" }))
        } else {
            WebhookAck::json(500, json!({ "code": "FAIL", "message": "FAIL" }))
        }
    }
}

/// Build a signed callback for tests of the webhook path
#[cfg(test)]
pub(crate) fn signed_callback(
    platform_private_pem: &str,
    api_v3_key: &[u8],
    transaction: &Value,
    at: DateTime<Utc>,
) -> WebhookRequest {
    use crate::payment::sign::test_keys::aes_gcm_encrypt;

    let nonce = "0123456789ab";
    let ciphertext = aes_gcm_encrypt(
        api_v3_key,
        nonce.as_bytes(),
        b"transaction",
        transaction.to_string().as_bytes(),
    );
    let body = json!({
        "id": "EV-1",
        "event_type": "TRANSACTION.SUCCESS",
        "resource_type": "encrypt-resource",
        "resource": {
            "algorithm": "AEAD_AES_256_GCM",
            "ciphertext": ciphertext,
            "associated_data": "transaction",
            "nonce": nonce,
        }
    })
    .to_string();

    let ts = at.timestamp();
    let header_nonce = "n0nce";
    let key = load_private_key(platform_private_pem).unwrap();
    let signature = rsa_sign(&key, &format!("{ts}\n{header_nonce}\n{body}\n"));
    let headers = [
        ("wechatpay-signature", signature),
        ("wechatpay-timestamp", ts.to_string()),
        ("wechatpay-nonce", header_nonce.to_string()),
        ("wechatpay-serial", "PLATFORM1".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    WebhookRequest {
        headers,
        query: String::new(),
        body: body.into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::providers::testing::channel;
    use crate::payment::sign::test_keys::rsa_pem_pair;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const API_V3_KEY: &str = "0123456789abcdef0123456789abcdef";

    fn setup() -> (String, PaymentChannel) {
        let (merchant_private, _) = rsa_pem_pair();
        let (platform_private, platform_public) = rsa_pem_pair();
        let channel = channel(
            ProviderType::Wechat,
            &[InteractionMode::Qr],
            json!({
                "appid": "wx123",
                "mchid": "1900000001",
                "serial_no": "MERCHANT1",
                "private_key": merchant_private,
                "platform_public_key": platform_public,
                "platform_serial": "PLATFORM1",
                "api_v3_key": API_V3_KEY,
            }),
        );
        (platform_private, channel)
    }

    fn transaction(state: &str) -> Value {
        json!({
            "mchid": "1900000001",
            "appid": "wx123",
            "out_trade_no": "PAY100",
            "transaction_id": "4200000001",
            "trade_state": state,
            "success_time": "2024-05-01T12:00:00+08:00",
            "amount": { "total": 1250, "payer_total": 1250, "currency": "CNY" }
        })
    }

    #[tokio::test]
    async fn test_verified_callback_decrypts_resource() {
        let (platform_private, channel) = setup();
        let provider = WechatProvider::new(ProviderHttp::default());
        let req = signed_callback(
            &platform_private,
            API_V3_KEY.as_bytes(),
            &transaction("SUCCESS"),
            Utc::now(),
        );
        assert!(provider.sniff(&req));

        match provider.verify_webhook(&channel, &req).await.unwrap() {
            WebhookEvent::Payment(event) => {
                assert_eq!(event.payment_no, "PAY100");
                assert_eq!(event.status, PaymentStatus::Success);
                assert_eq!(event.amount, Decimal::from_str("12.50").unwrap());
                assert_eq!(event.currency, Some(Currency::new("CNY")));
                assert_eq!(event.provider_ref.as_deref(), Some("4200000001"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_body_tamper_and_replay_rejected() {
        let (platform_private, channel) = setup();
        let provider = WechatProvider::new(ProviderHttp::default());

        let mut tampered = signed_callback(
            &platform_private,
            API_V3_KEY.as_bytes(),
            &transaction("SUCCESS"),
            Utc::now(),
        );
        tampered.body.push(b' ');
        assert!(matches!(
            provider.verify_webhook(&channel, &tampered).await,
            Err(PaymentError::SignatureInvalid(_))
        ));

        let stale = signed_callback(
            &platform_private,
            API_V3_KEY.as_bytes(),
            &transaction("SUCCESS"),
            Utc::now() - Duration::minutes(10),
        );
        assert!(matches!(
            provider.verify_webhook(&channel, &stale).await,
            Err(PaymentError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_api_key_fails_decryption() {
        let (platform_private, channel) = setup();
        let provider = WechatProvider::new(ProviderHttp::default());
        let req = signed_callback(
            &platform_private,
            b"ffffffffffffffffffffffffffffffff",
            &transaction("SUCCESS"),
            Utc::now(),
        );
        assert!(provider.verify_webhook(&channel, &req).await.is_err());
    }

    #[test]
    fn test_authorization_header_shape() {
        let (merchant_private, _) = rsa_pem_pair();
        let key = load_private_key(&merchant_private).unwrap();
        let auth = WechatProvider::authorization(
            "1900000001",
            "MERCHANT1",
            &key,
            "POST",
            "/v3/pay/transactions/native",
            "{}",
            1700000000,
            "abc",
        );
        assert!(auth.starts_with("WECHATPAY2-SHA256-RSA2048 mchid=\"1900000001\""));
        assert!(auth.contains("timestamp=\"1700000000\""));
        assert!(auth.contains("serial_no=\"MERCHANT1\""));
    }

    #[test]
    fn test_parse_transaction_states() {
        let closed = WechatProvider::parse_transaction(&transaction("CLOSED")).unwrap();
        assert_eq!(closed.status, PaymentStatus::Failed);
        let waiting = WechatProvider::parse_transaction(&transaction("NOTPAY")).unwrap();
        assert_eq!(waiting.status, PaymentStatus::Pending);
    }
}
