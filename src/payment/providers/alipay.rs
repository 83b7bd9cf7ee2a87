//! Alipay open platform (RSA2)
//!
//! - page / wap: signed redirect URL to the gateway
//! - qr: `alipay.trade.precreate`, buyer scans `qr_code`
//! - capture: `alipay.trade.query`
//! - notify: form POST, RSA2 over sorted params without `sign` / `sign_type`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::{cst_format, cst_parse, missing, provider_amount};
use crate::money::format_amount;
use crate::payment::error::PaymentError;
use crate::payment::http::ProviderHttp;
use crate::payment::provider::{PaymentProvider, check_intent, required};
use crate::payment::sign::{canonical_query, load_private_key, load_public_key, rsa_sign, rsa_verify};
use crate::payment::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    PaymentStatus, ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

const DEFAULT_GATEWAY: &str = "https://openapi.alipay.com/gateway.do";
const PROVIDER: &str = "alipay";

pub struct AlipayProvider {
    http: ProviderHttp,
}

impl AlipayProvider {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn gateway(channel: &PaymentChannel) -> String {
        channel
            .config_str("gateway_url")
            .unwrap_or(DEFAULT_GATEWAY)
            .to_string()
    }

    /// Common request params plus `sign`
    fn signed_params(
        channel: &PaymentChannel,
        method: &str,
        biz_content: &Value,
        notify_url: Option<&str>,
        return_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, String>, PaymentError> {
        let key = load_private_key(required(channel, "private_key")?)?;
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), required(channel, "app_id")?.to_string());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "JSON".to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), "RSA2".to_string());
        params.insert("timestamp".to_string(), cst_format(now));
        params.insert("version".to_string(), "1.0".to_string());
        params.insert("biz_content".to_string(), biz_content.to_string());
        if let Some(url) = notify_url.filter(|u| !u.is_empty()) {
            params.insert("notify_url".to_string(), url.to_string());
        }
        if let Some(url) = return_url.filter(|u| !u.is_empty()) {
            params.insert("return_url".to_string(), url.to_string());
        }

        let content = canonical_query(&params, &["sign"]);
        params.insert("sign".to_string(), rsa_sign(&key, &content));
        Ok(params)
    }

    /// Call an API method and unwrap `{method}_response`
    async fn call(
        &self,
        channel: &PaymentChannel,
        method: &str,
        biz_content: &Value,
        notify_url: Option<&str>,
    ) -> Result<Value, PaymentError> {
        let params = Self::signed_params(channel, method, biz_content, notify_url, None, Utc::now())?;
        let body = self
            .http
            .send_json(PROVIDER, self.http.client().post(Self::gateway(channel)).form(&params))
            .await?;
        let key = format!("{}_response", method.replace('.', "_"));
        body.get(&key)
            .cloned()
            .ok_or_else(|| missing(PROVIDER, &key))
    }

    /// Decode a verified notify form
    pub(crate) fn parse_notify(form: &HashMap<String, String>) -> Result<WebhookEvent, PaymentError> {
        let payment_no = form
            .get("out_trade_no")
            .ok_or_else(|| missing(PROVIDER, "out_trade_no"))?;
        let trade_status = form.get("trade_status").map(String::as_str).unwrap_or_default();
        let status = match trade_status {
            "TRADE_SUCCESS" | "TRADE_FINISHED" => PaymentStatus::Success,
            "TRADE_CLOSED" => PaymentStatus::Failed,
            other => return Ok(WebhookEvent::Ignored(format!("trade_status {other}"))),
        };
        let amount = provider_amount(
            PROVIDER,
            form.get("total_amount").ok_or_else(|| missing(PROVIDER, "total_amount"))?,
        )?;
        Ok(WebhookEvent::Payment(CallbackEvent {
            payment_no: payment_no.clone(),
            provider_ref: form.get("trade_no").cloned(),
            status,
            amount,
            currency: None,
            paid_at: form.get("gmt_payment").and_then(|s| cst_parse(s)),
            raw: serde_json::to_value(form).unwrap_or(Value::Null),
        }))
    }
}

#[async_trait]
impl PaymentProvider for AlipayProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Alipay
    }

    fn supported_modes(&self) -> &'static [InteractionMode] {
        &[InteractionMode::Redirect, InteractionMode::Wap, InteractionMode::Qr]
    }

    fn sniff(&self, req: &WebhookRequest) -> bool {
        let form = req.form();
        form.contains_key("notify_id") && form.contains_key("app_id") && form.contains_key("sign")
    }

    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError> {
        required(channel, "app_id")?;
        load_private_key(required(channel, "private_key")?)?;
        load_public_key(required(channel, "alipay_public_key")?)?;
        Ok(())
    }

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        check_intent(self, channel, req.interaction_mode)?;
        if !req.currency.matches("CNY") {
            return Err(PaymentError::ProviderNotSupported(format!(
                "alipay currency {}",
                req.currency
            )));
        }

        let mut biz = json!({
            "out_trade_no": req.payment_no,
            "total_amount": format_amount(req.amount),
            "subject": req.subject,
            "time_expire": cst_format(req.expires_at),
        });

        match req.interaction_mode {
            InteractionMode::Qr => {
                let resp = self
                    .call(channel, "alipay.trade.precreate", &biz, Some(&req.notify_url))
                    .await?;
                if resp["code"].as_str() != Some("10000") {
                    warn!(payment_no = %req.payment_no, response = %resp, "Alipay precreate rejected");
                    return Err(PaymentError::GatewayRequestFailed(format!(
                        "alipay precreate: {}",
                        resp["sub_msg"].as_str().or(resp["msg"].as_str()).unwrap_or("unknown")
                    )));
                }
                let qr = resp["qr_code"]
                    .as_str()
                    .ok_or_else(|| missing(PROVIDER, "qr_code"))?;
                Ok(PaymentIntent {
                    qr_code: Some(qr.to_string()),
                    expires_at: Some(req.expires_at),
                    payload: resp,
                    ..Default::default()
                })
            }
            mode => {
                let (method, product_code) = if mode == InteractionMode::Wap {
                    ("alipay.trade.wap.pay", "QUICK_WAP_WAY")
                } else {
                    ("alipay.trade.page.pay", "FAST_INSTANT_TRADE_PAY")
                };
                biz["product_code"] = json!(product_code);
                let params = Self::signed_params(
                    channel,
                    method,
                    &biz,
                    Some(&req.notify_url),
                    Some(&req.return_url),
                    Utc::now(),
                )?;
                let query = serde_urlencoded::to_string(&params)
                    .map_err(|e| PaymentError::ChannelConfigInvalid(e.to_string()))?;
                debug!(payment_no = %req.payment_no, method, "Alipay redirect built");
                Ok(PaymentIntent {
                    pay_url: Some(format!("{}?{}", Self::gateway(channel), query)),
                    expires_at: Some(req.expires_at),
                    ..Default::default()
                })
            }
        }
    }

    async fn capture(
        &self,
        channel: &PaymentChannel,
        payment: &Payment,
    ) -> Result<CallbackEvent, PaymentError> {
        let resp = self
            .call(
                channel,
                "alipay.trade.query",
                &json!({ "out_trade_no": payment.payment_no }),
                None,
            )
            .await?;

        let pending = CallbackEvent {
            payment_no: payment.payment_no.clone(),
            provider_ref: None,
            status: PaymentStatus::Pending,
            amount: payment.amount,
            currency: None,
            paid_at: None,
            raw: resp.clone(),
        };
        match resp["code"].as_str() {
            Some("10000") => {}
            // ACQ.TRADE_NOT_EXIST: buyer has not opened the cashier yet
            Some("40004") => return Ok(pending),
            _ => {
                return Err(PaymentError::GatewayResponseInvalid(format!(
                    "alipay query: {}",
                    resp["sub_msg"].as_str().unwrap_or("unknown")
                )));
            }
        }

        let status = match resp["trade_status"].as_str() {
            Some("TRADE_SUCCESS") | Some("TRADE_FINISHED") => PaymentStatus::Success,
            Some("TRADE_CLOSED") => PaymentStatus::Failed,
            _ => return Ok(pending),
        };
        let amount = provider_amount(
            PROVIDER,
            resp["total_amount"].as_str().ok_or_else(|| missing(PROVIDER, "total_amount"))?,
        )?;
        Ok(CallbackEvent {
            provider_ref: resp["trade_no"].as_str().map(String::from),
            status,
            amount,
            paid_at: resp["send_pay_date"].as_str().and_then(cst_parse),
            ..pending
        })
    }

    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError> {
        let form = req.form();
        if form.get("app_id").map(String::as_str) != Some(required(channel, "app_id")?) {
            return Err(PaymentError::SignatureInvalid("alipay app_id mismatch".into()));
        }
        let sign = form
            .get("sign")
            .ok_or_else(|| PaymentError::SignatureInvalid("alipay notify without sign".into()))?;
        let public = load_public_key(required(channel, "alipay_public_key")?)?;
        let content = canonical_query(&form, &["sign", "sign_type"]);
        rsa_verify(&public, &content, sign)?;
        Self::parse_notify(&form)
    }

    fn ack(&self, success: bool) -> WebhookAck {
        WebhookAck::text(200, if success { "success" } else { "fail" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::providers::testing::channel;
    use crate::payment::sign::test_keys::rsa_pem_pair;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    struct Keys {
        merchant_public: String,
        alipay_private: String,
        channel: PaymentChannel,
    }

    fn setup() -> Keys {
        let (merchant_private, merchant_public) = rsa_pem_pair();
        let (alipay_private, alipay_public) = rsa_pem_pair();
        let channel = channel(
            ProviderType::Alipay,
            &[InteractionMode::Redirect, InteractionMode::Wap],
            json!({
                "app_id": "2021000000000001",
                "private_key": merchant_private,
                "alipay_public_key": alipay_public,
            }),
        );
        Keys {
            merchant_public,
            alipay_private,
            channel,
        }
    }

    fn notify(keys: &Keys, fields: &[(&str, &str)]) -> WebhookRequest {
        let mut form: HashMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let key = load_private_key(&keys.alipay_private).unwrap();
        let sign = rsa_sign(&key, &canonical_query(&form, &["sign", "sign_type"]));
        form.insert("sign".into(), sign);
        form.insert("sign_type".into(), "RSA2".into());
        WebhookRequest {
            body: serde_urlencoded::to_string(&form).unwrap().into_bytes(),
            ..Default::default()
        }
    }

    fn success_fields() -> Vec<(&'static str, &'static str)> {
        vec![
            ("notify_id", "n-1"),
            ("notify_type", "trade_status_sync"),
            ("app_id", "2021000000000001"),
            ("out_trade_no", "PAY001"),
            ("trade_no", "2024050122001"),
            ("total_amount", "12.50"),
            ("trade_status", "TRADE_SUCCESS"),
            ("gmt_payment", "2024-05-01 12:00:00"),
        ]
    }

    #[tokio::test]
    async fn test_verified_notify_decodes_success() {
        let keys = setup();
        let provider = AlipayProvider::new(ProviderHttp::default());
        let req = notify(&keys, &success_fields());
        assert!(provider.sniff(&req));

        match provider.verify_webhook(&keys.channel, &req).await.unwrap() {
            WebhookEvent::Payment(event) => {
                assert_eq!(event.payment_no, "PAY001");
                assert_eq!(event.status, PaymentStatus::Success);
                assert_eq!(event.amount, Decimal::from_str("12.50").unwrap());
                assert_eq!(event.provider_ref.as_deref(), Some("2024050122001"));
                assert!(event.paid_at.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tampered_notify_rejected() {
        let keys = setup();
        let provider = AlipayProvider::new(ProviderHttp::default());
        let mut req = notify(&keys, &success_fields());
        let body = String::from_utf8(req.body.clone()).unwrap();
        req.body = body.replace("12.50", "1250.00").into_bytes();

        assert!(matches!(
            provider.verify_webhook(&keys.channel, &req).await,
            Err(PaymentError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_buyer_pay_is_ignored() {
        let keys = setup();
        let provider = AlipayProvider::new(ProviderHttp::default());
        let mut fields = success_fields();
        fields.retain(|(k, _)| *k != "trade_status");
        fields.push(("trade_status", "WAIT_BUYER_PAY"));
        let event = provider
            .verify_webhook(&keys.channel, &notify(&keys, &fields))
            .await
            .unwrap();
        assert!(matches!(event, WebhookEvent::Ignored(_)));
    }

    #[tokio::test]
    async fn test_page_pay_url_is_signed_by_merchant_key() {
        let keys = setup();
        let provider = AlipayProvider::new(ProviderHttp::default());
        let intent = provider
            .create_intent(
                &keys.channel,
                &IntentRequest {
                    payment_no: "PAY002".into(),
                    amount: Decimal::from_str("9.9").unwrap(),
                    currency: "CNY".into(),
                    subject: "Game key".into(),
                    interaction_mode: InteractionMode::Redirect,
                    client_ip: None,
                    notify_url: "https://shop.test/api/v1/payments/webhook".into(),
                    return_url: "https://shop.test/orders".into(),
                    expires_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let url = intent.pay_url.unwrap();
        let (_, query) = url.split_once('?').unwrap();
        let params: HashMap<String, String> = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(params["method"], "alipay.trade.page.pay");
        assert!(params["biz_content"].contains("\"total_amount\":\"9.90\""));

        let public = load_public_key(&keys.merchant_public).unwrap();
        rsa_verify(&public, &canonical_query(&params, &["sign"]), &params["sign"]).unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_mode_fails_before_network() {
        let keys = setup();
        let provider = AlipayProvider::new(ProviderHttp::default());
        let err = provider
            .create_intent(
                &keys.channel,
                &IntentRequest {
                    payment_no: "PAY003".into(),
                    amount: Decimal::ONE,
                    currency: "CNY".into(),
                    subject: "x".into(),
                    interaction_mode: InteractionMode::Qr,
                    client_ip: None,
                    notify_url: String::new(),
                    return_url: String::new(),
                    expires_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ChannelConfigInvalid(_)));
    }
}
