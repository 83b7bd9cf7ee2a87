//! Epay-compatible aggregator (`submit.php` / `mapi.php` / `api.php`)
//!
//! Signature: `md5(sorted k=v&... + key)`, lower-case hex, skipping empty
//! values, `sign` and `sign_type`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::{cst_parse, missing, provider_amount};
use crate::money::format_amount;
use crate::payment::error::PaymentError;
use crate::payment::http::ProviderHttp;
use crate::payment::provider::{PaymentProvider, check_intent, required};
use crate::payment::sign::{canonical_query, constant_time_eq, md5_hex};
use crate::payment::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    PaymentStatus, ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

const PROVIDER: &str = "epay";

pub struct EpayProvider {
    http: ProviderHttp,
}

impl EpayProvider {
    pub fn new(http: ProviderHttp) -> Self {
        Self { http }
    }

    fn gateway(channel: &PaymentChannel) -> Result<&str, PaymentError> {
        Ok(required(channel, "gateway_url")?.trim_end_matches('/'))
    }

    /// Signature over a parameter set
    pub fn sign<'a, I>(params: I, key: &str) -> String
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        md5_hex(&format!("{}{}", canonical_query(params, &["sign", "sign_type"]), key))
    }

    fn signed(channel: &PaymentChannel, mut params: BTreeMap<String, String>) -> Result<BTreeMap<String, String>, PaymentError> {
        let sign = Self::sign(&params, required(channel, "key")?);
        params.insert("sign".into(), sign);
        params.insert("sign_type".into(), "MD5".into());
        Ok(params)
    }

    fn parse_notify(form: &HashMap<String, String>) -> Result<WebhookEvent, PaymentError> {
        if form.get("trade_status").map(String::as_str) != Some("TRADE_SUCCESS") {
            return Ok(WebhookEvent::Ignored(format!(
                "trade_status {}",
                form.get("trade_status").map(String::as_str).unwrap_or_default()
            )));
        }
        let payment_no = form
            .get("out_trade_no")
            .ok_or_else(|| missing(PROVIDER, "out_trade_no"))?;
        let amount = provider_amount(
            PROVIDER,
            form.get("money").ok_or_else(|| missing(PROVIDER, "money"))?,
        )?;
        Ok(WebhookEvent::Payment(CallbackEvent {
            payment_no: payment_no.clone(),
            provider_ref: form.get("trade_no").cloned(),
            status: PaymentStatus::Success,
            amount,
            currency: None,
            paid_at: None,
            raw: serde_json::to_value(form).unwrap_or(Value::Null),
        }))
    }
}

#[async_trait]
impl PaymentProvider for EpayProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Epay
    }

    fn supported_modes(&self) -> &'static [InteractionMode] {
        &[InteractionMode::Redirect, InteractionMode::Qr]
    }

    fn sniff(&self, req: &WebhookRequest) -> bool {
        let form = req.form();
        form.contains_key("pid") && form.contains_key("trade_status") && form.contains_key("sign")
    }

    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError> {
        required(channel, "pid")?;
        required(channel, "key")?;
        let gateway = Self::gateway(channel)?;
        if !gateway.starts_with("http://") && !gateway.starts_with("https://") {
            return Err(PaymentError::ChannelConfigInvalid(format!(
                "gateway_url `{gateway}` is not http(s)"
            )));
        }
        Ok(())
    }

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        check_intent(self, channel, req.interaction_mode)?;
        let mut params = BTreeMap::new();
        params.insert("pid".to_string(), required(channel, "pid")?.to_string());
        params.insert("type".to_string(), channel.channel_type.clone());
        params.insert("out_trade_no".to_string(), req.payment_no.clone());
        params.insert("notify_url".to_string(), req.notify_url.clone());
        params.insert("return_url".to_string(), req.return_url.clone());
        params.insert("name".to_string(), req.subject.clone());
        params.insert("money".to_string(), format_amount(req.amount));

        if req.interaction_mode == InteractionMode::Qr {
            params.insert(
                "clientip".to_string(),
                req.client_ip.clone().unwrap_or_else(|| "127.0.0.1".into()),
            );
            params.insert("device".to_string(), "pc".to_string());
            let params = Self::signed(channel, params)?;
            let resp = self
                .http
                .send_json(
                    PROVIDER,
                    self.http
                        .client()
                        .post(format!("{}/mapi.php", Self::gateway(channel)?))
                        .form(&params),
                )
                .await?;
            if resp["code"].as_i64() != Some(1) {
                return Err(PaymentError::GatewayRequestFailed(format!(
                    "epay mapi: {}",
                    resp["msg"].as_str().unwrap_or("unknown")
                )));
            }
            return Ok(PaymentIntent {
                qr_code: resp["qrcode"].as_str().map(String::from),
                pay_url: resp["payurl"].as_str().map(String::from),
                provider_ref: resp["trade_no"].as_str().map(String::from),
                expires_at: Some(req.expires_at),
                payload: resp,
            });
        }

        let params = Self::signed(channel, params)?;
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| PaymentError::ChannelConfigInvalid(e.to_string()))?;
        Ok(PaymentIntent {
            pay_url: Some(format!("{}/submit.php?{}", Self::gateway(channel)?, query)),
            expires_at: Some(req.expires_at),
            ..Default::default()
        })
    }

    async fn capture(
        &self,
        channel: &PaymentChannel,
        payment: &Payment,
    ) -> Result<CallbackEvent, PaymentError> {
        let query = [
            ("act", "order"),
            ("pid", required(channel, "pid")?),
            ("key", required(channel, "key")?),
            ("out_trade_no", payment.payment_no.as_str()),
        ];
        let resp = self
            .http
            .send_json(
                PROVIDER,
                self.http
                    .client()
                    .get(format!("{}/api.php", Self::gateway(channel)?))
                    .query(&query),
            )
            .await?;
        if resp["code"].as_i64() != Some(1) {
            return Err(PaymentError::GatewayResponseInvalid(format!(
                "epay query: {}",
                resp["msg"].as_str().unwrap_or("unknown")
            )));
        }
        let paid = resp["status"].as_i64() == Some(1)
            || resp["status"].as_str() == Some("1");
        let amount = match &resp["money"] {
            Value::String(s) => provider_amount(PROVIDER, s)?,
            Value::Number(n) => provider_amount(PROVIDER, &n.to_string())?,
            _ => payment.amount,
        };
        Ok(CallbackEvent {
            payment_no: payment.payment_no.clone(),
            provider_ref: resp["trade_no"].as_str().map(String::from),
            status: if paid { PaymentStatus::Success } else { PaymentStatus::Pending },
            amount,
            currency: None,
            paid_at: resp["endtime"].as_str().and_then(cst_parse),
            raw: resp,
        })
    }

    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError> {
        let form = req.form();
        if form.get("pid").map(String::as_str) != Some(required(channel, "pid")?) {
            return Err(PaymentError::SignatureInvalid("epay pid mismatch".into()));
        }
        let sign = form
            .get("sign")
            .ok_or_else(|| PaymentError::SignatureInvalid("epay notify without sign".into()))?;
        let expected = Self::sign(&form, required(channel, "key")?);
        if !constant_time_eq(expected.as_bytes(), sign.to_ascii_lowercase().as_bytes()) {
            return Err(PaymentError::SignatureInvalid("epay md5 mismatch".into()));
        }
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
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn epay_channel() -> PaymentChannel {
        channel(
            ProviderType::Epay,
            &[InteractionMode::Redirect],
            json!({ "pid": "1001", "key": "k3y", "gateway_url": "https://pay.example.com/" }),
        )
    }

    fn notify(fields: &[(&str, &str)], key: &str) -> WebhookRequest {
        let mut form: HashMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let sign = EpayProvider::sign(&form, key);
        form.insert("sign".into(), sign);
        form.insert("sign_type".into(), "MD5".into());
        WebhookRequest {
            query: serde_urlencoded::to_string(&form).unwrap(),
            ..Default::default()
        }
    }

    const PAID: &[(&str, &str)] = &[
        ("pid", "1001"),
        ("trade_no", "2024050100001"),
        ("out_trade_no", "PAY400"),
        ("type", "alipay"),
        ("name", "Game key"),
        ("money", "5.00"),
        ("trade_status", "TRADE_SUCCESS"),
    ];

    #[tokio::test]
    async fn test_signed_get_notify() {
        let provider = EpayProvider::new(ProviderHttp::default());
        let req = notify(PAID, "k3y");
        assert!(provider.sniff(&req));
        match provider.verify_webhook(&epay_channel(), &req).await.unwrap() {
            WebhookEvent::Payment(e) => {
                assert_eq!(e.payment_no, "PAY400");
                assert_eq!(e.amount, Decimal::from_str("5.00").unwrap());
                assert_eq!(e.provider_ref.as_deref(), Some("2024050100001"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_key_and_wrong_pid_rejected() {
        let provider = EpayProvider::new(ProviderHttp::default());
        assert!(matches!(
            provider.verify_webhook(&epay_channel(), &notify(PAID, "other")).await,
            Err(PaymentError::SignatureInvalid(_))
        ));

        let mut fields = PAID.to_vec();
        fields[0] = ("pid", "2002");
        assert!(matches!(
            provider.verify_webhook(&epay_channel(), &notify(&fields, "k3y")).await,
            Err(PaymentError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_url_signed() {
        let provider = EpayProvider::new(ProviderHttp::default());
        let channel = epay_channel();
        let intent = provider
            .create_intent(
                &channel,
                &IntentRequest {
                    payment_no: "PAY401".into(),
                    amount: Decimal::from_str("12.3").unwrap(),
                    currency: "CNY".into(),
                    subject: "Key".into(),
                    interaction_mode: InteractionMode::Redirect,
                    client_ip: None,
                    notify_url: "https://shop.test/notify".into(),
                    return_url: "https://shop.test/return".into(),
                    expires_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let url = intent.pay_url.unwrap();
        assert!(url.starts_with("https://pay.example.com/submit.php?"));
        let (_, query) = url.split_once('?').unwrap();
        let params: HashMap<String, String> = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(params["money"], "12.30");
        assert_eq!(params["sign"], EpayProvider::sign(&params, "k3y"));
    }

    #[test]
    fn test_validate_config() {
        let provider = EpayProvider::new(ProviderHttp::default());
        let mut channel = epay_channel();
        assert!(provider.validate_config(&channel).is_ok());
        channel.config = json!({ "pid": "1001", "key": "k3y", "gateway_url": "ftp://x" });
        assert!(provider.validate_config(&channel).is_err());
    }
}
