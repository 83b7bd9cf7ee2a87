//! Provider adapters

pub mod alipay;
pub mod epay;
pub mod epusdt;
pub mod paypal;
pub mod stripe;
pub mod wechat;

pub use alipay::AlipayProvider;
pub use epay::EpayProvider;
pub use epusdt::EpusdtProvider;
pub use paypal::PaypalProvider;
pub use stripe::StripeProvider;
pub use wechat::WechatProvider;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use super::error::PaymentError;
use crate::money::parse_amount;

/// `yyyy-MM-dd HH:mm:ss` in UTC+8, the wall clock Alipay and the aggregators use
pub(crate) fn cst_format(at: DateTime<Utc>) -> String {
    (at + Duration::hours(8)).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn cst_parse(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc() - Duration::hours(8))
}

/// Provider-reported major-unit amount
pub(crate) fn provider_amount(provider: &str, raw: &str) -> Result<Decimal, PaymentError> {
    parse_amount(raw)
        .map_err(|e| PaymentError::GatewayResponseInvalid(format!("{provider} amount `{raw}`: {e}")))
}

pub(crate) fn missing(provider: &str, field: &str) -> PaymentError {
    PaymentError::GatewayResponseInvalid(format!("{provider}: missing `{field}`"))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::payment::types::{InteractionMode, PaymentChannel, ProviderType};

    pub fn channel(
        provider_type: ProviderType,
        modes: &[InteractionMode],
        config: serde_json::Value,
    ) -> PaymentChannel {
        PaymentChannel {
            id: 1,
            name: provider_type.to_string(),
            provider_type,
            channel_type: provider_type.to_string(),
            interaction_modes: modes.to_vec(),
            fee_rate: Default::default(),
            active: true,
            config,
            sort_order: 0,
        }
    }
}
