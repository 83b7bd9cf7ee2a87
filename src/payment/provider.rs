//! Provider adapter contract.
//!
//! One implementation per [`ProviderType`]; signature and endpoint details
//! stay inside the adapter.

use async_trait::async_trait;

use super::error::PaymentError;
use super::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentIntent,
    ProviderType, WebhookAck, WebhookEvent, WebhookRequest,
};

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Modes the adapter can produce at all
    fn supported_modes(&self) -> &'static [InteractionMode];

    /// Structural match of an inbound callback (headers / fields present)
    fn sniff(&self, req: &WebhookRequest) -> bool;

    /// Credential presence/shape check, no network
    fn validate_config(&self, channel: &PaymentChannel) -> Result<(), PaymentError>;

    async fn create_intent(
        &self,
        channel: &PaymentChannel,
        req: &IntentRequest,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Active status query
    async fn capture(
        &self,
        _channel: &PaymentChannel,
        _payment: &Payment,
    ) -> Result<CallbackEvent, PaymentError> {
        Err(PaymentError::ProviderNotSupported(format!(
            "{} active capture",
            self.provider_type()
        )))
    }

    /// Authenticate and decode a callback. Nothing may act on an event that
    /// did not come out of this call.
    async fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        req: &WebhookRequest,
    ) -> Result<WebhookEvent, PaymentError>;

    /// Literal reply the provider expects
    fn ack(&self, success: bool) -> WebhookAck;
}

/// Channel/mode preflight shared by every `create_intent` path
pub fn check_intent(
    provider: &dyn PaymentProvider,
    channel: &PaymentChannel,
    mode: InteractionMode,
) -> Result<(), PaymentError> {
    if !channel.active {
        return Err(PaymentError::ChannelInactive);
    }
    if channel.provider_type != provider.provider_type() {
        return Err(PaymentError::ChannelConfigInvalid(format!(
            "channel {} is {}, not {}",
            channel.id,
            channel.provider_type,
            provider.provider_type()
        )));
    }
    if !provider.supported_modes().contains(&mode) || !channel.supports(mode) {
        return Err(PaymentError::ChannelConfigInvalid(format!(
            "{} channel {} does not support mode {}",
            provider.provider_type(),
            channel.id,
            mode.as_str()
        )));
    }
    provider.validate_config(channel)
}

/// Required string credential
pub fn required<'a>(channel: &'a PaymentChannel, key: &str) -> Result<&'a str, PaymentError> {
    channel
        .config_str(key)
        .ok_or_else(|| PaymentError::ChannelConfigInvalid(format!("missing `{key}`")))
}
