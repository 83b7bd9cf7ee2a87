//! Payment service: rows, intents, webhook verification, active query

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::channel_cache::ChannelCache;
use super::error::PaymentError;
use super::provider::{PaymentProvider, check_intent};
use super::registry::ProviderRegistry;
use super::types::{
    CallbackEvent, IntentRequest, InteractionMode, Payment, PaymentChannel, PaymentStatus,
    ProviderType, WebhookEvent, WebhookRequest,
};
use super::PaymentStore;
use crate::core_types::{ChannelId, Currency, OrderId, PaymentId, RechargeId, UserId};
use crate::money::AMOUNT_SCALE;
use crate::order::OrderNoGenerator;
use crate::settlement::state::SettlePhase;

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Absolute URL of the single webhook endpoint
    pub notify_url: String,
    pub return_url: String,
    pub payment_no_prefix: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            notify_url: "http://localhost:8080/api/v1/payments/webhook".to_string(),
            return_url: "http://localhost:8080/orders".to_string(),
            payment_no_prefix: "PY".to_string(),
        }
    }
}

/// Input for a new payment attempt
#[derive(Debug, Clone)]
pub struct OpenPayment {
    pub order_id: Option<OrderId>,
    pub recharge_id: Option<RechargeId>,
    pub user_id: Option<UserId>,
    /// `None`: wallet-only, no provider involved
    pub channel_id: Option<ChannelId>,
    pub interaction_mode: InteractionMode,
    /// Part paid through the provider, before fee
    pub online_amount: Decimal,
    pub wallet_amount: Decimal,
    pub currency: Currency,
    pub subject: String,
    pub client_ip: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of routing an inbound callback
pub enum WebhookDispatch {
    /// No adapter recognised the request
    Unclaimed,
    /// Claimed, but no channel of that provider could authenticate it
    Rejected {
        provider: Arc<dyn PaymentProvider>,
        error: PaymentError,
    },
    Verified {
        provider: Arc<dyn PaymentProvider>,
        channel: PaymentChannel,
        event: WebhookEvent,
    },
}

pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    registry: Arc<ProviderRegistry>,
    channels: Arc<ChannelCache>,
    numbers: Arc<OrderNoGenerator>,
    settings: PaymentSettings,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        registry: Arc<ProviderRegistry>,
        channels: Arc<ChannelCache>,
        numbers: Arc<OrderNoGenerator>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            store,
            registry,
            channels,
            numbers,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    pub fn channels(&self) -> &Arc<ChannelCache> {
        &self.channels
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(id.to_string()))
    }

    pub async fn get_by_no(&self, payment_no: &str) -> Result<Payment, PaymentError> {
        self.store
            .get_by_no(payment_no)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_no.to_string()))
    }

    /// Active channel usable for `mode`, with its provider. No network.
    pub async fn usable_channel(
        &self,
        channel_id: ChannelId,
        mode: InteractionMode,
    ) -> Result<(PaymentChannel, Arc<dyn PaymentProvider>), PaymentError> {
        let channel = self.channels.get(channel_id).await?;
        if !channel.active {
            return Err(PaymentError::ChannelInactive);
        }
        let provider = self.registry.get(channel.provider_type)?;
        check_intent(provider.as_ref(), &channel, mode)?;
        Ok((channel, provider))
    }

    /// Create the payment row and, for online payments, the provider intent.
    ///
    /// A failed intent call leaves the row `pending`; the sweeper expires it.
    pub async fn open(&self, req: OpenPayment) -> Result<Payment, PaymentError> {
        let valid = |a: Decimal| !a.is_sign_negative() && a.normalize().scale() <= AMOUNT_SCALE;
        if !valid(req.online_amount) || !valid(req.wallet_amount) {
            return Err(PaymentError::InvalidAmount);
        }
        let now = Utc::now();
        let mut payment = Payment {
            id: 0,
            payment_no: self.numbers.next(&self.settings.payment_no_prefix),
            order_id: req.order_id,
            recharge_id: req.recharge_id,
            user_id: req.user_id,
            channel_id: None,
            provider_type: ProviderType::Wallet,
            channel_type: ProviderType::Wallet.to_string(),
            interaction_mode: req.interaction_mode,
            amount: Decimal::ZERO,
            fee: Decimal::ZERO,
            wallet_amount: req.wallet_amount,
            currency: req.currency.clone(),
            status: PaymentStatus::Pending,
            settle_phase: SettlePhase::None,
            provider_ref: None,
            provider_payload: serde_json::Value::Null,
            pay_url: None,
            qr_code: None,
            expires_at: req.expires_at,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        // 1. Wallet-only
        let Some(channel_id) = req.channel_id else {
            if !req.online_amount.is_zero() {
                return Err(PaymentError::InvalidAmount);
            }
            let payment = self.store.insert(payment).await?;
            info!(payment_no = %payment.payment_no, wallet = %payment.wallet_amount, "Wallet payment opened");
            return Ok(payment);
        };

        // 2. Channel checks happen before any row or network call
        if req.online_amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount);
        }
        let (channel, provider) = self.usable_channel(channel_id, req.interaction_mode).await?;
        let fee = channel.fee_for(req.online_amount);
        payment.channel_id = Some(channel.id);
        payment.provider_type = channel.provider_type;
        payment.channel_type = channel.channel_type.clone();
        payment.fee = fee;
        payment.amount = req.online_amount + fee;

        // 3. Persist, then ask the provider
        let mut payment = self.store.insert(payment).await?;
        let intent = provider
            .create_intent(
                &channel,
                &IntentRequest {
                    payment_no: payment.payment_no.clone(),
                    amount: payment.amount,
                    currency: payment.currency.clone(),
                    subject: req.subject,
                    interaction_mode: req.interaction_mode,
                    client_ip: req.client_ip,
                    notify_url: self.settings.notify_url.clone(),
                    return_url: self.settings.return_url.clone(),
                    expires_at: req.expires_at,
                },
            )
            .await
            .inspect_err(|e| {
                warn!(payment_no = %payment.payment_no, provider = %channel.provider_type, error = %e, "Create intent failed");
            })?;

        // 4. Keep what the buyer needs
        self.store.set_intent(payment.id, &intent).await?;
        payment.pay_url = intent.pay_url;
        payment.qr_code = intent.qr_code;
        if intent.provider_ref.is_some() {
            payment.provider_ref = intent.provider_ref;
        }
        info!(
            payment_no = %payment.payment_no,
            provider = %payment.provider_type,
            amount = %payment.amount,
            fee = %payment.fee,
            "Payment opened"
        );
        Ok(payment)
    }

    /// Route a raw callback to its adapter and authenticate it.
    ///
    /// Every channel of the sniffed provider type is tried, inactive ones
    /// included, since payments opened before a channel was disabled still
    /// call back.
    pub async fn dispatch_webhook(&self, req: &WebhookRequest) -> WebhookDispatch {
        let Some(provider) = self.registry.sniff(req) else {
            return WebhookDispatch::Unclaimed;
        };
        let kind = provider.provider_type();
        let channels = match self.channels.all().await {
            Ok(all) => all
                .iter()
                .filter(|c| c.provider_type == kind)
                .cloned()
                .collect::<Vec<_>>(),
            Err(error) => return WebhookDispatch::Rejected { provider, error },
        };

        let mut last_error =
            PaymentError::ChannelConfigInvalid(format!("no {kind} channel configured"));
        for channel in channels {
            match provider.verify_webhook(&channel, req).await {
                Ok(event) => {
                    return WebhookDispatch::Verified {
                        provider,
                        channel,
                        event,
                    };
                }
                Err(e) => last_error = e,
            }
        }
        WebhookDispatch::Rejected {
            provider,
            error: last_error,
        }
    }

    /// Live provider status. `Ok(None)` when the provider cannot be queried;
    /// callers then report the stored status.
    pub async fn query_provider(&self, payment: &Payment) -> Result<Option<CallbackEvent>, PaymentError> {
        let Some(channel_id) = payment.channel_id else {
            return Ok(None);
        };
        let channel = self.channels.get(channel_id).await?;
        let provider = self.registry.get(channel.provider_type)?;
        match provider.capture(&channel, payment).await {
            Ok(event) if event.payment_no != payment.payment_no => {
                Err(PaymentError::GatewayResponseInvalid(format!(
                    "query for {} answered {}",
                    payment.payment_no, event.payment_no
                )))
            }
            Ok(event) => Ok(Some(event)),
            Err(PaymentError::ProviderNotSupported(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
