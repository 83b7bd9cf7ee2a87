//! Inbound webhook handling
//!
//! Verification happens before any business lock is taken; a slow provider
//! API (PayPal's verify call) never holds a settlement guard.

use tracing::{debug, warn};

use super::coordinator::SettlementCoordinator;
use super::error::SettlementError;
use crate::notify::AlertKind;
use crate::payment::{
    CallbackEvent, Payment, PaymentChannel, PaymentError, WebhookAck, WebhookDispatch,
    WebhookEvent, WebhookRequest,
};

impl SettlementCoordinator {
    /// Verify, settle and build the provider-specific acknowledgement.
    ///
    /// Mismatches are acknowledged as received: a redelivery cannot fix them.
    pub async fn handle_webhook(&self, req: &WebhookRequest) -> WebhookAck {
        match self.payments.dispatch_webhook(req).await {
            WebhookDispatch::Unclaimed => {
                warn!(bytes = req.body.len(), "Webhook matched no provider");
                self.alert(
                    AlertKind::WebhookUnclaimed,
                    "webhook",
                    format!("unrecognised callback of {} bytes", req.body.len()),
                )
                .await;
                WebhookAck::text(400, "unrecognized callback")
            }
            WebhookDispatch::Rejected { provider, error } => {
                let kind = provider.provider_type();
                warn!(provider = %kind, error = %error, "Webhook rejected");
                self.alert(AlertKind::SignatureInvalid, kind.as_str(), error.to_string())
                    .await;
                provider.ack(false)
            }
            WebhookDispatch::Verified {
                provider,
                event: WebhookEvent::Ignored(reason),
                ..
            } => {
                debug!(provider = %provider.provider_type(), reason = %reason, "Webhook ignored");
                provider.ack(true)
            }
            WebhookDispatch::Verified {
                provider,
                channel,
                event: WebhookEvent::Payment(event),
            } => {
                let ok = match self.settle_verified(&channel, &event).await {
                    Ok(_) => true,
                    Err(e) if e.is_consistency() => {
                        warn!(payment_no = %event.payment_no, error = %e, "Webhook acknowledged without settling");
                        true
                    }
                    Err(e) => {
                        warn!(payment_no = %event.payment_no, code = e.code(), error = %e, "Webhook settlement failed");
                        false
                    }
                };
                provider.ack(ok)
            }
        }
    }

    /// A payment only accepts callbacks authenticated by its own channel
    async fn settle_verified(
        &self,
        channel: &PaymentChannel,
        event: &CallbackEvent,
    ) -> Result<Payment, SettlementError> {
        let payment = self.payments.get_by_no(&event.payment_no).await?;
        if payment.channel_id != Some(channel.id) {
            let e = PaymentError::SignatureInvalid(format!(
                "payment {} belongs to channel {:?}, callback verified by {}",
                payment.payment_no, payment.channel_id, channel.id
            ));
            self.alert(AlertKind::SignatureInvalid, &payment.payment_no, e.to_string())
                .await;
            return Err(e.into());
        }
        self.apply_to(payment, event).await
    }
}
