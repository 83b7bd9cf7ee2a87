//! Notification / alert collaborator
//!
//! The core never delivers notifications itself. It enqueues events through
//! [`Notifier`]; delivery (mail, IM, affiliate commission jobs) lives outside.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Operational alert categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Webhook signature failed verification
    SignatureInvalid,
    /// Webhook body matched no registered provider
    WebhookUnclaimed,
    /// Callback amount differs from the payment row
    AmountMismatch,
    /// Callback currency differs from the payment row
    CurrencyMismatch,
    /// Payment succeeded against an order that is no longer payable
    ManualRefundRequired,
    /// Coupon/promotion limit reached between checkout and settlement
    UsageLimitExceeded,
    /// Settlement stuck in a non-terminal phase
    SettlementStuck,
    /// Callback reports a terminal status contradicting the stored one
    StatusConflict,
}

/// Events emitted by the core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    OrderPaid {
        order_no: String,
        payment_no: String,
        user_id: Option<i64>,
        guest_email: Option<String>,
    },
    OrderCompleted {
        order_no: String,
    },
    RechargeSucceeded {
        recharge_no: String,
        user_id: i64,
        amount: String,
    },
    Alert {
        kind: AlertKind,
        reference: String,
        message: String,
    },
}

impl Notification {
    pub fn alert(kind: AlertKind, reference: impl Into<String>, message: impl Into<String>) -> Self {
        Notification::Alert {
            kind,
            reference: reference.into(),
            message: message.into(),
        }
    }
}

/// Notification enqueue contract
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: Notification);
}

/// Writes every event to the tracing pipeline
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: Notification) {
        match &event {
            Notification::Alert {
                kind,
                reference,
                message,
            } => {
                warn!(kind = ?kind, reference = %reference, "ALERT: {}", message);
            }
            other => {
                let payload = serde_json::to_string(other).unwrap_or_default();
                info!(event = %payload, "Notification enqueued");
            }
        }
    }
}

/// Forwards events into a bounded channel consumed by a delivery task
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, event: Notification) {
        if let Err(e) = self.tx.send(event).await {
            error!(error = %e, "Notification channel closed, event dropped");
        }
    }
}

/// Keeps every event in memory; used by the in-memory wiring and tests
#[derive(Default)]
pub struct RecordingNotifier {
    events: std::sync::Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn alerts(&self, kind: AlertKind) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Notification::Alert { kind: k, .. } if *k == kind))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: Notification) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}
