//! Outbound HTTP for provider adapters

use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::warn;

use super::error::PaymentError;

/// Shared reqwest client with a bounded timeout
#[derive(Clone)]
pub struct ProviderHttp {
    client: Client,
}

impl ProviderHttp {
    pub fn new(timeout: Duration) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PaymentError::GatewayRequestFailed(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send and decode a JSON body. Non-2xx is a failed request.
    pub async fn send_json(
        &self,
        provider: &str,
        request: RequestBuilder,
    ) -> Result<serde_json::Value, PaymentError> {
        let text = self.send_text(provider, request).await?;
        serde_json::from_str(&text).map_err(|e| {
            PaymentError::GatewayResponseInvalid(format!("{provider}: {e}"))
        })
    }

    pub async fn send_text(
        &self,
        provider: &str,
        request: RequestBuilder,
    ) -> Result<String, PaymentError> {
        let response = request.send().await.map_err(|e| {
            warn!(provider, error = %e, "Provider request failed");
            PaymentError::GatewayRequestFailed(format!("{provider}: {e}"))
        })?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(provider, status = status.as_u16(), body = %text, "Provider returned error status");
            return Err(PaymentError::GatewayRequestFailed(format!(
                "{provider}: HTTP {}",
                status.as_u16()
            )));
        }
        Ok(text)
    }
}

impl Default for ProviderHttp {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}
