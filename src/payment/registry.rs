//! Provider registry keyed by provider type

use std::collections::HashMap;
use std::sync::Arc;

use super::error::PaymentError;
use super::http::ProviderHttp;
use super::provider::PaymentProvider;
use super::providers::{
    AlipayProvider, EpayProvider, EpusdtProvider, PaypalProvider, StripeProvider, WechatProvider,
};
use super::types::{ProviderType, WebhookRequest};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderType, Arc<dyn PaymentProvider>>,
    /// Registration order; header-keyed providers first so a form field
    /// collision cannot shadow them
    sniff_order: Vec<ProviderType>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All six adapters sharing one HTTP client
    pub fn with_defaults(http: ProviderHttp) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WechatProvider::new(http.clone())));
        registry.register(Arc::new(PaypalProvider::new(http.clone())));
        registry.register(Arc::new(StripeProvider::new(http.clone())));
        registry.register(Arc::new(EpusdtProvider::new(http.clone())));
        registry.register(Arc::new(AlipayProvider::new(http.clone())));
        registry.register(Arc::new(EpayProvider::new(http)));
        registry
    }

    /// Replaces an adapter of the same type
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        let kind = provider.provider_type();
        if self.providers.insert(kind, provider).is_none() {
            self.sniff_order.push(kind);
        }
    }

    pub fn get(&self, kind: ProviderType) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| PaymentError::ProviderNotSupported(kind.to_string()))
    }

    /// First adapter whose structural markers are present
    pub fn sniff(&self, req: &WebhookRequest) -> Option<Arc<dyn PaymentProvider>> {
        self.sniff_order
            .iter()
            .filter_map(|kind| self.providers.get(kind))
            .find(|p| p.sniff(req))
            .cloned()
    }

    pub fn provider_types(&self) -> &[ProviderType] {
        &self.sniff_order
    }
}
