use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{config::PaymentConfig, errors::ServiceError, models::PaymentStatus};

/// Payment providers the orchestrator can route to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderType {
    Stripe,
    MobilePay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub customer_email: Option<String>,
    pub return_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Provider that handled the call; stamped by the orchestrator.
    pub provider: Option<ProviderType>,
    /// Provider-side payment reference.
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    pub currency: String,
    /// Where to send the customer for provider-hosted flows.
    pub redirect_url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub provider: ProviderType,
    pub url: String,
    pub webhook_id: String,
}

/// Adapter over one external payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    async fn process_payment(&self, request: &PaymentRequest) -> Result<PaymentResult, ServiceError>;
    async fn verify_payment(&self, payment_id: &str) -> Result<PaymentResult, ServiceError>;
    async fn capture_payment(&self, payment_id: &str, amount: i64) -> Result<PaymentResult, ServiceError>;
    async fn refund_payment(&self, payment_id: &str, amount: i64) -> Result<PaymentResult, ServiceError>;
    async fn cancel_payment(&self, payment_id: &str) -> Result<PaymentResult, ServiceError>;
    async fn force_approve_payment(&self, payment_id: &str) -> Result<PaymentResult, ServiceError>;

    /// Returns the provider's id for the new webhook.
    async fn register_webhook(&self, url: &str, events: &[String]) -> Result<String, ServiceError>;
    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), ServiceError>;
}

/// Routes payment operations to registered providers. Built once at
/// startup; holds no state beyond the registry.
#[derive(Clone, Default)]
pub struct PaymentOrchestrator {
    providers: BTreeMap<ProviderType, Arc<dyn PaymentProvider>>,
}

impl PaymentOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.provider_type(), provider);
        self
    }

    /// Registers the candidates named in `config.enabled_providers`. Unknown
    /// names and enabled providers without an adapter are logged and skipped.
    pub fn from_config(config: &PaymentConfig, candidates: Vec<Arc<dyn PaymentProvider>>) -> Self {
        let mut available: HashMap<ProviderType, Arc<dyn PaymentProvider>> = candidates
            .into_iter()
            .map(|provider| (provider.provider_type(), provider))
            .collect();

        let mut orchestrator = Self::new();
        for name in &config.enabled_providers {
            let Ok(provider_type) = name.parse::<ProviderType>() else {
                warn!(provider = %name, "Unknown payment provider in configuration, skipping");
                continue;
            };
            match available.remove(&provider_type) {
                Some(provider) => {
                    info!(provider = %provider_type, "Payment provider registered");
                    orchestrator.providers.insert(provider_type, provider);
                }
                None if orchestrator.providers.contains_key(&provider_type) => {}
                None => warn!(provider = %provider_type, "Payment provider enabled but no adapter supplied"),
            }
        }
        orchestrator
    }

    pub fn available_providers(&self) -> Vec<ProviderType> {
        self.providers.keys().copied().collect()
    }

    pub fn is_available(&self, provider: ProviderType) -> bool {
        self.providers.contains_key(&provider)
    }

    fn provider(&self, provider: ProviderType) -> Result<&Arc<dyn PaymentProvider>, ServiceError> {
        self.providers
            .get(&provider)
            .ok_or_else(|| ServiceError::ProviderUnavailable(provider.to_string()))
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    pub async fn process_payment(
        &self,
        provider: ProviderType,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, ServiceError> {
        let result = self.provider(provider)?.process_payment(request).await;
        stamp(provider, "process_payment", result)
    }

    #[instrument(skip(self))]
    pub async fn verify_payment(&self, provider: ProviderType, payment_id: &str) -> Result<PaymentResult, ServiceError> {
        let result = self.provider(provider)?.verify_payment(payment_id).await;
        stamp(provider, "verify_payment", result)
    }

    #[instrument(skip(self))]
    pub async fn capture_payment(
        &self,
        provider: ProviderType,
        payment_id: &str,
        amount: i64,
    ) -> Result<PaymentResult, ServiceError> {
        let result = self.provider(provider)?.capture_payment(payment_id, amount).await;
        stamp(provider, "capture_payment", result)
    }

    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        provider: ProviderType,
        payment_id: &str,
        amount: i64,
    ) -> Result<PaymentResult, ServiceError> {
        let result = self.provider(provider)?.refund_payment(payment_id, amount).await;
        stamp(provider, "refund_payment", result)
    }

    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, provider: ProviderType, payment_id: &str) -> Result<PaymentResult, ServiceError> {
        let result = self.provider(provider)?.cancel_payment(payment_id).await;
        stamp(provider, "cancel_payment", result)
    }

    #[instrument(skip(self))]
    pub async fn force_approve_payment(
        &self,
        provider: ProviderType,
        payment_id: &str,
    ) -> Result<PaymentResult, ServiceError> {
        let result = self.provider(provider)?.force_approve_payment(payment_id).await;
        stamp(provider, "force_approve_payment", result)
    }

    /// Registers `{base_url}/{provider}` with every provider. A provider that
    /// fails is logged and left out of the result.
    #[instrument(skip(self, events))]
    pub async fn register_webhooks(&self, base_url: &str, events: &[String]) -> Vec<WebhookRegistration> {
        let mut registrations = Vec::with_capacity(self.providers.len());
        for (provider_type, provider) in &self.providers {
            let url = format!("{}/{}", base_url.trim_end_matches('/'), provider_type);
            match provider.register_webhook(&url, events).await {
                Ok(webhook_id) => {
                    info!(provider = %provider_type, %url, %webhook_id, "Webhook registered");
                    registrations.push(WebhookRegistration {
                        provider: *provider_type,
                        url,
                        webhook_id,
                    });
                }
                Err(e) => {
                    warn!(provider = %provider_type, %url, error = %e, "Webhook registration failed");
                }
            }
        }
        registrations
    }

    #[instrument(skip(self))]
    pub async fn delete_webhook(&self, provider: ProviderType, webhook_id: &str) -> Result<(), ServiceError> {
        self.provider(provider)?.delete_webhook(webhook_id).await
    }
}

fn stamp(
    provider: ProviderType,
    operation: &'static str,
    result: Result<PaymentResult, ServiceError>,
) -> Result<PaymentResult, ServiceError> {
    match result {
        Ok(mut result) => {
            result.provider = Some(provider);
            Ok(result)
        }
        Err(e) => {
            error!(%provider, operation, error = %e, "Payment provider call failed");
            Err(e)
        }
    }
}
