use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub use tourline_shared::{PaymentStatus, Provider};

use crate::{CoreError, CoreResult};

/// What we ask a provider to collect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub booking_id: Uuid,
    pub amount: i64,
    /// Payer reference passed to the provider (our customer id).
    pub payer_id: String,
    pub description: String,
}

/// A provider-side order created for one payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub provider: Provider,
    pub transaction_id: String,
    pub external_order_id: Option<String>,
    pub redirect_url: Option<String>,
    pub qr_code: Option<String>,
}

/// Raw body of an inbound provider notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub provider: Provider,
    pub body: serde_json::Value,
}

impl CallbackPayload {
    pub fn new(provider: Provider, body: serde_json::Value) -> Self {
        Self { provider, body }
    }
}

/// Fields of a callback once its signature has been checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackResult {
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub amount: Option<i64>,
    pub provider_reference: Option<String>,
}

/// Answer to an outbound status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub amount: Option<i64>,
    pub provider_reference: Option<String>,
    pub raw: serde_json::Value,
}

/// Why the settlement service should believe a booking was paid.
#[derive(Debug, Clone)]
pub enum PaymentEvidence {
    /// Pushed by the provider; trusted only after signature verification.
    Callback(CallbackPayload),
    /// Pulled by us through a signed status query.
    StatusQuery(StatusReport),
    /// Asserted by the caller for a synchronous provider.
    Synthetic { method: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Create a provider order with a fresh transaction id.
    async fn create_order(&self, request: &OrderRequest) -> CoreResult<ProviderOrder>;

    /// Recompute the callback signature and compare in constant time.
    fn verify_callback(&self, payload: &CallbackPayload) -> bool;

    /// Extract the result from an already verified callback.
    fn interpret_callback(&self, payload: &CallbackPayload) -> CoreResult<CallbackResult>;

    async fn query_status(&self, transaction_id: &str) -> CoreResult<StatusReport>;
}

/// The configured gateways, one per provider.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: Provider) -> CoreResult<Arc<dyn PaymentGateway>> {
        self.gateways.get(&provider).cloned().ok_or_else(|| {
            CoreError::ValidationError(format!("payment provider {} is not configured", provider))
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.gateways.keys().copied().collect()
    }
}
