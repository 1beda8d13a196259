use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tourline_core::payment::{
    CallbackPayload, CallbackResult, OrderRequest, PaymentGateway, PaymentStatus, Provider,
    ProviderOrder, StatusReport,
};
use tourline_core::{CoreError, CoreResult};

use crate::client::new_transaction_id;

/// Cash at the office or a staff-checked bank transfer. Nothing calls us
/// back; staff confirm through the synchronous confirmation endpoint.
#[derive(Debug, Default, Clone)]
pub struct ManualGateway;

impl ManualGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for ManualGateway {
    fn provider(&self) -> Provider {
        Provider::Manual
    }

    async fn create_order(&self, _request: &OrderRequest) -> CoreResult<ProviderOrder> {
        Ok(ProviderOrder {
            provider: Provider::Manual,
            transaction_id: new_transaction_id(Utc::now()),
            external_order_id: None,
            redirect_url: None,
            qr_code: None,
        })
    }

    fn verify_callback(&self, _payload: &CallbackPayload) -> bool {
        false
    }

    fn interpret_callback(&self, _payload: &CallbackPayload) -> CoreResult<CallbackResult> {
        Err(CoreError::ValidationError(
            "manual payments have no callbacks".to_string(),
        ))
    }

    async fn query_status(&self, transaction_id: &str) -> CoreResult<StatusReport> {
        Ok(StatusReport {
            transaction_id: transaction_id.to_string(),
            status: PaymentStatus::Pending,
            amount: None,
            provider_reference: None,
            raw: Value::Null,
        })
    }
}
