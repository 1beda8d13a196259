use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tourline_core::payment::{
    CallbackPayload, CallbackResult, OrderRequest, PaymentGateway, PaymentStatus, Provider,
    ProviderOrder, StatusReport,
};
use tourline_core::{CoreError, CoreResult};
use tourline_shared::Secret;
use tracing::{debug, warn};

use crate::client::{field_i64, field_text, new_transaction_id, ProviderHttp};
use crate::signature::{canonical, sign, verify, Canonical};

#[derive(Debug, Clone, Deserialize)]
pub struct ZaloPayConfig {
    pub app_id: String,
    /// Signs outbound order and query requests.
    pub key1: Secret<String>,
    /// Verifies inbound callbacks.
    pub key2: Secret<String>,
    pub create_endpoint: String,
    pub query_endpoint: String,
    pub callback_url: String,
    pub redirect_url: String,
}

pub struct ZaloPayGateway {
    config: ZaloPayConfig,
    http: ProviderHttp,
}

impl ZaloPayGateway {
    pub fn new(config: ZaloPayConfig, http: ProviderHttp) -> Self {
        Self { config, http }
    }

    /// `mac` over `app_id|app_trans_id|app_user|amount|app_time|embed_data|item`.
    pub fn order_mac(
        &self,
        app_trans_id: &str,
        app_user: &str,
        amount: i64,
        app_time: i64,
        embed_data: &str,
        item: &str,
    ) -> CoreResult<String> {
        let amount = amount.to_string();
        let app_time = app_time.to_string();
        let data = canonical(
            Canonical::Pipe,
            &[
                ("app_id", self.config.app_id.as_str()),
                ("app_trans_id", app_trans_id),
                ("app_user", app_user),
                ("amount", amount.as_str()),
                ("app_time", app_time.as_str()),
                ("embed_data", embed_data),
                ("item", item),
            ],
        );
        sign(self.config.key1.expose(), &data)
    }

    /// `mac` over `app_id|app_trans_id|key1`.
    pub fn query_mac(&self, app_trans_id: &str) -> CoreResult<String> {
        let data = canonical(
            Canonical::Pipe,
            &[
                ("app_id", self.config.app_id.as_str()),
                ("app_trans_id", app_trans_id),
                ("key1", self.config.key1.expose().as_str()),
            ],
        );
        sign(self.config.key1.expose(), &data)
    }

    /// Acknowledgement body ZaloPay expects from the callback endpoint.
    pub fn acknowledgement(accepted: bool) -> Value {
        if accepted {
            json!({"return_code": 1, "return_message": "success"})
        } else {
            json!({"return_code": -1, "return_message": "mac not equal"})
        }
    }

    fn callback_data(payload: &CallbackPayload) -> CoreResult<Value> {
        let data = payload
            .body
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::ValidationError("callback has no data".to_string()))?;
        serde_json::from_str(data)
            .map_err(|e| CoreError::ValidationError(format!("callback data is not JSON: {}", e)))
    }
}

fn status_from_return_code(code: i64) -> Option<PaymentStatus> {
    match code {
        1 => Some(PaymentStatus::Succeeded),
        2 => Some(PaymentStatus::Failed),
        3 => Some(PaymentStatus::Pending),
        _ => None,
    }
}

/// ZaloPay reports `zp_trans_id = 0` until a payment exists.
fn provider_reference(body: &Value) -> Option<String> {
    field_i64(body, "zp_trans_id")
        .filter(|id| *id != 0)
        .map(|id| id.to_string())
}

#[async_trait]
impl PaymentGateway for ZaloPayGateway {
    fn provider(&self) -> Provider {
        Provider::ZaloPay
    }

    async fn create_order(&self, request: &OrderRequest) -> CoreResult<ProviderOrder> {
        let now = Utc::now();
        let app_trans_id = new_transaction_id(now);
        let app_time = now.timestamp_millis();
        let embed_data = json!({
            "redirecturl": self.config.redirect_url,
            "booking_id": request.booking_id,
        })
        .to_string();
        let item = "[]";
        let mac = self.order_mac(
            &app_trans_id,
            &request.payer_id,
            request.amount,
            app_time,
            &embed_data,
            item,
        )?;

        let form = [
            ("app_id", self.config.app_id.clone()),
            ("app_user", request.payer_id.clone()),
            ("app_trans_id", app_trans_id.clone()),
            ("app_time", app_time.to_string()),
            ("amount", request.amount.to_string()),
            ("item", item.to_string()),
            ("embed_data", embed_data),
            ("description", request.description.clone()),
            ("bank_code", String::new()),
            ("callback_url", self.config.callback_url.clone()),
            ("mac", mac),
        ];

        let resp = self.http.post_form(&self.config.create_endpoint, &form).await?;
        if field_i64(&resp, "return_code") != Some(1) {
            let message = field_text(&resp, "return_message").unwrap_or_default();
            warn!(%app_trans_id, %message, "ZaloPay refused order");
            return Err(CoreError::GatewayError(format!(
                "ZaloPay create order failed: {}",
                message
            )));
        }

        debug!(%app_trans_id, booking_id = %request.booking_id, "ZaloPay order created");
        Ok(ProviderOrder {
            provider: Provider::ZaloPay,
            transaction_id: app_trans_id,
            external_order_id: field_text(&resp, "zp_trans_token"),
            redirect_url: field_text(&resp, "order_url"),
            qr_code: field_text(&resp, "qr_code"),
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> bool {
        let (Some(data), Some(mac)) = (
            payload.body.get("data").and_then(Value::as_str),
            payload.body.get("mac").and_then(Value::as_str),
        ) else {
            return false;
        };
        verify(self.config.key2.expose(), data, mac)
    }

    fn interpret_callback(&self, payload: &CallbackPayload) -> CoreResult<CallbackResult> {
        let data = Self::callback_data(payload)?;

        if let Some(app_id) = field_text(&data, "app_id") {
            if app_id != self.config.app_id {
                return Err(CoreError::ValidationError(format!(
                    "callback for foreign app_id {}",
                    app_id
                )));
            }
        }

        let transaction_id = field_text(&data, "app_trans_id")
            .ok_or_else(|| CoreError::ValidationError("callback has no app_trans_id".to_string()))?;

        // ZaloPay only calls back for completed payments.
        Ok(CallbackResult {
            transaction_id,
            status: PaymentStatus::Succeeded,
            amount: field_i64(&data, "amount"),
            provider_reference: provider_reference(&data),
        })
    }

    async fn query_status(&self, transaction_id: &str) -> CoreResult<StatusReport> {
        let mac = self.query_mac(transaction_id)?;
        let form = [
            ("app_id", self.config.app_id.clone()),
            ("app_trans_id", transaction_id.to_string()),
            ("mac", mac),
        ];

        let resp = self.http.post_form(&self.config.query_endpoint, &form).await?;
        let code = field_i64(&resp, "return_code").unwrap_or_default();
        let status = status_from_return_code(code).ok_or_else(|| {
            CoreError::GatewayError(format!(
                "ZaloPay query returned code {}: {}",
                code,
                field_text(&resp, "return_message").unwrap_or_default()
            ))
        })?;

        Ok(StatusReport {
            transaction_id: transaction_id.to_string(),
            status,
            amount: field_i64(&resp, "amount"),
            provider_reference: provider_reference(&resp),
            raw: resp,
        })
    }
}
