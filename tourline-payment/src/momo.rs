use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
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

/// Fields of an IPN body covered by its signature, in signing order.
const IPN_SIGNED_FIELDS: [&str; 12] = [
    "amount",
    "extraData",
    "message",
    "orderId",
    "orderInfo",
    "orderType",
    "partnerCode",
    "payType",
    "requestId",
    "responseTime",
    "resultCode",
    "transId",
];

#[derive(Debug, Clone, Deserialize)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: Secret<String>,
    pub create_endpoint: String,
    pub query_endpoint: String,
    pub ipn_url: String,
    pub redirect_url: String,
    #[serde(default = "default_request_type")]
    pub request_type: String,
}

fn default_request_type() -> String {
    "captureWallet".to_string()
}

pub struct MomoGateway {
    config: MomoConfig,
    http: ProviderHttp,
}

/// resultCode 0 is paid; 1000, 7000, 7002 and 9000 are still in flight.
pub fn status_from_result_code(code: i64) -> PaymentStatus {
    match code {
        0 => PaymentStatus::Succeeded,
        1000 | 7000 | 7002 | 9000 => PaymentStatus::Pending,
        _ => PaymentStatus::Failed,
    }
}

impl MomoGateway {
    pub fn new(config: MomoConfig, http: ProviderHttp) -> Self {
        Self { config, http }
    }

    pub fn create_signature(
        &self,
        amount: i64,
        extra_data: &str,
        order_id: &str,
        order_info: &str,
        request_id: &str,
    ) -> CoreResult<String> {
        let amount = amount.to_string();
        let raw = canonical(
            Canonical::Query,
            &[
                ("accessKey", self.config.access_key.as_str()),
                ("amount", amount.as_str()),
                ("extraData", extra_data),
                ("ipnUrl", self.config.ipn_url.as_str()),
                ("orderId", order_id),
                ("orderInfo", order_info),
                ("partnerCode", self.config.partner_code.as_str()),
                ("redirectUrl", self.config.redirect_url.as_str()),
                ("requestId", request_id),
                ("requestType", self.config.request_type.as_str()),
            ],
        );
        sign(self.config.secret_key.expose(), &raw)
    }

    pub fn query_signature(&self, order_id: &str, request_id: &str) -> CoreResult<String> {
        let raw = canonical(
            Canonical::Query,
            &[
                ("accessKey", self.config.access_key.as_str()),
                ("orderId", order_id),
                ("partnerCode", self.config.partner_code.as_str()),
                ("requestId", request_id),
            ],
        );
        sign(self.config.secret_key.expose(), &raw)
    }

    /// The IPN's signed string, or `None` when a signed field is missing.
    fn ipn_canonical(&self, body: &Value) -> Option<String> {
        let mut values = Vec::with_capacity(IPN_SIGNED_FIELDS.len() + 1);
        values.push(("accessKey", self.config.access_key.clone()));
        for key in IPN_SIGNED_FIELDS {
            values.push((key, field_text(body, key)?));
        }
        let pairs: Vec<(&str, &str)> = values.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Some(canonical(Canonical::Query, &pairs))
    }

    /// Opaque `extraData` we attach to an order: base64 JSON naming the booking.
    pub fn encode_extra_data(request: &OrderRequest) -> String {
        STANDARD.encode(json!({"booking_id": request.booking_id}).to_string())
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn provider(&self) -> Provider {
        Provider::Momo
    }

    async fn create_order(&self, request: &OrderRequest) -> CoreResult<ProviderOrder> {
        let order_id = new_transaction_id(Utc::now());
        let request_id = order_id.clone();
        let extra_data = Self::encode_extra_data(request);
        let signature = self.create_signature(
            request.amount,
            &extra_data,
            &order_id,
            &request.description,
            &request_id,
        )?;

        let body = json!({
            "partnerCode": self.config.partner_code,
            "requestId": request_id,
            "amount": request.amount,
            "orderId": order_id,
            "orderInfo": request.description,
            "redirectUrl": self.config.redirect_url,
            "ipnUrl": self.config.ipn_url,
            "requestType": self.config.request_type,
            "extraData": extra_data,
            "lang": "vi",
            "signature": signature,
        });

        let resp = self.http.post_json(&self.config.create_endpoint, &body).await?;
        if field_i64(&resp, "resultCode") != Some(0) {
            let message = field_text(&resp, "message").unwrap_or_default();
            warn!(%order_id, %message, "MoMo refused order");
            return Err(CoreError::GatewayError(format!(
                "MoMo create order failed: {}",
                message
            )));
        }

        debug!(%order_id, booking_id = %request.booking_id, "MoMo order created");
        Ok(ProviderOrder {
            provider: Provider::Momo,
            transaction_id: order_id,
            external_order_id: None,
            redirect_url: field_text(&resp, "payUrl"),
            qr_code: field_text(&resp, "qrCodeUrl"),
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> bool {
        if field_text(&payload.body, "partnerCode").as_deref()
            != Some(self.config.partner_code.as_str())
        {
            return false;
        }
        let (Some(raw), Some(signature)) = (
            self.ipn_canonical(&payload.body),
            payload.body.get("signature").and_then(Value::as_str),
        ) else {
            return false;
        };
        verify(self.config.secret_key.expose(), &raw, signature)
    }

    fn interpret_callback(&self, payload: &CallbackPayload) -> CoreResult<CallbackResult> {
        let body = &payload.body;
        let transaction_id = field_text(body, "orderId")
            .ok_or_else(|| CoreError::ValidationError("IPN has no orderId".to_string()))?;
        let code = field_i64(body, "resultCode")
            .ok_or_else(|| CoreError::ValidationError("IPN has no resultCode".to_string()))?;

        Ok(CallbackResult {
            transaction_id,
            status: status_from_result_code(code),
            amount: field_i64(body, "amount"),
            provider_reference: field_text(body, "transId"),
        })
    }

    async fn query_status(&self, transaction_id: &str) -> CoreResult<StatusReport> {
        let request_id = format!("{}_q{}", transaction_id, Utc::now().timestamp_millis());
        let signature = self.query_signature(transaction_id, &request_id)?;
        let body = json!({
            "partnerCode": self.config.partner_code,
            "requestId": request_id,
            "orderId": transaction_id,
            "lang": "vi",
            "signature": signature,
        });

        let resp = self.http.post_json(&self.config.query_endpoint, &body).await?;
        let code = field_i64(&resp, "resultCode").ok_or_else(|| {
            CoreError::GatewayError("MoMo query response has no resultCode".to_string())
        })?;

        let status = status_from_result_code(code);
        Ok(StatusReport {
            transaction_id: transaction_id.to_string(),
            status,
            amount: field_i64(&resp, "amount"),
            provider_reference: field_i64(&resp, "transId")
                .filter(|id| *id != 0)
                .map(|id| id.to_string()),
            raw: resp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    const SECRET: &str = "K951B6PE1waDMi640xX08PD3vg6EkVlz";

    fn gateway() -> MomoGateway {
        MomoGateway::new(
            MomoConfig {
                partner_code: "MOMOBKUN20180529".to_string(),
                access_key: "klm05TvNBzhg7h7j".to_string(),
                secret_key: Secret::from(SECRET),
                create_endpoint: "http://127.0.0.1:9/v2/gateway/api/create".to_string(),
                query_endpoint: "http://127.0.0.1:9/v2/gateway/api/query".to_string(),
                ipn_url: "https://example.test/v1/webhooks/momo".to_string(),
                redirect_url: "https://example.test/done".to_string(),
                request_type: default_request_type(),
            },
            ProviderHttp::new(Duration::from_secs(1)).unwrap(),
        )
    }

    fn signed_ipn(result_code: i64) -> Value {
        let mut body = json!({
            "partnerCode": "MOMOBKUN20180529",
            "orderId": "250301_17408000000001234",
            "requestId": "250301_17408000000001234",
            "amount": 150000,
            "orderInfo": "Booking 42",
            "orderType": "momo_wallet",
            "transId": 4088878653_i64,
            "resultCode": result_code,
            "message": "Successful.",
            "payType": "qr",
            "responseTime": 1740800000123_i64,
            "extraData": "",
        });
        let raw = format!(
            "accessKey=klm05TvNBzhg7h7j&amount=150000&extraData=&message=Successful.\
             &orderId=250301_17408000000001234&orderInfo=Booking 42&orderType=momo_wallet\
             &partnerCode=MOMOBKUN20180529&payType=qr&requestId=250301_17408000000001234\
             &responseTime=1740800000123&resultCode={}&transId=4088878653",
            result_code
        );
        body["signature"] = json!(sign(SECRET, &raw).unwrap());
        body
    }

    #[test]
    fn test_create_signature_matches_canonical_string() {
        let gw = gateway();
        let sig = gw
            .create_signature(150000, "", "order-1", "Booking 42", "order-1")
            .unwrap();
        let expected = sign(
            SECRET,
            "accessKey=klm05TvNBzhg7h7j&amount=150000&extraData=\
             &ipnUrl=https://example.test/v1/webhooks/momo&orderId=order-1&orderInfo=Booking 42\
             &partnerCode=MOMOBKUN20180529&redirectUrl=https://example.test/done\
             &requestId=order-1&requestType=captureWallet",
        )
        .unwrap();
        assert_eq!(sig, expected);
    }

    #[test]
    fn test_query_signature_matches_canonical_string() {
        let gw = gateway();
        let expected = sign(
            SECRET,
            "accessKey=klm05TvNBzhg7h7j&orderId=o1&partnerCode=MOMOBKUN20180529&requestId=r1",
        )
        .unwrap();
        assert_eq!(gw.query_signature("o1", "r1").unwrap(), expected);
    }

    #[test]
    fn test_signed_ipn_verifies_and_interprets() {
        let gw = gateway();
        let payload = CallbackPayload::new(Provider::Momo, signed_ipn(0));
        assert!(gw.verify_callback(&payload));

        let result = gw.interpret_callback(&payload).unwrap();
        assert_eq!(result.transaction_id, "250301_17408000000001234");
        assert_eq!(result.status, PaymentStatus::Succeeded);
        assert_eq!(result.amount, Some(150000));
        assert_eq!(result.provider_reference.as_deref(), Some("4088878653"));
    }

    #[test]
    fn test_failed_ipn_is_still_authentic() {
        let gw = gateway();
        let payload = CallbackPayload::new(Provider::Momo, signed_ipn(1006));
        assert!(gw.verify_callback(&payload));
        assert_eq!(
            gw.interpret_callback(&payload).unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[test]
    fn test_tampered_ipn_rejected() {
        let gw = gateway();
        let mut body = signed_ipn(1006);
        body["resultCode"] = json!(0);
        assert!(!gw.verify_callback(&CallbackPayload::new(Provider::Momo, body)));

        let mut body = signed_ipn(0);
        body["amount"] = json!(1);
        assert!(!gw.verify_callback(&CallbackPayload::new(Provider::Momo, body)));
    }

    #[test]
    fn test_ipn_missing_field_or_foreign_partner_rejected() {
        let gw = gateway();
        let mut body = signed_ipn(0);
        body.as_object_mut().unwrap().remove("payType");
        assert!(!gw.verify_callback(&CallbackPayload::new(Provider::Momo, body)));

        let mut body = signed_ipn(0);
        body["partnerCode"] = json!("SOMEONEELSE");
        assert!(!gw.verify_callback(&CallbackPayload::new(Provider::Momo, body)));

        let mut body = signed_ipn(0);
        body.as_object_mut().unwrap().remove("signature");
        assert!(!gw.verify_callback(&CallbackPayload::new(Provider::Momo, body)));
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(status_from_result_code(0), PaymentStatus::Succeeded);
        for code in [1000, 7000, 7002, 9000] {
            assert_eq!(status_from_result_code(code), PaymentStatus::Pending);
        }
        for code in [1001, 1006, 49, -1] {
            assert_eq!(status_from_result_code(code), PaymentStatus::Failed);
        }
    }

    #[test]
    fn test_extra_data_names_booking() {
        let request = OrderRequest {
            booking_id: Uuid::nil(),
            amount: 1,
            payer_id: "c".to_string(),
            description: "d".to_string(),
        };
        let decoded = STANDARD.decode(MomoGateway::encode_extra_data(&request)).unwrap();
        let value: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["booking_id"], json!(Uuid::nil()));
    }
}
