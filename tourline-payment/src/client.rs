use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tourline_core::{CoreError, CoreResult};
use tracing::warn;

/// Provider dates are in Vietnam local time (UTC+7).
const PROVIDER_UTC_OFFSET_SECONDS: i32 = 7 * 3600;

/// New id for one payment attempt: `yymmdd_` in provider local time, the
/// millisecond timestamp and a four digit random suffix.
pub fn new_transaction_id(now: DateTime<Utc>) -> String {
    let local = FixedOffset::east_opt(PROVIDER_UTC_OFFSET_SECONDS)
        .map(|offset| now.with_timezone(&offset).format("%y%m%d").to_string())
        .unwrap_or_else(|| now.format("%y%m%d").to_string());
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{}_{}{:04}", local, now.timestamp_millis(), suffix)
}

/// Outbound HTTP shared by the provider gateways. Every call carries the
/// configured timeout and every failure surfaces as a gateway error.
#[derive(Clone)]
pub struct ProviderHttp {
    client: reqwest::Client,
}

impl ProviderHttp {
    pub fn new(timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self { client })
    }

    pub async fn post_form(&self, url: &str, form: &[(&str, String)]) -> CoreResult<Value> {
        let resp = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(url, resp).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> CoreResult<Value> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(url, resp).await
    }

    async fn read_json(url: &str, resp: reqwest::Response) -> CoreResult<Value> {
        let status = resp.status();
        if !status.is_success() {
            warn!(%url, %status, "Provider returned non-success status");
            return Err(CoreError::GatewayError(format!(
                "provider responded with HTTP {}",
                status
            )));
        }
        resp.json::<Value>().await.map_err(transport_error)
    }
}

pub fn transport_error(e: reqwest::Error) -> CoreError {
    if e.is_timeout() {
        CoreError::GatewayError(format!("provider request timed out: {}", e))
    } else if e.is_decode() {
        CoreError::GatewayError(format!("unreadable provider response: {}", e))
    } else {
        CoreError::GatewayError(e.to_string())
    }
}

/// Reads a field as the text a provider signed: strings verbatim, numbers
/// in decimal.
pub(crate) fn field_text(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads an integer field that a provider may send as a number or a string.
pub(crate) fn field_i64(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
