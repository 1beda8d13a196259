use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tourline_booking::CallbackDisposition;
use tourline_core::payment::Provider;
use tourline_payment::ZaloPayGateway;
use tracing::{info, warn};

use crate::state::AppState;

/// Providers get a transport-level acknowledgement whatever happens inside;
/// failures are logged for manual reconciliation.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/webhooks/zalopay", post(zalopay_callback))
        .route("/v1/webhooks/momo", post(momo_ipn))
}

/// POST /v1/webhooks/zalopay
async fn zalopay_callback(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let accepted = match dispatch(&state, Provider::ZaloPay, &body).await {
        Some(CallbackDisposition::SignatureRejected) | None => false,
        Some(_) => true,
    };
    (StatusCode::OK, Json(ZaloPayGateway::acknowledgement(accepted)))
}

/// POST /v1/webhooks/momo
async fn momo_ipn(State(state): State<AppState>, body: Bytes) -> StatusCode {
    dispatch(&state, Provider::Momo, &body).await;
    StatusCode::NO_CONTENT
}

async fn dispatch(state: &AppState, provider: Provider, body: &[u8]) -> Option<CallbackDisposition> {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(%provider, error = %e, "Callback body is not JSON");
            return None;
        }
    };

    let disposition = state.orchestrator.handle_callback(provider, payload).await;
    match &disposition {
        CallbackDisposition::Settled(outcome) => {
            info!(%provider, outcome = ?outcome, "Callback processed");
        }
        CallbackDisposition::SignatureRejected => {}
        CallbackDisposition::Unprocessed(reason) => {
            warn!(%provider, %reason, "Callback acknowledged but not applied");
        }
    }
    Some(disposition)
}
