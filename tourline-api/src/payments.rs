use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tourline_booking::SettlementOutcome;
use tourline_core::payment::Provider;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings/{id}/payments", post(create_payment))
        .route("/v1/bookings/{id}/payments/check", post(check_payment))
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub transaction_id: String,
    pub provider: Provider,
    pub amount: i64,
    pub redirect_url: Option<String>,
    pub qr_code: Option<String>,
}

/// POST /v1/bookings/{id}/payments
async fn create_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    let Json(req) = payload?;
    let provider: Provider = req
        .provider
        .parse()
        .map_err(|e| AppError::BadRequest(format!("{}", e)))?;

    let order = state.orchestrator.initiate(id, provider).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            transaction_id: order.transaction_id,
            provider: order.provider,
            amount: order.amount,
            redirect_url: order.redirect_url,
            qr_code: order.qr_code,
        }),
    ))
}

/// POST /v1/bookings/{id}/payments/check
async fn check_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SettlementOutcome>, AppError> {
    let outcome = state.orchestrator.check_status(id).await?;
    Ok(Json(outcome))
}
