use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tourline_booking::{ReservationRequest, SettlementOutcome};
use tourline_shared::{Booking, BookingStatus, SeatCount};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/confirm", post(confirm_booking))
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub departure_id: Uuid,
    pub customer_id: String,
    pub adults: i32,
    #[serde(default)]
    pub children: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub booking_id: Uuid,
    pub amount: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: BookingStatus,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub customer_id: String,
    pub departure_id: Uuid,
    pub adults: i32,
    pub children: i32,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            customer_id: b.customer_id,
            departure_id: b.departure_id,
            adults: b.adults,
            children: b.children,
            total_amount: b.total_amount,
            status: b.status,
            payment_method: b.payment_method,
            created_at: b.created_at,
            expires_at: b.expires_at,
            paid_at: b.paid_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub method: String,
}

/// POST /v1/bookings
async fn create_booking(
    State(state): State<AppState>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), AppError> {
    let Json(req) = payload?;

    let booking = state
        .ledger
        .reserve(&ReservationRequest {
            customer_id: req.customer_id,
            departure_id: req.departure_id,
            seats: SeatCount::new(req.adults, req.children),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            booking_id: booking.id,
            amount: booking.total_amount,
            expires_at: booking.expires_at,
            status: booking.status,
        }),
    ))
}

/// GET /v1/bookings/{id}
async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.ledger.get(id).await?;
    Ok(Json(booking.into()))
}

/// POST /v1/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.ledger.cancel(id).await?;
    Ok(Json(booking.into()))
}

/// POST /v1/bookings/{id}/confirm
/// Caller-asserted payment through a synchronous method (cash, bank transfer).
async fn confirm_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Json<SettlementOutcome>, AppError> {
    let Json(req) = payload?;
    let outcome = state.orchestrator.confirm_manual(id, &req.method).await?;
    Ok(Json(outcome))
}
