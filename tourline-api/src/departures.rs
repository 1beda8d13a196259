use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tourline_core::repository::BookingStore;
use tourline_core::CoreError;
use tourline_shared::DeparturePhase;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/departures/{id}/availability", get(availability))
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub departure_id: Uuid,
    pub capacity: i32,
    pub available: i32,
    pub phase: DeparturePhase,
}

/// GET /v1/departures/{id}/availability
/// Derived from bookings at request time, never from the cached columns.
async fn availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let departure = state
        .store
        .get_departure(id)
        .await?
        .ok_or_else(|| CoreError::not_found("departure", id))?;
    let (phase, available) = state.phases.current_phase(id).await?;

    Ok(Json(AvailabilityResponse {
        departure_id: id,
        capacity: departure.capacity,
        available,
        phase,
    }))
}
