use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tourline_catalog::{quote, InventoryCalculator};
use tourline_core::clock::Clock;
use tourline_core::repository::BookingStore;
use tourline_core::{retry_on_conflict, CoreError, CoreResult};
use tourline_shared::{Booking, BookingStatus, ExpiryPolicy, SeatCount};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub customer_id: String,
    pub departure_id: Uuid,
    pub seats: SeatCount,
}

/// Moves `booking` to `to`, or explains why the state machine forbids it.
pub(crate) fn apply_transition(
    booking: &mut Booking,
    to: BookingStatus,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if !booking.status.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            from: booking.status,
            to,
        });
    }
    booking.status = to;
    booking.updated_at = now;
    Ok(())
}

/// Owns the booking state machine: Pending to Paid, Expired or Cancelled,
/// and nothing out of those three.
pub struct BookingLedger {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    inventory: Arc<InventoryCalculator>,
    utc_offset: FixedOffset,
}

impl BookingLedger {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, policy: ExpiryPolicy) -> Self {
        let inventory = Arc::new(InventoryCalculator::new(
            store.clone(),
            clock.clone(),
            policy,
        ));
        Self {
            store,
            clock,
            inventory,
            utc_offset: Utc.fix(),
        }
    }

    /// Business offset used to decide whether a departure has started.
    pub fn with_utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn inventory(&self) -> &Arc<InventoryCalculator> {
        &self.inventory
    }

    pub fn policy(&self) -> &ExpiryPolicy {
        self.inventory.policy()
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub async fn get(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", booking_id))
    }

    /// Places a Pending hold if the departure has room for it.
    pub async fn reserve(&self, request: &ReservationRequest) -> CoreResult<Booking> {
        if request.customer_id.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "customer_id must not be empty".to_string(),
            ));
        }

        let departure = self
            .store
            .get_departure(request.departure_id)
            .await?
            .ok_or_else(|| CoreError::not_found("departure", request.departure_id))?;

        // Validates the seat counts before any lock is taken.
        quote(&departure, request.seats)?;
        let seats = request
            .seats
            .total()
            .ok_or_else(|| CoreError::ValidationError("too many seats requested".to_string()))?;

        let today = self.clock.today(self.utc_offset);
        if today >= departure.start_date {
            return Err(CoreError::ValidationError(format!(
                "departure {} started on {}",
                departure.id, departure.start_date
            )));
        }

        let booking = retry_on_conflict("reserve", || self.try_reserve(request, seats)).await?;

        info!(
            booking_id = %booking.id,
            departure_id = %booking.departure_id,
            seats = booking.seats(),
            amount = booking.total_amount,
            "Seats held"
        );
        self.refresh_quietly(booking.departure_id).await;
        Ok(booking)
    }

    async fn try_reserve(&self, request: &ReservationRequest, seats: i32) -> CoreResult<Booking> {
        let mut tx = self.store.begin().await?;
        let admission = self
            .inventory
            .admit(tx.as_mut(), request.departure_id, seats)
            .await?;
        let fare = quote(&admission.departure, request.seats)?;

        let booking = Booking::new_hold(
            request.customer_id.trim().to_string(),
            request.departure_id,
            request.seats,
            fare.total,
            self.clock.now(),
            self.policy(),
        );
        tx.insert_booking(&booking).await?;
        tx.commit().await?;

        debug!(
            booking_id = %booking.id,
            available_after = admission.available_after(seats),
            "Admission committed"
        );
        Ok(booking)
    }

    /// Cancels a Pending hold. Cancelling again, or cancelling a hold that
    /// already expired, changes nothing. A Paid booking cannot be cancelled.
    pub async fn cancel(&self, booking_id: Uuid) -> CoreResult<Booking> {
        let (booking, changed) =
            retry_on_conflict("cancel", || self.try_cancel(booking_id)).await?;

        if changed {
            info!(%booking_id, "Booking cancelled");
            self.refresh_quietly(booking.departure_id).await;
        }
        Ok(booking)
    }

    async fn try_cancel(&self, booking_id: Uuid) -> CoreResult<(Booking, bool)> {
        let mut tx = self.store.begin().await?;
        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", booking_id))?;

        match booking.status {
            BookingStatus::Cancelled | BookingStatus::Expired => Ok((booking, false)),
            BookingStatus::Paid | BookingStatus::Pending => {
                apply_transition(&mut booking, BookingStatus::Cancelled, self.clock.now())?;
                tx.update_booking(&booking).await?;
                tx.commit().await?;
                Ok((booking, true))
            }
        }
    }

    /// Expires a hold whose deadline has passed. Returns whether it changed;
    /// a booking that is no longer Pending or not yet due is left alone.
    pub async fn expire(&self, booking_id: Uuid) -> CoreResult<bool> {
        let expired = self.expire_hold(booking_id).await?;
        if let Some(departure_id) = expired {
            self.refresh_quietly(departure_id).await;
        }
        Ok(expired.is_some())
    }

    /// Expiry without the projection refresh, for callers that batch
    /// refreshes per departure. Returns the departure of an expired hold.
    pub(crate) async fn expire_hold(&self, booking_id: Uuid) -> CoreResult<Option<Uuid>> {
        retry_on_conflict("expire", || self.try_expire(booking_id)).await
    }

    async fn try_expire(&self, booking_id: Uuid) -> CoreResult<Option<Uuid>> {
        let mut tx = self.store.begin().await?;
        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", booking_id))?;

        let now = self.clock.now();
        if !self.policy().is_expired(&booking, now) {
            debug!(%booking_id, status = %booking.status, "Hold not due, left untouched");
            return Ok(None);
        }

        mark_expired(&mut booking, now)?;
        tx.update_booking(&booking).await?;
        tx.commit().await?;

        debug!(%booking_id, seats = booking.seats(), "Hold expired");
        Ok(Some(booking.departure_id))
    }

    /// Re-derives the cached seats-remaining projection. The write that
    /// triggered it has already committed, so a failure is only logged.
    pub async fn refresh_quietly(&self, departure_id: Uuid) {
        if let Err(e) = self.inventory.refresh(departure_id).await {
            warn!(%departure_id, error = %e, "Seats remaining refresh failed");
        }
    }
}

/// Expired holds carry no deadline.
pub(crate) fn mark_expired(booking: &mut Booking, now: DateTime<Utc>) -> CoreResult<()> {
    apply_transition(booking, BookingStatus::Expired, now)?;
    booking.expires_at = None;
    Ok(())
}
