use std::sync::Arc;

use chrono::{DateTime, Utc};
use tourline_core::clock::Clock;
use tourline_core::repository::{BookingStore, StoreTx};
use tourline_core::{CoreError, CoreResult};
use tourline_shared::{Booking, Departure, ExpiryPolicy};
use tracing::debug;
use uuid::Uuid;

/// Seats left on a departure of `capacity` given its bookings at `now`.
///
/// Paid bookings and unexpired holds count, adults and children alike.
/// Never negative: an over-committed departure (capacity lowered by an
/// admin edit) simply reports zero.
pub fn seats_available(
    capacity: i32,
    bookings: &[Booking],
    now: DateTime<Utc>,
    policy: &ExpiryPolicy,
) -> i32 {
    let held: i32 = bookings
        .iter()
        .filter(|b| policy.holds_seats(b, now))
        .map(Booking::seats)
        .fold(0, i32::saturating_add);

    capacity.saturating_sub(held).max(0)
}

/// Result of a successful admission check. The departure row stays locked
/// by the transaction that produced it.
#[derive(Debug, Clone)]
pub struct Admission {
    pub departure: Departure,
    pub available_before: i32,
}

impl Admission {
    pub fn available_after(&self, seats: i32) -> i32 {
        (self.available_before - seats).max(0)
    }
}

/// Derives availability from bookings; there is no seat counter to drift.
pub struct InventoryCalculator {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    policy: ExpiryPolicy,
}

impl InventoryCalculator {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, policy: ExpiryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &ExpiryPolicy {
        &self.policy
    }

    /// Read-only availability for display.
    pub async fn available(&self, departure_id: Uuid) -> CoreResult<i32> {
        let departure = self
            .store
            .get_departure(departure_id)
            .await?
            .ok_or_else(|| CoreError::not_found("departure", departure_id))?;

        self.available_for(&departure).await
    }

    pub async fn available_for(&self, departure: &Departure) -> CoreResult<i32> {
        let bookings = self.store.bookings_holding_seats(departure.id).await?;
        Ok(seats_available(
            departure.capacity,
            &bookings,
            self.clock.now(),
            &self.policy,
        ))
    }

    /// Admission control inside the caller's transaction: locks the
    /// departure, recomputes, and rejects a request that does not fit.
    pub async fn admit(
        &self,
        tx: &mut dyn StoreTx,
        departure_id: Uuid,
        requested: i32,
    ) -> CoreResult<Admission> {
        let departure = tx
            .lock_departure(departure_id)
            .await?
            .ok_or_else(|| CoreError::not_found("departure", departure_id))?;

        let bookings = tx.bookings_holding_seats(departure_id).await?;
        let available = seats_available(
            departure.capacity,
            &bookings,
            self.clock.now(),
            &self.policy,
        );

        if requested > available {
            return Err(CoreError::CapacityExceeded {
                requested,
                available,
            });
        }

        Ok(Admission {
            departure,
            available_before: available,
        })
    }

    /// Re-derive and store the cached seats-remaining projection.
    pub async fn refresh(&self, departure_id: Uuid) -> CoreResult<i32> {
        let mut tx = self.store.begin().await?;
        let departure = tx
            .lock_departure(departure_id)
            .await?
            .ok_or_else(|| CoreError::not_found("departure", departure_id))?;

        let bookings = tx.bookings_holding_seats(departure_id).await?;
        let available = seats_available(
            departure.capacity,
            &bookings,
            self.clock.now(),
            &self.policy,
        );

        tx.set_seats_remaining(departure_id, available).await?;
        tx.commit().await?;

        debug!(%departure_id, available, "Refreshed seats remaining");
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tourline_shared::{BookingStatus, SeatCount};

    fn booking(status: BookingStatus, adults: i32, children: i32, now: DateTime<Utc>) -> Booking {
        let mut b = Booking::new_hold(
            "c".to_string(),
            Uuid::new_v4(),
            SeatCount::new(adults, children),
            0,
            now,
            &ExpiryPolicy::default(),
        );
        b.status = status;
        b
    }

    #[test]
    fn test_children_count_like_adults() {
        let now = Utc::now();
        let policy = ExpiryPolicy::default();
        let bookings = vec![booking(BookingStatus::Paid, 2, 3, now)];
        assert_eq!(seats_available(10, &bookings, now, &policy), 5);
    }

    #[test]
    fn test_only_paid_and_live_holds_count() {
        let now = Utc::now();
        let policy = ExpiryPolicy::default();
        let mut stale = booking(BookingStatus::Pending, 4, 0, now - Duration::minutes(20));
        stale.expires_at = Some(now - Duration::seconds(1));

        let bookings = vec![
            booking(BookingStatus::Paid, 2, 0, now),
            booking(BookingStatus::Pending, 1, 1, now),
            booking(BookingStatus::Cancelled, 3, 0, now),
            booking(BookingStatus::Expired, 3, 0, now),
            stale,
        ];

        assert_eq!(seats_available(10, &bookings, now, &policy), 6);
    }

    #[test]
    fn test_zero_capacity_reports_zero() {
        let policy = ExpiryPolicy::default();
        assert_eq!(seats_available(0, &[], Utc::now(), &policy), 0);
    }

    #[test]
    fn test_overcommitted_departure_is_not_negative() {
        let now = Utc::now();
        let policy = ExpiryPolicy::default();
        let bookings = vec![booking(BookingStatus::Paid, 8, 0, now)];
        assert_eq!(seats_available(5, &bookings, now, &policy), 0);
    }

    #[test]
    fn test_huge_seat_totals_saturate() {
        let now = Utc::now();
        let policy = ExpiryPolicy::default();
        let bookings = vec![
            booking(BookingStatus::Paid, i32::MAX, 0, now),
            booking(BookingStatus::Paid, 1, 0, now),
        ];
        assert_eq!(seats_available(10, &bookings, now, &policy), 0);
    }
}
