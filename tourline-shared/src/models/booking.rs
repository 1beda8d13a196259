use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Paid => "PAID",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// Only a pending hold can move, and only into one of the three outcomes.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Paid)
                | (BookingStatus::Pending, BookingStatus::Expired)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "PAID" => Ok(BookingStatus::Paid),
            "EXPIRED" => Ok(BookingStatus::Expired),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(UnknownVariant {
                kind: "booking status",
                value: other.to_string(),
            }),
        }
    }
}

/// Seats requested by a reservation. Adults and children weigh the same
/// against capacity; they only differ in price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SeatCount {
    pub adults: i32,
    pub children: i32,
}

impl SeatCount {
    pub fn new(adults: i32, children: i32) -> Self {
        Self { adults, children }
    }

    /// `None` when the counts do not fit in an `i32` together.
    pub fn total(&self) -> Option<i32> {
        self.adults.checked_add(self.children)
    }
}

/// A seat hold on a departure, and later the paid booking it became.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: String,
    pub departure_id: Uuid,
    pub adults: i32,
    pub children: i32,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` on legacy rows; see [`ExpiryPolicy::effective_expiry`].
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new_hold(
        customer_id: String,
        departure_id: Uuid,
        seats: SeatCount,
        total_amount: i64,
        now: DateTime<Utc>,
        policy: &ExpiryPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            departure_id,
            adults: seats.adults,
            children: seats.children,
            total_amount,
            status: BookingStatus::Pending,
            payment_method: None,
            created_at: now,
            expires_at: Some(policy.hold_deadline(now)),
            paid_at: None,
            updated_at: now,
        }
    }

    pub fn seats(&self) -> i32 {
        self.adults.saturating_add(self.children)
    }
}

/// The single definition of when a pending hold stops counting against
/// capacity. Structured `expires_at` wins; legacy rows without one fall back
/// to `created_at + reservation_window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    reservation_window: Duration,
}

impl ExpiryPolicy {
    pub const DEFAULT_WINDOW_SECONDS: i64 = 600;

    pub fn new(reservation_window: Duration) -> Self {
        Self { reservation_window }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self::new(Duration::seconds(seconds))
    }

    pub fn reservation_window(&self) -> Duration {
        self.reservation_window
    }

    pub fn hold_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.reservation_window
    }

    pub fn effective_expiry(&self, booking: &Booking) -> DateTime<Utc> {
        booking
            .expires_at
            .unwrap_or(booking.created_at + self.reservation_window)
    }

    /// A pending booking whose deadline is at or before `now`.
    pub fn is_expired(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.status == BookingStatus::Pending && self.effective_expiry(booking) <= now
    }

    /// Whether the booking's seats count against the departure at `now`.
    pub fn holds_seats(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        match booking.status {
            BookingStatus::Paid => true,
            BookingStatus::Pending => self.effective_expiry(booking) > now,
            BookingStatus::Expired | BookingStatus::Cancelled => false,
        }
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from_seconds(Self::DEFAULT_WINDOW_SECONDS)
    }
}
