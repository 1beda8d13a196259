use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tourline_shared::{
    Booking, Departure, DeparturePhase, ExpiryPolicy, FinancialRecord, PaymentOrder,
    PaymentStatus,
};
use uuid::Uuid;

use crate::CoreResult;

/// Storage for departures, bookings and their payment trail.
///
/// Reads on this trait see committed data and take no locks. Every write
/// that must be checked against current state goes through a [`StoreTx`].
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Open a unit of work. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>>;

    async fn get_departure(&self, id: Uuid) -> CoreResult<Option<Departure>>;

    async fn list_departures(&self) -> CoreResult<Vec<Departure>>;

    async fn set_departure_phase(&self, id: Uuid, phase: DeparturePhase) -> CoreResult<()>;

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    /// Paid and Pending bookings of a departure, expired-by-time or not.
    async fn bookings_holding_seats(&self, departure_id: Uuid) -> CoreResult<Vec<Booking>>;

    /// Pending bookings whose effective expiry is at or before `now`.
    async fn find_due_holds(
        &self,
        now: DateTime<Utc>,
        policy: &ExpiryPolicy,
    ) -> CoreResult<Vec<Booking>>;

    async fn insert_payment_order(&self, order: &PaymentOrder) -> CoreResult<()>;

    async fn get_payment_order(&self, transaction_id: &str) -> CoreResult<Option<PaymentOrder>>;

    /// Most recently created attempt for a booking.
    async fn latest_payment_order(&self, booking_id: Uuid) -> CoreResult<Option<PaymentOrder>>;

    /// Attempts still awaiting a provider result, created at or before `created_before`.
    async fn pending_payment_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> CoreResult<Vec<PaymentOrder>>;

    /// Store the provider's answer for an attempt. Returns `false` and leaves
    /// the row alone when a terminal result was already recorded.
    async fn record_payment_outcome(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool>;

    async fn financial_records(&self, booking_id: Uuid) -> CoreResult<Vec<FinancialRecord>>;
}

/// A single serializable unit of work.
///
/// Lock order inside one transaction: at most one departure, then bookings.
#[async_trait]
pub trait StoreTx: Send {
    /// Read the departure and hold its row lock until commit or rollback.
    async fn lock_departure(&mut self, id: Uuid) -> CoreResult<Option<Departure>>;

    async fn bookings_holding_seats(&mut self, departure_id: Uuid) -> CoreResult<Vec<Booking>>;

    async fn set_seats_remaining(&mut self, departure_id: Uuid, seats: i32) -> CoreResult<()>;

    /// Read the booking and hold its row lock until commit or rollback.
    async fn lock_booking(&mut self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn insert_booking(&mut self, booking: &Booking) -> CoreResult<()>;

    async fn update_booking(&mut self, booking: &Booking) -> CoreResult<()>;

    async fn financial_record(&mut self, booking_id: Uuid) -> CoreResult<Option<FinancialRecord>>;

    /// Fails if the booking already has a record.
    async fn insert_financial_record(&mut self, record: &FinancialRecord) -> CoreResult<()>;

    /// Same contract as [`BookingStore::record_payment_outcome`], inside this unit of work.
    async fn record_payment_outcome(
        &mut self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;
}
