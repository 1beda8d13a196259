use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tourline_core::repository::{BookingStore, StoreTx};
use tourline_core::{CoreError, CoreResult};
use tourline_shared::{
    Booking, BookingStatus, Departure, DeparturePhase, ExpiryPolicy, FinancialRecord,
    PaymentOrder, PaymentStatus,
};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct State {
    departures: HashMap<Uuid, Departure>,
    bookings: HashMap<Uuid, Booking>,
    payment_orders: HashMap<String, PaymentOrder>,
    /// Keyed by booking id; one record per booking.
    financial_records: HashMap<Uuid, FinancialRecord>,
}

impl State {
    fn holding_seats(&self, departure_id: Uuid) -> Vec<Booking> {
        self.bookings
            .values()
            .filter(|b| b.departure_id == departure_id)
            .filter(|b| matches!(b.status, BookingStatus::Paid | BookingStatus::Pending))
            .cloned()
            .collect()
    }

    fn record_outcome(
        &mut self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool> {
        let order = self
            .payment_orders
            .get_mut(transaction_id)
            .ok_or_else(|| CoreError::not_found("payment order", transaction_id))?;

        if order.status.is_terminal() {
            return Ok(false);
        }
        order.status = status;
        order.raw_payload = Some(payload.clone());
        order.updated_at = Utc::now();
        Ok(true)
    }
}

/// In-process store with the same contract as the PostgreSQL one.
///
/// A transaction holds the whole store for its lifetime and works on a
/// staged copy that replaces the live state on commit. Transactions are
/// therefore serialized, which is stricter than row locking but observably
/// equivalent for admission and settlement. Reads on the store itself wait
/// for an open transaction, so never issue them while holding one on the
/// same task.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    offline: Arc<AtomicBool>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            offline: Arc::new(AtomicBool::new(false)),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// While offline every operation fails with a persistence error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn seed_departure(&self, departure: Departure) {
        self.state
            .lock()
            .await
            .departures
            .insert(departure.id, departure);
    }

    pub async fn seed_booking(&self, booking: Booking) {
        self.state.lock().await.bookings.insert(booking.id, booking);
    }

    pub async fn seed_payment_order(&self, order: PaymentOrder) {
        self.state
            .lock()
            .await
            .payment_orders
            .insert(order.transaction_id.clone(), order);
    }

    fn ensure_online(&self) -> CoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::PersistenceError("store offline".to_string()));
        }
        Ok(())
    }

    async fn acquire(&self) -> CoreResult<OwnedMutexGuard<State>> {
        self.ensure_online()?;
        tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| CoreError::ConcurrencyConflict("lock wait timed out".to_string()))
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let guard = self.acquire().await?;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            offline: self.offline.clone(),
        }))
    }

    async fn get_departure(&self, id: Uuid) -> CoreResult<Option<Departure>> {
        Ok(self.acquire().await?.departures.get(&id).cloned())
    }

    async fn list_departures(&self) -> CoreResult<Vec<Departure>> {
        let state = self.acquire().await?;
        let mut departures: Vec<Departure> = state.departures.values().cloned().collect();
        departures.sort_by_key(|d| (d.start_date, d.id));
        Ok(departures)
    }

    async fn set_departure_phase(&self, id: Uuid, phase: DeparturePhase) -> CoreResult<()> {
        let mut state = self.acquire().await?;
        if let Some(departure) = state.departures.get_mut(&id) {
            departure.phase = Some(phase);
        }
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.acquire().await?.bookings.get(&id).cloned())
    }

    async fn bookings_holding_seats(&self, departure_id: Uuid) -> CoreResult<Vec<Booking>> {
        Ok(self.acquire().await?.holding_seats(departure_id))
    }

    async fn find_due_holds(
        &self,
        now: DateTime<Utc>,
        policy: &ExpiryPolicy,
    ) -> CoreResult<Vec<Booking>> {
        let state = self.acquire().await?;
        let mut due: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| policy.is_expired(b, now))
            .cloned()
            .collect();
        due.sort_by_key(|b| b.created_at);
        Ok(due)
    }

    async fn insert_payment_order(&self, order: &PaymentOrder) -> CoreResult<()> {
        let mut state = self.acquire().await?;
        if state.payment_orders.contains_key(&order.transaction_id) {
            return Err(CoreError::ConcurrencyConflict(format!(
                "duplicate transaction id {}",
                order.transaction_id
            )));
        }
        state
            .payment_orders
            .insert(order.transaction_id.clone(), order.clone());
        Ok(())
    }

    async fn get_payment_order(&self, transaction_id: &str) -> CoreResult<Option<PaymentOrder>> {
        Ok(self
            .acquire()
            .await?
            .payment_orders
            .get(transaction_id)
            .cloned())
    }

    async fn latest_payment_order(&self, booking_id: Uuid) -> CoreResult<Option<PaymentOrder>> {
        let state = self.acquire().await?;
        Ok(state
            .payment_orders
            .values()
            .filter(|o| o.booking_id == booking_id)
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn pending_payment_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> CoreResult<Vec<PaymentOrder>> {
        let state = self.acquire().await?;
        let mut orders: Vec<PaymentOrder> = state
            .payment_orders
            .values()
            .filter(|o| o.status == PaymentStatus::Pending && o.created_at <= created_before)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn record_payment_outcome(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool> {
        self.acquire()
            .await?
            .record_outcome(transaction_id, status, payload)
    }

    async fn financial_records(&self, booking_id: Uuid) -> CoreResult<Vec<FinancialRecord>> {
        let state = self.acquire().await?;
        Ok(state
            .financial_records
            .get(&booking_id)
            .cloned()
            .into_iter()
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
    offline: Arc<AtomicBool>,
}

impl MemoryTx {
    fn ensure_online(&self) -> CoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::PersistenceError("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_departure(&mut self, id: Uuid) -> CoreResult<Option<Departure>> {
        self.ensure_online()?;
        Ok(self.staged.departures.get(&id).cloned())
    }

    async fn bookings_holding_seats(&mut self, departure_id: Uuid) -> CoreResult<Vec<Booking>> {
        self.ensure_online()?;
        Ok(self.staged.holding_seats(departure_id))
    }

    async fn set_seats_remaining(&mut self, departure_id: Uuid, seats: i32) -> CoreResult<()> {
        self.ensure_online()?;
        if let Some(departure) = self.staged.departures.get_mut(&departure_id) {
            departure.seats_remaining = Some(seats);
        }
        Ok(())
    }

    async fn lock_booking(&mut self, id: Uuid) -> CoreResult<Option<Booking>> {
        self.ensure_online()?;
        Ok(self.staged.bookings.get(&id).cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> CoreResult<()> {
        self.ensure_online()?;
        if self.staged.bookings.contains_key(&booking.id) {
            return Err(CoreError::ConcurrencyConflict(format!(
                "duplicate booking id {}",
                booking.id
            )));
        }
        self.staged.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> CoreResult<()> {
        self.ensure_online()?;
        match self.staged.bookings.get_mut(&booking.id) {
            Some(existing) => {
                *existing = booking.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("booking", booking.id)),
        }
    }

    async fn financial_record(&mut self, booking_id: Uuid) -> CoreResult<Option<FinancialRecord>> {
        self.ensure_online()?;
        Ok(self.staged.financial_records.get(&booking_id).cloned())
    }

    async fn insert_financial_record(&mut self, record: &FinancialRecord) -> CoreResult<()> {
        self.ensure_online()?;
        if self.staged.financial_records.contains_key(&record.booking_id) {
            return Err(CoreError::ConcurrencyConflict(format!(
                "booking {} already has a financial record",
                record.booking_id
            )));
        }
        self.staged
            .financial_records
            .insert(record.booking_id, record.clone());
        Ok(())
    }

    async fn record_payment_outcome(
        &mut self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool> {
        self.ensure_online()?;
        self.staged.record_outcome(transaction_id, status, payload)
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.ensure_online()?;
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
