use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tourline_core::repository::{BookingStore, StoreTx};
use tourline_core::{CoreError, CoreResult};
use tourline_shared::models::UnknownVariant;
use tourline_shared::{
    Booking, Departure, DeparturePhase, ExpiryPolicy, FinancialRecord, PaymentOrder,
    PaymentStatus,
};
use uuid::Uuid;

use crate::database::db_error;

const DEPARTURE_COLUMNS: &str =
    "id, tour_id, start_date, end_date, capacity, adult_price, child_price, seats_remaining, phase";

const BOOKING_COLUMNS: &str = "id, customer_id, departure_id, adults, children, total_amount, \
     status, payment_method, created_at, expires_at, paid_at, updated_at";

const PAYMENT_ORDER_COLUMNS: &str = "transaction_id, provider, external_order_id, booking_id, \
     amount, redirect_url, qr_code, status, raw_payload, created_at, updated_at";

const FINANCIAL_RECORD_COLUMNS: &str =
    "id, booking_id, amount, method, transaction_ref, outcome, recorded_at";

fn corrupt(e: UnknownVariant) -> CoreError {
    CoreError::PersistenceError(e.to_string())
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct DepartureRow {
    id: Uuid,
    tour_id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
    capacity: i32,
    adult_price: i64,
    child_price: i64,
    seats_remaining: Option<i32>,
    phase: Option<String>,
}

impl TryFrom<DepartureRow> for Departure {
    type Error = CoreError;

    fn try_from(row: DepartureRow) -> CoreResult<Self> {
        let phase = row
            .phase
            .as_deref()
            .map(str::parse::<DeparturePhase>)
            .transpose()
            .map_err(corrupt)?;

        Ok(Departure {
            id: row.id,
            tour_id: row.tour_id,
            start_date: row.start_date,
            end_date: row.end_date,
            capacity: row.capacity,
            adult_price: row.adult_price,
            child_price: row.child_price,
            seats_remaining: row.seats_remaining,
            phase,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    customer_id: String,
    departure_id: Uuid,
    adults: i32,
    children: i32,
    total_amount: i64,
    status: String,
    payment_method: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> CoreResult<Self> {
        Ok(Booking {
            id: row.id,
            customer_id: row.customer_id,
            departure_id: row.departure_id,
            adults: row.adults,
            children: row.children,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(corrupt)?,
            payment_method: row.payment_method,
            created_at: row.created_at,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentOrderRow {
    transaction_id: String,
    provider: String,
    external_order_id: Option<String>,
    booking_id: Uuid,
    amount: i64,
    redirect_url: Option<String>,
    qr_code: Option<String>,
    status: String,
    raw_payload: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentOrderRow> for PaymentOrder {
    type Error = CoreError;

    fn try_from(row: PaymentOrderRow) -> CoreResult<Self> {
        Ok(PaymentOrder {
            transaction_id: row.transaction_id,
            provider: row.provider.parse().map_err(corrupt)?,
            external_order_id: row.external_order_id,
            booking_id: row.booking_id,
            amount: row.amount,
            redirect_url: row.redirect_url,
            qr_code: row.qr_code,
            status: row.status.parse().map_err(corrupt)?,
            raw_payload: row.raw_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FinancialRecordRow {
    id: Uuid,
    booking_id: Uuid,
    amount: i64,
    method: String,
    transaction_ref: Option<String>,
    outcome: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<FinancialRecordRow> for FinancialRecord {
    type Error = CoreError;

    fn try_from(row: FinancialRecordRow) -> CoreResult<Self> {
        Ok(FinancialRecord {
            id: row.id,
            booking_id: row.booking_id,
            amount: row.amount,
            method: row.method,
            transaction_ref: row.transaction_ref,
            outcome: row.outcome.parse().map_err(corrupt)?,
            recorded_at: row.recorded_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = CoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// PostgreSQL implementation of the booking store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: Self::DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    /// A transaction waiting longer than this for a row lock fails with a
    /// concurrency conflict instead of queueing indefinitely.
    pub fn with_lock_timeout_ms(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        // SET does not take bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_departure(&self, id: Uuid) -> CoreResult<Option<Departure>> {
        let row = sqlx::query_as::<_, DepartureRow>(&format!(
            "SELECT {} FROM departures WHERE id = $1",
            DEPARTURE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Departure::try_from).transpose()
    }

    async fn list_departures(&self) -> CoreResult<Vec<Departure>> {
        let rows = sqlx::query_as::<_, DepartureRow>(&format!(
            "SELECT {} FROM departures ORDER BY start_date",
            DEPARTURE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        convert_all(rows)
    }

    async fn set_departure_phase(&self, id: Uuid, phase: DeparturePhase) -> CoreResult<()> {
        sqlx::query("UPDATE departures SET phase = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(phase.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Booking::try_from).transpose()
    }

    async fn bookings_holding_seats(&self, departure_id: Uuid) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE departure_id = $1 AND status IN ('PAID', 'PENDING')",
            BOOKING_COLUMNS
        ))
        .bind(departure_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        convert_all(rows)
    }

    async fn find_due_holds(
        &self,
        now: DateTime<Utc>,
        policy: &ExpiryPolicy,
    ) -> CoreResult<Vec<Booking>> {
        let window_seconds = policy.reservation_window().num_seconds() as f64;
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings \
             WHERE status = 'PENDING' \
               AND COALESCE(expires_at, created_at + make_interval(secs => $2)) <= $1 \
             ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(now)
        .bind(window_seconds)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let bookings: Vec<Booking> = convert_all(rows)?;
        Ok(bookings
            .into_iter()
            .filter(|b| policy.is_expired(b, now))
            .collect())
    }

    async fn insert_payment_order(&self, order: &PaymentOrder) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_orders (transaction_id, provider, external_order_id, booking_id, amount, redirect_url, qr_code, status, raw_payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&order.transaction_id)
        .bind(order.provider.as_str())
        .bind(&order.external_order_id)
        .bind(order.booking_id)
        .bind(order.amount)
        .bind(&order.redirect_url)
        .bind(&order.qr_code)
        .bind(order.status.as_str())
        .bind(&order.raw_payload)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_payment_order(&self, transaction_id: &str) -> CoreResult<Option<PaymentOrder>> {
        let row = sqlx::query_as::<_, PaymentOrderRow>(&format!(
            "SELECT {} FROM payment_orders WHERE transaction_id = $1",
            PAYMENT_ORDER_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(PaymentOrder::try_from).transpose()
    }

    async fn latest_payment_order(&self, booking_id: Uuid) -> CoreResult<Option<PaymentOrder>> {
        let row = sqlx::query_as::<_, PaymentOrderRow>(&format!(
            "SELECT {} FROM payment_orders WHERE booking_id = $1 ORDER BY created_at DESC LIMIT 1",
            PAYMENT_ORDER_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(PaymentOrder::try_from).transpose()
    }

    async fn pending_payment_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> CoreResult<Vec<PaymentOrder>> {
        let rows = sqlx::query_as::<_, PaymentOrderRow>(&format!(
            "SELECT {} FROM payment_orders WHERE status = 'PENDING' AND created_at <= $1 ORDER BY created_at",
            PAYMENT_ORDER_COLUMNS
        ))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        convert_all(rows)
    }

    async fn record_payment_outcome(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        record_outcome(&mut conn, transaction_id, status, payload).await
    }

    async fn financial_records(&self, booking_id: Uuid) -> CoreResult<Vec<FinancialRecord>> {
        let rows = sqlx::query_as::<_, FinancialRecordRow>(&format!(
            "SELECT {} FROM financial_records WHERE booking_id = $1 ORDER BY recorded_at",
            FINANCIAL_RECORD_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        convert_all(rows)
    }
}

async fn record_outcome(
    conn: &mut sqlx::PgConnection,
    transaction_id: &str,
    status: PaymentStatus,
    payload: &Value,
) -> CoreResult<bool> {
    let result = sqlx::query(
        "UPDATE payment_orders SET status = $2, raw_payload = $3, updated_at = NOW() \
         WHERE transaction_id = $1 AND status = 'PENDING'",
    )
    .bind(transaction_id)
    .bind(status.as_str())
    .bind(payload)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }

    let exists: Option<(String,)> =
        sqlx::query_as("SELECT transaction_id FROM payment_orders WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;

    match exists {
        Some(_) => Ok(false),
        None => Err(CoreError::not_found("payment order", transaction_id)),
    }
}

/// One PostgreSQL transaction. Dropping it rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_departure(&mut self, id: Uuid) -> CoreResult<Option<Departure>> {
        let row = sqlx::query_as::<_, DepartureRow>(&format!(
            "SELECT {} FROM departures WHERE id = $1 FOR UPDATE",
            DEPARTURE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.map(Departure::try_from).transpose()
    }

    async fn bookings_holding_seats(&mut self, departure_id: Uuid) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE departure_id = $1 AND status IN ('PAID', 'PENDING')",
            BOOKING_COLUMNS
        ))
        .bind(departure_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        convert_all(rows)
    }

    async fn set_seats_remaining(&mut self, departure_id: Uuid, seats: i32) -> CoreResult<()> {
        sqlx::query("UPDATE departures SET seats_remaining = $2, updated_at = NOW() WHERE id = $1")
            .bind(departure_id)
            .bind(seats)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn lock_booking(&mut self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.map(Booking::try_from).transpose()
    }

    async fn insert_booking(&mut self, booking: &Booking) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, customer_id, departure_id, adults, children, total_amount, status, payment_method, created_at, expires_at, paid_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.customer_id)
        .bind(booking.departure_id)
        .bind(booking.adults)
        .bind(booking.children)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(&booking.payment_method)
        .bind(booking.created_at)
        .bind(booking.expires_at)
        .bind(booking.paid_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, payment_method = $3, expires_at = $4, paid_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(&booking.payment_method)
        .bind(booking.expires_at)
        .bind(booking.paid_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("booking", booking.id));
        }
        Ok(())
    }

    async fn financial_record(&mut self, booking_id: Uuid) -> CoreResult<Option<FinancialRecord>> {
        let row = sqlx::query_as::<_, FinancialRecordRow>(&format!(
            "SELECT {} FROM financial_records WHERE booking_id = $1",
            FINANCIAL_RECORD_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.map(FinancialRecord::try_from).transpose()
    }

    async fn insert_financial_record(&mut self, record: &FinancialRecord) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO financial_records (id, booking_id, amount, method, transaction_ref, outcome, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.booking_id)
        .bind(record.amount)
        .bind(&record.method)
        .bind(&record.transaction_ref)
        .bind(record.outcome.as_str())
        .bind(record.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn record_payment_outcome(
        &mut self,
        transaction_id: &str,
        status: PaymentStatus,
        payload: &Value,
    ) -> CoreResult<bool> {
        record_outcome(&mut self.tx, transaction_id, status, payload).await
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await.map_err(db_error)
    }
}
