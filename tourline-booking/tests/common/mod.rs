#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use tourline_booking::{
    BookingLedger, PaymentOrchestrator, Reaper, ReservationRequest, SettlementService,
};
use tourline_core::clock::{Clock, ManualClock};
use tourline_core::payment::{
    CallbackPayload, CallbackResult, GatewayRegistry, OrderRequest, PaymentGateway,
    PaymentStatus, Provider, ProviderOrder, StatusReport,
};
use tourline_core::repository::BookingStore;
use tourline_core::{CoreError, CoreResult};
use tourline_payment::signature::sign;
use tourline_payment::{ManualGateway, ProviderHttp, ZaloPayConfig, ZaloPayGateway};
use tourline_shared::{Booking, Departure, ExpiryPolicy, PaymentOrder, SeatCount};
use tourline_store::MemoryStore;
use uuid::Uuid;

pub const ZALO_APP_ID: &str = "2553";
pub const ZALO_KEY1: &str = "PcY4iZIKFCIdgZvA6ueMcMHHUbRLYjPL";
pub const ZALO_KEY2: &str = "kLtgPl8HHhfvMuDHPwKfgfsY4Ydm9eIz";
pub const ADULT_PRICE: i64 = 1_000_000;
pub const CHILD_PRICE: i64 = 600_000;

pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 4, 1, 9, 0, 0).unwrap()
}

pub fn departure(capacity: i32) -> Departure {
    Departure {
        id: Uuid::new_v4(),
        tour_id: Uuid::new_v4(),
        start_date: NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2030, 5, 4).unwrap(),
        capacity,
        adult_price: ADULT_PRICE,
        child_price: CHILD_PRICE,
        seats_remaining: None,
        phase: None,
    }
}

/// Provider whose status answers are set by the test. Callbacks are
/// "signed" when they carry `"signature": "valid"`.
pub struct ScriptedGateway {
    status: Mutex<PaymentStatus>,
    amount: Mutex<Option<i64>>,
    created: AtomicUsize,
    queries: AtomicUsize,
    timing_out: AtomicBool,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(PaymentStatus::Pending),
            amount: Mutex::new(None),
            created: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            timing_out: AtomicBool::new(false),
        }
    }

    /// While set, every outbound call fails the way a provider timeout does.
    pub fn time_out(&self, timing_out: bool) {
        self.timing_out.store(timing_out, Ordering::SeqCst);
    }

    fn reachable(&self) -> CoreResult<()> {
        if self.timing_out.load(Ordering::SeqCst) {
            return Err(CoreError::GatewayError(
                "provider request timed out".to_string(),
            ));
        }
        Ok(())
    }

    pub fn answer(&self, status: PaymentStatus, amount: Option<i64>) {
        *self.status.lock().unwrap() = status;
        *self.amount.lock().unwrap() = amount;
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider(&self) -> Provider {
        Provider::Momo
    }

    async fn create_order(&self, request: &OrderRequest) -> CoreResult<ProviderOrder> {
        self.reachable()?;
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderOrder {
            provider: Provider::Momo,
            transaction_id: format!("scripted_{}_{}", request.booking_id.simple(), n),
            external_order_id: None,
            redirect_url: Some("https://pay.example.test/checkout".to_string()),
            qr_code: None,
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> bool {
        payload.body.get("signature").and_then(Value::as_str) == Some("valid")
    }

    fn interpret_callback(&self, payload: &CallbackPayload) -> CoreResult<CallbackResult> {
        let transaction_id = payload
            .body
            .get("orderId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::ValidationError("no orderId".to_string()))?;
        let status = match payload.body.get("resultCode").and_then(Value::as_i64) {
            Some(0) => PaymentStatus::Succeeded,
            Some(1000) => PaymentStatus::Pending,
            _ => PaymentStatus::Failed,
        };
        Ok(CallbackResult {
            transaction_id: transaction_id.to_string(),
            status,
            amount: payload.body.get("amount").and_then(Value::as_i64),
            provider_reference: None,
        })
    }

    async fn query_status(&self, transaction_id: &str) -> CoreResult<StatusReport> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.reachable()?;
        let status = *self.status.lock().unwrap();
        let amount = *self.amount.lock().unwrap();
        Ok(StatusReport {
            transaction_id: transaction_id.to_string(),
            status,
            amount,
            provider_reference: None,
            raw: json!({ "orderId": transaction_id, "status": status.as_str() }),
        })
    }
}

pub fn zalopay_gateway() -> ZaloPayGateway {
    let config = ZaloPayConfig {
        app_id: ZALO_APP_ID.to_string(),
        key1: ZALO_KEY1.into(),
        key2: ZALO_KEY2.into(),
        create_endpoint: "http://127.0.0.1:9/v2/create".to_string(),
        query_endpoint: "http://127.0.0.1:9/v2/query".to_string(),
        callback_url: "https://tourline.example.test/v1/webhooks/zalopay".to_string(),
        redirect_url: "https://tourline.example.test/done".to_string(),
    };
    ZaloPayGateway::new(config, ProviderHttp::new(StdDuration::from_secs(1)).unwrap())
}

/// A ZaloPay callback body signed with key2.
pub fn zalopay_callback(transaction_id: &str, amount: i64) -> Value {
    let data = json!({
        "app_id": 2553,
        "app_trans_id": transaction_id,
        "app_time": 1_900_000_000_000i64,
        "amount": amount,
        "zp_trans_id": 250401000123i64,
    })
    .to_string();
    let mac = sign(ZALO_KEY2, &data).unwrap();
    json!({ "data": data, "mac": mac, "type": 1 })
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<BookingLedger>,
    pub settlement: Arc<SettlementService>,
    pub orchestrator: PaymentOrchestrator,
    pub reaper: Reaper,
    pub scripted: Arc<ScriptedGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let clock = Arc::new(ManualClock::new(start_instant()));
        let shared: Arc<dyn BookingStore> = Arc::new(store.clone());
        let ledger = Arc::new(BookingLedger::new(
            shared,
            clock.clone() as Arc<dyn Clock>,
            ExpiryPolicy::from_seconds(600),
        ));

        let scripted = Arc::new(ScriptedGateway::new());
        let gateways = GatewayRegistry::new()
            .with(Arc::new(zalopay_gateway()))
            .with(scripted.clone())
            .with(Arc::new(ManualGateway::new()));

        let settlement = Arc::new(SettlementService::new(ledger.clone(), gateways));
        let orchestrator = PaymentOrchestrator::new(settlement.clone())
            .with_reconcile_min_age(Duration::zero());
        let reaper = Reaper::new(ledger.clone());

        Self {
            store,
            clock,
            ledger,
            settlement,
            orchestrator,
            reaper,
            scripted,
        }
    }

    pub async fn departure(&self, capacity: i32) -> Departure {
        let departure = departure(capacity);
        self.store.seed_departure(departure.clone()).await;
        departure
    }

    pub async fn reserve(&self, departure_id: Uuid, adults: i32, children: i32) -> CoreResult<Booking> {
        self.ledger
            .reserve(&ReservationRequest {
                customer_id: "customer-1".to_string(),
                departure_id,
                seats: SeatCount::new(adults, children),
            })
            .await
    }

    pub async fn available(&self, departure_id: Uuid) -> i32 {
        self.ledger.inventory().available(departure_id).await.unwrap()
    }

    /// Records a provider attempt as if `initiate` had created it.
    pub async fn seed_order(&self, booking: &Booking, provider: Provider, transaction_id: &str) {
        let now = self.clock.now();
        self.store
            .seed_payment_order(PaymentOrder {
                transaction_id: transaction_id.to_string(),
                provider,
                external_order_id: None,
                booking_id: booking.id,
                amount: booking.total_amount,
                redirect_url: None,
                qr_code: None,
                status: PaymentStatus::Pending,
                raw_payload: None,
                created_at: now,
                updated_at: now,
            })
            .await;
    }

    pub async fn records(&self, booking_id: Uuid) -> usize {
        self.store.financial_records(booking_id).await.unwrap().len()
    }
}
