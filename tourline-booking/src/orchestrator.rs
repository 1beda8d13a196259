use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use tourline_core::clock::Clock;
use tourline_core::payment::{
    CallbackPayload, GatewayRegistry, OrderRequest, PaymentEvidence, PaymentStatus, Provider,
};
use tourline_core::repository::BookingStore;
use tourline_core::{CoreError, CoreResult};
use tourline_shared::{BookingStatus, PaymentOrder};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settlement::{SettlementOutcome, SettlementService};

/// What became of an inbound provider callback. Callbacks are always
/// acknowledged; this only drives logging and the acknowledgement body.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackDisposition {
    Settled(SettlementOutcome),
    SignatureRejected,
    /// Verified, but could not be applied (unknown order, unpayable booking,
    /// store trouble). Needs manual reconciliation.
    Unprocessed(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub settled: usize,
    pub declined: usize,
    pub pending: usize,
    pub failures: usize,
}

/// Entry point for payment attempts: creates provider orders, routes
/// callbacks, and polls providers for results that never arrived.
pub struct PaymentOrchestrator {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    gateways: GatewayRegistry,
    settlement: Arc<SettlementService>,
    reconcile_on_invalid_signature: bool,
    reconcile_min_age: Duration,
}

impl PaymentOrchestrator {
    pub fn new(settlement: Arc<SettlementService>) -> Self {
        let ledger = settlement.ledger();
        Self {
            store: ledger.store().clone(),
            clock: ledger.clock().clone(),
            gateways: settlement.gateways().clone(),
            settlement,
            reconcile_on_invalid_signature: false,
            reconcile_min_age: Duration::seconds(60),
        }
    }

    /// Query the provider when a callback fails verification instead of
    /// dropping it outright. The push itself is never trusted.
    pub fn with_reconcile_on_invalid_signature(mut self, enabled: bool) -> Self {
        self.reconcile_on_invalid_signature = enabled;
        self
    }

    /// Attempts younger than this are left to their callback.
    pub fn with_reconcile_min_age(mut self, min_age: Duration) -> Self {
        self.reconcile_min_age = min_age;
        self
    }

    pub fn settlement(&self) -> &Arc<SettlementService> {
        &self.settlement
    }

    /// Opens a provider order for a Pending booking and records the attempt.
    pub async fn initiate(&self, booking_id: Uuid, provider: Provider) -> CoreResult<PaymentOrder> {
        let ledger = self.settlement.ledger();
        let booking = ledger.get(booking_id).await?;
        let now = self.clock.now();

        if booking.status != BookingStatus::Pending {
            return Err(CoreError::not_payable(
                booking_id,
                format!("booking is {}", booking.status),
            ));
        }
        if ledger.policy().is_expired(&booking, now) {
            return Err(CoreError::not_payable(booking_id, "reservation window elapsed"));
        }

        if provider.is_synchronous() {
            return Err(CoreError::ValidationError(format!(
                "{} payments are confirmed by staff, not through a provider order",
                provider
            )));
        }

        let gateway = self.gateways.get(provider)?;
        let request = OrderRequest {
            booking_id,
            amount: booking.total_amount,
            payer_id: booking.customer_id.clone(),
            description: format!("Tour booking {}", booking_id),
        };
        let created = gateway.create_order(&request).await?;

        let order = PaymentOrder {
            transaction_id: created.transaction_id,
            provider,
            external_order_id: created.external_order_id,
            booking_id,
            amount: booking.total_amount,
            redirect_url: created.redirect_url,
            qr_code: created.qr_code,
            status: PaymentStatus::Pending,
            raw_payload: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment_order(&order).await?;

        info!(
            %booking_id,
            transaction_id = %order.transaction_id,
            %provider,
            amount = order.amount,
            "Payment order created"
        );
        Ok(order)
    }

    /// Routes a provider push to settlement. Never fails: the provider gets
    /// its acknowledgement whatever happens here.
    pub async fn handle_callback(&self, provider: Provider, body: Value) -> CallbackDisposition {
        let payload = CallbackPayload::new(provider, body);

        let gateway = match self.gateways.get(provider) {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(%provider, error = %e, "Callback for unconfigured provider");
                return CallbackDisposition::Unprocessed(e.to_string());
            }
        };

        if !gateway.verify_callback(&payload) {
            warn!(%provider, "Callback rejected: signature mismatch");
            if self.reconcile_on_invalid_signature {
                self.reconcile_referenced(provider, &payload).await;
            }
            return CallbackDisposition::SignatureRejected;
        }

        let result = match gateway.interpret_callback(&payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(%provider, error = %e, "Verified callback could not be read");
                return CallbackDisposition::Unprocessed(e.to_string());
            }
        };

        let order = match self.store.get_payment_order(&result.transaction_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(%provider, transaction_id = %result.transaction_id, "Callback for unknown payment order");
                return CallbackDisposition::Unprocessed(format!(
                    "unknown transaction {}",
                    result.transaction_id
                ));
            }
            Err(e) => {
                warn!(%provider, error = %e, "Payment order lookup failed");
                return CallbackDisposition::Unprocessed(e.to_string());
            }
        };

        match self
            .settlement
            .confirm(order.booking_id, provider, &PaymentEvidence::Callback(payload))
            .await
        {
            Ok(outcome) => CallbackDisposition::Settled(outcome),
            Err(CoreError::SignatureInvalid(_)) => CallbackDisposition::SignatureRejected,
            Err(e) => {
                warn!(
                    booking_id = %order.booking_id,
                    transaction_id = %order.transaction_id,
                    error = %e,
                    "Callback not applied, manual reconciliation needed"
                );
                CallbackDisposition::Unprocessed(e.to_string())
            }
        }
    }

    /// Best effort: a tampered push still names a transaction we can ask
    /// the provider about through our own signed query.
    async fn reconcile_referenced(&self, provider: Provider, payload: &CallbackPayload) {
        let Some(transaction_id) = referenced_transaction(provider, &payload.body) else {
            return;
        };
        match self.store.get_payment_order(&transaction_id).await {
            Ok(Some(order)) if order.status == PaymentStatus::Pending => {
                if let Err(e) = self.reconcile_order(&order).await {
                    warn!(%transaction_id, error = %e, "Status query after rejected callback failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%transaction_id, error = %e, "Payment order lookup failed"),
        }
    }

    /// User-triggered "did my payment go through?" for the latest attempt.
    pub async fn check_status(&self, booking_id: Uuid) -> CoreResult<SettlementOutcome> {
        let booking = self.settlement.ledger().get(booking_id).await?;
        let order = self
            .store
            .latest_payment_order(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("payment order for booking", booking_id))?;

        if booking.status == BookingStatus::Paid {
            return Ok(SettlementOutcome::AlreadySettled { booking });
        }
        self.reconcile_order(&order).await
    }

    /// Asks the provider for the result of one attempt and settles on it.
    pub async fn reconcile_order(&self, order: &PaymentOrder) -> CoreResult<SettlementOutcome> {
        if order.provider.is_synchronous() {
            return Err(CoreError::ValidationError(format!(
                "{} payments have no provider status to query",
                order.provider
            )));
        }
        let gateway = self.gateways.get(order.provider)?;
        let report = gateway.query_status(&order.transaction_id).await?;
        debug!(
            transaction_id = %order.transaction_id,
            status = %report.status,
            "Provider status received"
        );

        self.settlement
            .confirm(order.booking_id, order.provider, &PaymentEvidence::StatusQuery(report))
            .await
    }

    /// One reconciler pass over attempts that never heard back.
    pub async fn reconcile_pending(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let cutoff = self.clock.now() - self.reconcile_min_age;

        let orders = match self.store.pending_payment_orders(cutoff).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "Could not list pending payment orders");
                return report;
            }
        };

        for order in orders {
            if order.provider.is_synchronous() {
                continue;
            }
            match self.store.get_booking(order.booking_id).await {
                Ok(Some(booking)) if booking.status == BookingStatus::Pending => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(transaction_id = %order.transaction_id, error = %e, "Booking lookup failed");
                    report.failures += 1;
                    continue;
                }
            }

            report.examined += 1;
            match self.reconcile_order(&order).await {
                Ok(SettlementOutcome::Settled { .. }) | Ok(SettlementOutcome::AlreadySettled { .. }) => {
                    report.settled += 1
                }
                Ok(SettlementOutcome::Declined { .. }) => report.declined += 1,
                Ok(SettlementOutcome::AwaitingProvider { .. }) => report.pending += 1,
                Err(e) => {
                    warn!(
                        transaction_id = %order.transaction_id,
                        booking_id = %order.booking_id,
                        error = %e,
                        "Reconciliation failed"
                    );
                    report.failures += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                settled = report.settled,
                declined = report.declined,
                pending = report.pending,
                failures = report.failures,
                "Reconciliation cycle finished"
            );
        }
        report
    }

    /// "I paid" for a booking. Cash and bank transfers are confirmed on the
    /// spot; a provider method is answered by querying that provider.
    pub async fn confirm_manual(&self, booking_id: Uuid, method: &str) -> CoreResult<SettlementOutcome> {
        let provider: Provider = method
            .parse()
            .map_err(|e| CoreError::ValidationError(format!("{}", e)))?;
        if !provider.is_synchronous() {
            debug!(%booking_id, %provider, "Confirmation answered by a status query");
            return self.check_status(booking_id).await;
        }

        self.settlement
            .confirm(
                booking_id,
                provider,
                &PaymentEvidence::Synthetic {
                    method: method.to_string(),
                },
            )
            .await
    }
}

/// Transaction id named in a callback body, without trusting anything else.
fn referenced_transaction(provider: Provider, body: &Value) -> Option<String> {
    match provider {
        Provider::ZaloPay => {
            let data = body.get("data")?.as_str()?;
            let parsed: Value = serde_json::from_str(data).ok()?;
            parsed.get("app_trans_id")?.as_str().map(str::to_string)
        }
        Provider::Momo => body.get("orderId")?.as_str().map(str::to_string),
        Provider::Manual => None,
    }
}
