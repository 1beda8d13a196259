use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tourline_core::payment::{GatewayRegistry, PaymentEvidence, PaymentStatus, Provider};
use tourline_core::{retry_on_conflict, CoreError, CoreResult};
use tourline_shared::{Booking, BookingStatus, FinancialRecord};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::finance::FinancialManager;
use crate::ledger::{apply_transition, mark_expired, BookingLedger};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    /// This call moved the booking to Paid.
    Settled {
        booking: Booking,
        record: FinancialRecord,
    },
    /// A replay of the payment that already settled the booking.
    AlreadySettled { booking: Booking },
    /// The provider reports a failed payment; the hold is untouched.
    Declined {
        booking_id: Uuid,
        transaction_id: Option<String>,
    },
    /// The provider has no final answer yet.
    AwaitingProvider {
        booking_id: Uuid,
        transaction_id: Option<String>,
    },
}

/// Evidence reduced to what settlement needs, after it was checked.
#[derive(Debug, Clone)]
struct VerifiedPayment {
    transaction_id: Option<String>,
    status: PaymentStatus,
    amount: Option<i64>,
    method: String,
    payload: Value,
}

enum SettleStep {
    Settled(Booking, FinancialRecord),
    AlreadySettled(Booking),
    /// The hold was found past its deadline and expired here.
    ExpiredHere(Booking),
}

/// Turns verified payment evidence into exactly one Pending to Paid
/// transition and exactly one financial record.
pub struct SettlementService {
    ledger: Arc<BookingLedger>,
    gateways: GatewayRegistry,
    finance: FinancialManager,
}

impl SettlementService {
    pub fn new(ledger: Arc<BookingLedger>, gateways: GatewayRegistry) -> Self {
        Self {
            ledger,
            gateways,
            finance: FinancialManager::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<BookingLedger> {
        &self.ledger
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub async fn confirm(
        &self,
        booking_id: Uuid,
        provider: Provider,
        evidence: &PaymentEvidence,
    ) -> CoreResult<SettlementOutcome> {
        let verified = self.verify(booking_id, provider, evidence).await?;

        if verified.status != PaymentStatus::Succeeded {
            return self.record_unsuccessful(booking_id, verified).await;
        }

        let step = retry_on_conflict("confirm", || self.try_settle(booking_id, &verified)).await;

        match step {
            Ok(SettleStep::Settled(booking, record)) => {
                info!(
                    %booking_id,
                    method = %verified.method,
                    amount = booking.total_amount,
                    "Booking settled"
                );
                self.ledger.refresh_quietly(booking.departure_id).await;
                Ok(SettlementOutcome::Settled { booking, record })
            }
            Ok(SettleStep::AlreadySettled(booking)) => {
                info!(%booking_id, "Settlement replay ignored");
                Ok(SettlementOutcome::AlreadySettled { booking })
            }
            Ok(SettleStep::ExpiredHere(booking)) => {
                self.ledger.refresh_quietly(booking.departure_id).await;
                let err = CoreError::not_payable(booking_id, "reservation window elapsed");
                self.flag_unapplied_payment(booking_id, &verified, &err).await;
                Err(err)
            }
            Err(err @ CoreError::BookingNotPayable { .. }) => {
                self.flag_unapplied_payment(booking_id, &verified, &err).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn verify(
        &self,
        booking_id: Uuid,
        provider: Provider,
        evidence: &PaymentEvidence,
    ) -> CoreResult<VerifiedPayment> {
        match evidence {
            PaymentEvidence::Callback(payload) => {
                if payload.provider != provider {
                    return Err(CoreError::ValidationError(format!(
                        "{} callback presented as {}",
                        payload.provider, provider
                    )));
                }
                let gateway = self.gateways.get(provider)?;
                if !gateway.verify_callback(payload) {
                    return Err(CoreError::SignatureInvalid(format!(
                        "{} callback failed verification",
                        provider
                    )));
                }
                let result = gateway.interpret_callback(payload)?;
                self.ensure_attempt_belongs(booking_id, &result.transaction_id)
                    .await?;

                Ok(VerifiedPayment {
                    transaction_id: Some(result.transaction_id),
                    status: result.status,
                    amount: result.amount,
                    method: provider.as_str().to_string(),
                    payload: payload.body.clone(),
                })
            }
            PaymentEvidence::StatusQuery(report) => {
                self.ensure_attempt_belongs(booking_id, &report.transaction_id)
                    .await?;

                Ok(VerifiedPayment {
                    transaction_id: Some(report.transaction_id.clone()),
                    status: report.status,
                    amount: report.amount,
                    method: provider.as_str().to_string(),
                    payload: report.raw.clone(),
                })
            }
            PaymentEvidence::Synthetic { method } => {
                if !provider.is_synchronous() {
                    return Err(CoreError::ValidationError(format!(
                        "{} payments are confirmed by the provider, not the caller",
                        provider
                    )));
                }
                let method = method.trim().to_ascii_uppercase();
                Ok(VerifiedPayment {
                    transaction_id: None,
                    status: PaymentStatus::Succeeded,
                    amount: None,
                    payload: json!({ "method": method }),
                    method,
                })
            }
        }
    }

    /// A provider payment must belong to a payment order we created for
    /// this booking.
    async fn ensure_attempt_belongs(&self, booking_id: Uuid, transaction_id: &str) -> CoreResult<()> {
        let order = self
            .ledger
            .store()
            .get_payment_order(transaction_id)
            .await?
            .ok_or_else(|| CoreError::not_found("payment order", transaction_id))?;

        if order.booking_id != booking_id {
            return Err(CoreError::ValidationError(format!(
                "transaction {} belongs to booking {}, not {}",
                transaction_id, order.booking_id, booking_id
            )));
        }
        Ok(())
    }

    async fn record_unsuccessful(
        &self,
        booking_id: Uuid,
        verified: VerifiedPayment,
    ) -> CoreResult<SettlementOutcome> {
        let booking = self.ledger.get(booking_id).await?;

        if let Some(transaction_id) = &verified.transaction_id {
            self.ledger
                .store()
                .record_payment_outcome(transaction_id, verified.status, &verified.payload)
                .await?;
        }

        if booking.status != BookingStatus::Pending {
            return Err(CoreError::not_payable(
                booking_id,
                format!("booking is {}", booking.status),
            ));
        }

        if verified.status == PaymentStatus::Failed {
            info!(%booking_id, transaction_id = ?verified.transaction_id, "Payment declined by provider");
            Ok(SettlementOutcome::Declined {
                booking_id,
                transaction_id: verified.transaction_id,
            })
        } else {
            Ok(SettlementOutcome::AwaitingProvider {
                booking_id,
                transaction_id: verified.transaction_id,
            })
        }
    }

    async fn try_settle(&self, booking_id: Uuid, verified: &VerifiedPayment) -> CoreResult<SettleStep> {
        let now = self.ledger.clock().now();
        let mut tx = self.ledger.store().begin().await?;
        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", booking_id))?;

        match booking.status {
            BookingStatus::Paid => {
                let record = tx.financial_record(booking_id).await?;
                let settled_ref = record.and_then(|r| r.transaction_ref);
                if settled_ref == verified.transaction_id {
                    return Ok(SettleStep::AlreadySettled(booking));
                }
                return Err(CoreError::not_payable(
                    booking_id,
                    "already paid through another transaction",
                ));
            }
            BookingStatus::Expired | BookingStatus::Cancelled => {
                return Err(CoreError::not_payable(
                    booking_id,
                    format!("booking is {}", booking.status),
                ));
            }
            BookingStatus::Pending => {}
        }

        if self.ledger.policy().is_expired(&booking, now) {
            mark_expired(&mut booking, now)?;
            tx.update_booking(&booking).await?;
            tx.commit().await?;
            return Ok(SettleStep::ExpiredHere(booking));
        }

        if let Some(amount) = verified.amount {
            if amount != booking.total_amount {
                return Err(CoreError::not_payable(
                    booking_id,
                    format!(
                        "paid amount {} does not match booking total {}",
                        amount, booking.total_amount
                    ),
                ));
            }
        }

        apply_transition(&mut booking, BookingStatus::Paid, now)?;
        booking.payment_method = Some(verified.method.clone());
        booking.paid_at = Some(now);
        tx.update_booking(&booking).await?;

        let record = self.finance.settlement_record(
            &booking,
            &verified.method,
            verified.transaction_id.clone(),
            now,
        );
        tx.insert_financial_record(&record).await?;

        if let Some(transaction_id) = &verified.transaction_id {
            tx.record_payment_outcome(transaction_id, PaymentStatus::Succeeded, &verified.payload)
                .await?;
        }

        tx.commit().await?;
        Ok(SettleStep::Settled(booking, record))
    }

    /// Money arrived for a booking that can no longer take it. The attempt
    /// is closed so reconciliation stops polling it, and the event is logged
    /// loudly for a manual refund.
    async fn flag_unapplied_payment(
        &self,
        booking_id: Uuid,
        verified: &VerifiedPayment,
        reason: &CoreError,
    ) {
        let Some(transaction_id) = &verified.transaction_id else {
            warn!(%booking_id, error = %reason, "Synthetic confirmation rejected");
            return;
        };

        error!(
            %booking_id,
            %transaction_id,
            error = %reason,
            "Provider reports payment for unpayable booking, refund required"
        );
        if let Err(e) = self
            .ledger
            .store()
            .record_payment_outcome(transaction_id, PaymentStatus::Succeeded, &verified.payload)
            .await
        {
            warn!(%transaction_id, error = %e, "Could not record payment outcome");
        }
    }
}
