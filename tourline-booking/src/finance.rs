use chrono::{DateTime, Utc};
use tourline_shared::{Booking, FinancialRecord, PaymentStatus};
use uuid::Uuid;

/// Builds the invoice/checkout rows written alongside settlement.
#[derive(Debug, Default, Clone, Copy)]
pub struct FinancialManager;

impl FinancialManager {
    pub fn new() -> Self {
        Self
    }

    /// The single record a settled booking gets. The amount is the booking
    /// total, never the provider-reported figure.
    pub fn settlement_record(
        &self,
        booking: &Booking,
        method: &str,
        transaction_ref: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> FinancialRecord {
        FinancialRecord {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            amount: booking.total_amount,
            method: method.to_string(),
            transaction_ref,
            outcome: PaymentStatus::Succeeded,
            recorded_at,
        }
    }
}
