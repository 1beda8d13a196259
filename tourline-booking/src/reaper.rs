use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::ledger::BookingLedger;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub examined: usize,
    pub expired: usize,
    pub seats_released: i32,
    pub departures_refreshed: usize,
    pub failures: usize,
}

/// Expires Pending holds whose reservation window has run out.
pub struct Reaper {
    ledger: Arc<BookingLedger>,
}

impl Reaper {
    pub fn new(ledger: Arc<BookingLedger>) -> Self {
        Self { ledger }
    }

    /// One pass. Each hold expires in its own transaction, so one failure
    /// never undoes another; a failed listing is an empty pass.
    pub async fn run_cycle(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let now = self.ledger.clock().now();

        let due = match self
            .ledger
            .store()
            .find_due_holds(now, self.ledger.policy())
            .await
        {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Could not list due holds, retrying next tick");
                return report;
            }
        };

        let mut touched = BTreeSet::new();
        for booking in due {
            report.examined += 1;
            match self.ledger.expire_hold(booking.id).await {
                Ok(Some(departure_id)) => {
                    report.expired += 1;
                    report.seats_released = report.seats_released.saturating_add(booking.seats());
                    touched.insert(departure_id);
                }
                // Paid, cancelled or extended since the listing.
                Ok(None) => {}
                Err(e) => {
                    warn!(booking_id = %booking.id, error = %e, "Hold expiry failed");
                    report.failures += 1;
                }
            }
        }

        for departure_id in touched {
            match self.ledger.inventory().refresh(departure_id).await {
                Ok(_) => report.departures_refreshed += 1,
                Err(e) => warn!(%departure_id, error = %e, "Seats remaining refresh failed"),
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                expired = report.expired,
                seats_released = report.seats_released,
                failures = report.failures,
                "Reaper cycle finished"
            );
        }
        report
    }
}
