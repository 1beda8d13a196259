use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use tourline_core::clock::Clock;
use tourline_core::repository::BookingStore;
use tourline_core::{CoreError, CoreResult};
use tourline_shared::DeparturePhase;
use tracing::{info, warn};
use uuid::Uuid;

use crate::inventory::InventoryCalculator;

/// Lifecycle label of a departure on `today`.
///
/// Past the end date it is completed. From the start date through the end
/// date it is in progress, whatever its capacity. Before that it is upcoming,
/// full when no seat is left.
pub fn project_phase(
    today: NaiveDate,
    start_date: NaiveDate,
    end_date: NaiveDate,
    available: i32,
) -> DeparturePhase {
    if today > end_date {
        DeparturePhase::Completed
    } else if today >= start_date {
        DeparturePhase::InProgress
    } else if available <= 0 {
        DeparturePhase::UpcomingFull
    } else {
        DeparturePhase::UpcomingOpen
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseReport {
    pub examined: usize,
    pub updated: usize,
    pub failures: usize,
}

/// Periodically rewrites the cached phase label of every departure.
pub struct PhaseRefresher {
    store: Arc<dyn BookingStore>,
    inventory: Arc<InventoryCalculator>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl PhaseRefresher {
    pub fn new(
        store: Arc<dyn BookingStore>,
        inventory: Arc<InventoryCalculator>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            inventory,
            clock,
            offset,
        }
    }

    /// One refresh pass. A store outage skips the pass with an empty report.
    pub async fn run_cycle(&self) -> PhaseReport {
        let departures = match self.store.list_departures().await {
            Ok(departures) => departures,
            Err(e) => {
                warn!(error = %e, "Phase refresh skipped, store unavailable");
                return PhaseReport::default();
            }
        };

        let today = self.clock.today(self.offset);
        let mut report = PhaseReport::default();

        for departure in departures {
            report.examined += 1;

            let available = if today < departure.start_date {
                match self.inventory.available_for(&departure).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(departure_id = %departure.id, error = %e, "Could not compute availability");
                        report.failures += 1;
                        continue;
                    }
                }
            } else {
                0
            };

            let phase = project_phase(today, departure.start_date, departure.end_date, available);
            if departure.phase == Some(phase) {
                continue;
            }

            match self.store.set_departure_phase(departure.id, phase).await {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(departure_id = %departure.id, error = %e, "Could not store phase");
                    report.failures += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            updated = report.updated,
            failures = report.failures,
            "Phase refresh complete"
        );
        report
    }

    /// Current phase of one departure, computed rather than read from cache.
    pub async fn current_phase(&self, departure_id: Uuid) -> CoreResult<(DeparturePhase, i32)> {
        let available = self.inventory.available(departure_id).await?;
        let departure = self
            .store
            .get_departure(departure_id)
            .await?
            .ok_or_else(|| CoreError::not_found("departure", departure_id))?;
        let today = self.clock.today(self.offset);
        Ok((
            project_phase(today, departure.start_date, departure.end_date, available),
            available,
        ))
    }
}
