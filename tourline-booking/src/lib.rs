pub mod finance;
pub mod ledger;
pub mod orchestrator;
pub mod reaper;
pub mod settlement;

pub use ledger::{BookingLedger, ReservationRequest};
pub use orchestrator::{CallbackDisposition, PaymentOrchestrator, ReconcileReport};
pub use reaper::{ReapReport, Reaper};
pub use settlement::{SettlementOutcome, SettlementService};
