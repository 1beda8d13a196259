pub mod inventory;
pub mod phase;
pub mod pricing;

pub use inventory::{seats_available, Admission, InventoryCalculator};
pub use phase::{project_phase, PhaseRefresher, PhaseReport};
pub use pricing::{quote, FareQuote};
