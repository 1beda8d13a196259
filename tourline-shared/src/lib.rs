pub mod models;
pub mod secret;

pub use models::booking::{Booking, BookingStatus, ExpiryPolicy, SeatCount};
pub use models::departure::{Departure, DeparturePhase};
pub use models::payment::{FinancialRecord, PaymentOrder, PaymentStatus, Provider};
pub use secret::Secret;
