use serde::{Deserialize, Serialize};
use tourline_core::{CoreError, CoreResult};
use tourline_shared::{Departure, SeatCount};

/// Price of a seat request on one departure, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareQuote {
    pub adult_total: i64,
    pub child_total: i64,
    pub total: i64,
}

/// Prices `seats` at the departure's unit fares.
///
/// Rejects negative counts, an empty request and totals that do not fit
/// in an `i64`.
pub fn quote(departure: &Departure, seats: SeatCount) -> CoreResult<FareQuote> {
    if seats.adults < 0 || seats.children < 0 {
        return Err(CoreError::ValidationError(
            "seat counts must not be negative".to_string(),
        ));
    }
    let requested = seats
        .total()
        .ok_or_else(|| CoreError::ValidationError("too many seats requested".to_string()))?;
    if requested <= 0 {
        return Err(CoreError::ValidationError(
            "at least one seat must be requested".to_string(),
        ));
    }

    let overflow = || CoreError::ValidationError("fare total overflows".to_string());

    let adult_total = departure
        .adult_price
        .checked_mul(i64::from(seats.adults))
        .ok_or_else(overflow)?;
    let child_total = departure
        .child_price
        .checked_mul(i64::from(seats.children))
        .ok_or_else(overflow)?;
    let total = adult_total.checked_add(child_total).ok_or_else(overflow)?;

    Ok(FareQuote {
        adult_total,
        child_total,
        total,
    })
}
