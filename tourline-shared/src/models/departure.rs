use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// A dated run of a tour with a fixed seat capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Departure {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub capacity: i32,
    pub adult_price: i64,
    pub child_price: i64,
    /// Display cache, recomputed after every booking write.
    pub seats_remaining: Option<i32>,
    /// Display cache, recomputed by the phase refresher.
    pub phase: Option<DeparturePhase>,
}

/// Lifecycle label shown to customers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeparturePhase {
    UpcomingOpen,
    UpcomingFull,
    InProgress,
    Completed,
}

impl DeparturePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeparturePhase::UpcomingOpen => "UPCOMING_OPEN",
            DeparturePhase::UpcomingFull => "UPCOMING_FULL",
            DeparturePhase::InProgress => "IN_PROGRESS",
            DeparturePhase::Completed => "COMPLETED",
        }
    }

    pub fn accepts_reservations(&self) -> bool {
        matches!(self, DeparturePhase::UpcomingOpen | DeparturePhase::UpcomingFull)
    }
}

impl fmt::Display for DeparturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeparturePhase {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPCOMING_OPEN" => Ok(DeparturePhase::UpcomingOpen),
            "UPCOMING_FULL" => Ok(DeparturePhase::UpcomingFull),
            "IN_PROGRESS" => Ok(DeparturePhase::InProgress),
            "COMPLETED" => Ok(DeparturePhase::Completed),
            other => Err(UnknownVariant {
                kind: "departure phase",
                value: other.to_string(),
            }),
        }
    }
}
