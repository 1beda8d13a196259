use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Settlement channel a booking is paid through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    ZaloPay,
    Momo,
    /// Cash at the office or a bank transfer checked by staff.
    Manual,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::ZaloPay => "ZALOPAY",
            Provider::Momo => "MOMO",
            Provider::Manual => "MANUAL",
        }
    }

    /// Synchronous providers are confirmed by the caller, never by a push.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Provider::Manual)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ZALOPAY" => Ok(Provider::ZaloPay),
            "MOMO" => Ok(Provider::Momo),
            "MANUAL" | "CASH" | "BANK_TRANSFER" => Ok(Provider::Manual),
            _ => Err(UnknownVariant {
                kind: "payment provider",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCEEDED" => Ok(PaymentStatus::Succeeded),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

/// One attempt to collect a booking's amount through a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentOrder {
    /// Our id for the attempt, unique even across retries of one booking.
    pub transaction_id: String,
    pub provider: Provider,
    pub external_order_id: Option<String>,
    pub booking_id: Uuid,
    pub amount: i64,
    pub redirect_url: Option<String>,
    pub qr_code: Option<String>,
    pub status: PaymentStatus,
    /// Last callback or status-query body received for this attempt.
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Invoice/checkout row written together with the Paid transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: i64,
    pub method: String,
    pub transaction_ref: Option<String>,
    pub outcome: PaymentStatus,
    pub recorded_at: DateTime<Utc>,
}
