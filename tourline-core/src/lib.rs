pub mod clock;
pub mod payment;
pub mod repository;

use std::future::Future;

use tourline_shared::BookingStatus;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: i32, available: i32 },

    #[error("Booking {booking_id} is not payable: {reason}")]
    BookingNotPayable { booking_id: Uuid, reason: String },

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn not_payable(booking_id: Uuid, reason: impl Into<String>) -> Self {
        CoreError::BookingNotPayable {
            booking_id,
            reason: reason.into(),
        }
    }

    /// Gateway and persistence failures may succeed on a later attempt;
    /// everything else is a rejection the caller must not repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::GatewayError(_)
                | CoreError::PersistenceError(_)
                | CoreError::ConcurrencyConflict(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Runs `op`, and once more if the first attempt lost a lock or
/// serialization race. A second conflict is surfaced to the caller.
pub async fn retry_on_conflict<T, F, Fut>(operation: &str, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    match op().await {
        Err(CoreError::ConcurrencyConflict(reason)) => {
            tracing::warn!(operation, %reason, "Concurrency conflict, retrying once");
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retryable_classification() {
        assert!(CoreError::GatewayError("timeout".into()).is_retryable());
        assert!(CoreError::PersistenceError("down".into()).is_retryable());
        assert!(CoreError::ConcurrencyConflict("40001".into()).is_retryable());

        assert!(!CoreError::not_found("booking", Uuid::nil()).is_retryable());
        assert!(!CoreError::CapacityExceeded { requested: 2, available: 1 }.is_retryable());
        assert!(!CoreError::SignatureInvalid("mac".into()).is_retryable());
        assert!(!CoreError::not_payable(Uuid::nil(), "expired").is_retryable());
    }

    #[tokio::test]
    async fn test_conflict_is_retried_exactly_once() {
        let attempts = AtomicUsize::new(0);
        let result: CoreResult<()> = retry_on_conflict("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::ConcurrencyConflict("lock timeout".into())) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::ConcurrencyConflict(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_attempt_can_succeed() {
        let attempts = AtomicUsize::new(0);
        let result = retry_on_conflict("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(CoreError::ConcurrencyConflict("40001".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: CoreResult<()> = retry_on_conflict("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::PersistenceError("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::PersistenceError(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
