use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tourline_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Core(err) => match err {
                CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                CoreError::CapacityExceeded { .. } => StatusCode::CONFLICT,
                CoreError::BookingNotPayable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CoreError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
                CoreError::GatewayError(_) => StatusCode::BAD_GATEWAY,
                CoreError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
                CoreError::PersistenceError(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
                CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            },
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
            match status {
                StatusCode::BAD_GATEWAY => "Payment provider unavailable".to_string(),
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
                _ => "Internal Server Error".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourline_shared::BookingStatus;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::not_found("booking", Uuid::nil()), StatusCode::NOT_FOUND),
            (
                CoreError::CapacityExceeded { requested: 2, available: 1 },
                StatusCode::CONFLICT,
            ),
            (CoreError::not_payable(Uuid::nil(), "expired"), StatusCode::UNPROCESSABLE_ENTITY),
            (CoreError::SignatureInvalid("mac".into()), StatusCode::UNAUTHORIZED),
            (CoreError::GatewayError("timeout".into()), StatusCode::BAD_GATEWAY),
            (CoreError::ConcurrencyConflict("40001".into()), StatusCode::CONFLICT),
            (CoreError::PersistenceError("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::ValidationError("adults".into()), StatusCode::BAD_REQUEST),
            (
                CoreError::InvalidTransition {
                    from: BookingStatus::Paid,
                    to: BookingStatus::Cancelled,
                },
                StatusCode::CONFLICT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }
}
