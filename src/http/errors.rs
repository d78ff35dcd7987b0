//! Error responses. Every failure renders as `{"error": {"kind", "message"}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{BookingError, ErrorKind};
use crate::ledger::LedgerError;

#[derive(Debug)]
pub enum ApiError {
    Booking(BookingError),
    /// No session for a call that needs a customer.
    Unauthenticated,
    /// The request deadline elapsed before the handler answered.
    TimedOut,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Booking(BookingError::Validation(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Booking(e) => e.kind(),
            ApiError::Unauthenticated => ErrorKind::Unauthenticated,
            ApiError::TimedOut => ErrorKind::External,
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        ApiError::Booking(e)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Booking(e.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message) = match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "a customer session is required".to_string(),
            ),
            ApiError::TimedOut => {
                tracing::warn!("request deadline elapsed");
                (StatusCode::SERVICE_UNAVAILABLE, "request timed out".to_string())
            }
            ApiError::Booking(e) => match e {
                BookingError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
                BookingError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
                conflict @ BookingError::Conflict(_) => (StatusCode::CONFLICT, conflict.to_string()),
                BookingError::Unavailable(reason) => {
                    tracing::error!(reason = %reason, "ledger unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "booking ledger temporarily unavailable".to_string(),
                    )
                }
            },
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                kind: kind.as_str(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
