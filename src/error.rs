use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors surfaced by slot queries and reservations.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Malformed input or a slot outside every rule window. Rejected before any write.
    #[error("{0}")]
    Validation(String),
    /// Unknown advisor, rule or booking.
    #[error("{0}")]
    NotFound(String),
    /// The time is taken; the caller should re-query rather than retry blindly.
    #[error("slot no longer available: {0}")]
    Conflict(String),
    /// The ledger itself could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Wire-level error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    External,
    Unauthenticated,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::External => "External",
            ErrorKind::Unauthenticated => "Unauthenticated",
        }
    }
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_) | BookingError::NotFound(_) => ErrorKind::Validation,
            BookingError::Conflict(_) => ErrorKind::Conflict,
            BookingError::Unavailable(_) => ErrorKind::External,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation",
            BookingError::NotFound(_) => "not_found",
            BookingError::Conflict(_) => "conflict",
            BookingError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<LedgerError> for BookingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(_) => BookingError::NotFound(e.to_string()),
            LedgerError::Conflict(_) => BookingError::Conflict(e.to_string()),
            LedgerError::AlreadyExists(_)
            | LedgerError::InvalidTransition { .. }
            | LedgerError::Invalid(_)
            | LedgerError::LimitExceeded(_) => BookingError::Validation(e.to_string()),
            LedgerError::Unavailable(msg) => BookingError::Unavailable(msg),
        }
    }
}

/// Failure of a calendar provider call.
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("{service} timed out after {}ms", timeout.as_millis())]
    Timeout {
        service: &'static str,
        timeout: Duration,
    },
    #[error("{service} transport error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} rejected the request with status {status}")]
    Rejected { service: &'static str, status: u16 },
    #[error("{service} returned malformed data: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

/// Run a calendar call under `timeout`, folding expiry into `ExternalError::Timeout`.
pub async fn external_deadline<T>(
    service: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, ExternalError>>,
) -> Result<T, ExternalError> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(ExternalError::Timeout { service, timeout }))
}

/// Run a ledger read under `timeout`. Expiry means the ledger is unreachable.
pub(crate) async fn ledger_deadline<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, BookingError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(BookingError::from),
        Err(_) => Err(BookingError::Unavailable(format!(
            "ledger read timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn ledger_errors_map_onto_taxonomy() {
        let id = Ulid::new();
        assert_eq!(
            BookingError::from(LedgerError::Conflict(id)).kind(),
            ErrorKind::Conflict
        );
        assert!(matches!(
            BookingError::from(LedgerError::NotFound(id)),
            BookingError::NotFound(_)
        ));
        assert_eq!(
            BookingError::from(LedgerError::LimitExceeded("x")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            BookingError::from(LedgerError::Unavailable("disk".into())).kind(),
            ErrorKind::External
        );
    }

    #[tokio::test(start_paused = true)]
    async fn external_deadline_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ExternalError>(())
        };
        let err = external_deadline("busy source", Duration::from_millis(50), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::Timeout { service: "busy source", .. }));
        assert_eq!(err.to_string(), "busy source timed out after 50ms");
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_deadline_reports_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, LedgerError>(1)
        };
        let err = ledger_deadline(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, BookingError::Unavailable(_)));
    }
}
