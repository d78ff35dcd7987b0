use thiserror::Error;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// Insert rejected by the overlap constraint; carries the booking already holding the time.
    #[error("overlaps booking {0}")]
    Conflict(Ulid),
    #[error("cannot move booking from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}
