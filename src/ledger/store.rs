//! Storage seams consumed by the slot generator and the reservation coordinator.
//!
//! `Ledger` implements both; a deployment backed by the portal's own data store
//! supplies its own implementations.

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

use super::{Ledger, LedgerError};

/// Read side of the advisor's recurring availability.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Profile and rules, rules in the order the advisor authored them.
    /// `LedgerError::NotFound` for an unknown advisor.
    async fn schedule(&self, advisor_id: Ulid) -> Result<AdvisorSchedule, LedgerError>;
}

/// The authoritative booking record.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Bookings of any status overlapping `range`.
    async fn bookings(&self, advisor_id: Ulid, range: Span) -> Result<Vec<Booking>, LedgerError>;

    /// Insert a `Booked` entry. Must reject, with `LedgerError::Conflict`, any
    /// insert overlapping another `Booked` entry of the same advisor, including
    /// ones committed by other processes.
    async fn insert_booking(&self, booking: Booking) -> Result<Booking, LedgerError>;

    async fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, LedgerError>;
}

#[async_trait]
impl RuleStore for Ledger {
    async fn schedule(&self, advisor_id: Ulid) -> Result<AdvisorSchedule, LedgerError> {
        Ledger::schedule(self, advisor_id).await
    }
}

#[async_trait]
impl BookingLedger for Ledger {
    async fn bookings(&self, advisor_id: Ulid, range: Span) -> Result<Vec<Booking>, LedgerError> {
        self.bookings_in(advisor_id, range).await
    }

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, LedgerError> {
        Ledger::insert_booking(self, booking).await
    }

    async fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, LedgerError> {
        self.set_booking_status(id, status).await
    }
}
