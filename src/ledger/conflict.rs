use crate::limits::*;
use crate::model::*;

use super::LedgerError;

pub(crate) fn validate_span(span: &Span) -> Result<(), LedgerError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(LedgerError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), LedgerError> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(LedgerError::Invalid(format!(
            "duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(())
}

pub(crate) fn validate_external_id(field: &str, value: &str) -> Result<(), LedgerError> {
    if value.is_empty() {
        return Err(LedgerError::Invalid(format!("{field} must not be empty")));
    }
    if value.len() > MAX_EXTERNAL_ID_LEN {
        return Err(LedgerError::LimitExceeded("external id too long"));
    }
    Ok(())
}

pub(crate) fn validate_clock(clock: &LocalClock) -> Result<(), LedgerError> {
    if clock.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(LedgerError::Invalid("utc offset out of range".into()));
    }
    Ok(())
}

pub(crate) fn validate_name(name: Option<&str>) -> Result<(), LedgerError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(LedgerError::LimitExceeded("advisor name too long"));
    }
    Ok(())
}

pub(crate) fn validate_rule(rule: &AvailabilityRule) -> Result<(), LedgerError> {
    if rule.start_time >= rule.end_time {
        return Err(LedgerError::Invalid("rule start must be before end".into()));
    }
    Ok(())
}

pub(crate) fn validate_booking(booking: &Booking) -> Result<(), LedgerError> {
    validate_duration(booking.duration_minutes)?;
    validate_span(&booking.span())?;
    validate_external_id("customer id", &booking.customer_id)?;
    validate_external_id("package id", &booking.package_id)?;
    if booking.status != BookingStatus::Booked {
        return Err(LedgerError::Invalid("new bookings must be Booked".into()));
    }
    Ok(())
}

/// The ledger's overlap constraint: no two `Booked` entries of one advisor may overlap.
pub(crate) fn check_no_conflict(state: &AdvisorState, span: &Span) -> Result<(), LedgerError> {
    match state.blocking_overlap(span) {
        Some(existing) => Err(LedgerError::Conflict(existing.id)),
        None => Ok(()),
    }
}
