//! Slot generation: candidate windows from the weekly rules, marked against
//! the ledger and, when configured, the external calendar.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{instrument, warn};
use ulid::Ulid;

use crate::calendar::BusySource;
use crate::config::Deadlines;
use crate::error::{external_deadline, ledger_deadline, BookingError};
use crate::ledger::{validate_duration, BookingLedger, RuleStore};
use crate::model::*;
use crate::observability::{bool_label, BUSY_SOURCE_FAILURES_TOTAL, SLOT_QUERIES_TOTAL};

/// Candidate windows for `date`: for each active rule in store order, back-to-back
/// windows of `duration_minutes` from the rule start while they still fit before
/// the rule end. Overlapping rules are not merged.
pub fn enumerate_slots(schedule: &AdvisorSchedule, date: NaiveDate, duration_minutes: u32) -> Vec<Span> {
    let step = Ms::from(duration_minutes) * MINUTE_MS;
    if step <= 0 {
        return Vec::new();
    }
    let clock = schedule.profile.clock;
    let mut slots = Vec::new();
    for rule in schedule.rules_on(date) {
        let window = rule.window_on(date, clock);
        let mut start = window.start;
        while start + step <= window.end {
            slots.push(Span::new(start, start + step));
            start += step;
        }
    }
    slots
}

/// Mark each candidate unavailable if it overlaps a `Booked` booking or a busy period.
/// Candidate order is preserved.
pub fn mark_availability(candidates: &[Span], bookings: &[Booking], busy: &[BusyInterval]) -> Vec<TimeSlot> {
    let mut blocked: Vec<Span> = bookings
        .iter()
        .filter(|b| b.is_blocking())
        .map(Booking::span)
        .chain(busy.iter().copied())
        .collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    candidates
        .iter()
        .map(|slot| {
            // Merged spans are disjoint and sorted, so their ends ascend too.
            let idx = blocked.partition_point(|b| b.end <= slot.start);
            let taken = blocked.get(idx).is_some_and(|b| b.start < slot.end);
            TimeSlot {
                start: slot.start,
                end: slot.end,
                available: !taken,
            }
        })
        .collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Read-only slot computation. Takes no locks; concurrent queries may observe
/// different ledger snapshots.
#[derive(Clone)]
pub struct SlotGenerator {
    rules: Arc<dyn RuleStore>,
    ledger: Arc<dyn BookingLedger>,
    busy: BusySource,
    deadlines: Deadlines,
}

impl SlotGenerator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        ledger: Arc<dyn BookingLedger>,
        busy: BusySource,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            rules,
            ledger,
            busy,
            deadlines,
        }
    }

    /// Slots of `date` in the advisor's local clock, in rule order then chronological.
    /// Busy-source failure never fails the query; it sets `degraded` instead.
    #[instrument(skip(self), fields(advisor_id = %advisor_id))]
    pub async fn generate(
        &self,
        advisor_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<SlotList, BookingError> {
        validate_duration(duration_minutes)?;
        let schedule = ledger_deadline(self.deadlines.ledger, self.rules.schedule(advisor_id)).await?;
        let day = schedule.profile.clock.day_span(date);
        let candidates = enumerate_slots(&schedule, date, duration_minutes);

        let (bookings, (busy, degraded)) = tokio::join!(
            ledger_deadline(self.deadlines.ledger, self.ledger.bookings(advisor_id, day)),
            self.fetch_busy(advisor_id, day),
        );
        let bookings = bookings?;

        metrics::counter!(SLOT_QUERIES_TOTAL, "degraded" => bool_label(degraded)).increment(1);
        Ok(SlotList {
            slots: mark_availability(&candidates, &bookings, &busy),
            degraded,
        })
    }

    async fn fetch_busy(&self, advisor_id: Ulid, day: Span) -> (Vec<BusyInterval>, bool) {
        let BusySource::Present(source) = &self.busy else {
            return (Vec::new(), false);
        };
        let fetched = external_deadline(
            "busy source",
            self.deadlines.external,
            source.fetch(advisor_id, day),
        )
        .await;
        match fetched {
            Ok(busy) => (busy, false),
            Err(e) => {
                warn!(%advisor_id, error = %e, "busy source failed, serving ledger-only availability");
                metrics::counter!(BUSY_SOURCE_FAILURES_TOTAL).increment(1);
                (Vec::new(), true)
            }
        }
    }
}
