use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::calendar::CalendarBridge;
use crate::config::Deadlines;
use crate::error::{external_deadline, ledger_deadline, BookingError};
use crate::ledger::{validate_duration, validate_external_id, BookingLedger, RuleStore};
use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::observability::{
    CALENDAR_PUBLISH_FAILURES_TOTAL, RESERVATIONS_TOTAL, RESERVATION_DURATION_SECONDS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub advisor_id: Ulid,
    pub customer_id: String,
    pub package_id: String,
    pub slot_start: Ms,
    pub duration_minutes: u32,
}

/// A committed booking plus any non-fatal problems hit after the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub booking: Booking,
    pub warnings: Vec<String>,
}

/// The only writer of new bookings.
///
/// Conflicting writes for one advisor are serialized by a per-advisor lock held
/// across re-read and insert. The ledger's own overlap constraint stays the final
/// arbiter for writers this coordinator cannot see.
pub struct ReservationCoordinator {
    rules: Arc<dyn RuleStore>,
    ledger: Arc<dyn BookingLedger>,
    bridge: Arc<dyn CalendarBridge>,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
    deadlines: Deadlines,
}

impl ReservationCoordinator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        ledger: Arc<dyn BookingLedger>,
        bridge: Arc<dyn CalendarBridge>,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            rules,
            ledger,
            bridge,
            locks: DashMap::new(),
            deadlines,
        }
    }

    /// Validate, re-check and commit one slot. Never trusts a previously computed slot list.
    #[instrument(skip(self, req), fields(advisor_id = %req.advisor_id, slot_start = req.slot_start))]
    pub async fn reserve(&self, req: ReservationRequest) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.reserve_inner(req).await;
        let outcome = match &result {
            Ok(_) => "booked",
            Err(e) => e.label(),
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(RESERVATION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn reserve_inner(&self, req: ReservationRequest) -> Result<Reservation, BookingError> {
        validate_duration(req.duration_minutes)?;
        validate_external_id("customer id", &req.customer_id)?;
        validate_external_id("package id", &req.package_id)?;
        if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&req.slot_start) {
            return Err(BookingError::Validation("slot start out of range".into()));
        }
        let span = Span::from_minutes(req.slot_start, req.duration_minutes);

        let schedule =
            ledger_deadline(self.deadlines.ledger, self.rules.schedule(req.advisor_id)).await?;
        ensure_within_rules(&schedule, &span)?;

        let guard = self.acquire(req.advisor_id).await?;

        let existing =
            ledger_deadline(self.deadlines.ledger, self.ledger.bookings(req.advisor_id, span))
                .await?;
        if let Some(taken) = existing
            .iter()
            .find(|b| b.is_blocking() && b.span().overlaps(&span))
        {
            return Err(BookingError::Conflict(format!("overlaps booking {}", taken.id)));
        }

        let booking = Booking {
            id: Ulid::new(),
            advisor_id: req.advisor_id,
            customer_id: req.customer_id,
            package_id: req.package_id,
            scheduled_at: req.slot_start,
            duration_minutes: req.duration_minutes,
            status: BookingStatus::Booked,
        };
        // Not under a deadline: once here, the write runs to commit or explicit conflict.
        let booking = self.ledger.insert_booking(booking).await?;
        drop(guard);
        info!(booking_id = %booking.id, "booking committed");

        let warnings = self.mirror(&booking).await;
        Ok(Reservation { booking, warnings })
    }

    /// Lifecycle transition driven by the portal (`Completed` / `Cancelled`).
    #[instrument(skip(self))]
    pub async fn transition(&self, booking_id: Ulid, status: BookingStatus) -> Result<Booking, BookingError> {
        let booking = self.ledger.set_status(booking_id, status).await?;
        info!(booking_id = %booking.id, status = status.as_str(), "booking transitioned");
        Ok(booking)
    }

    fn advisor_lock(&self, advisor_id: Ulid) -> Arc<Mutex<()>> {
        self.locks.entry(advisor_id).or_default().clone()
    }

    /// Per-advisor critical section. Each attempt waits up to the ledger deadline.
    async fn acquire(&self, advisor_id: Ulid) -> Result<OwnedMutexGuard<()>, BookingError> {
        let lock = self.advisor_lock(advisor_id);
        for attempt in 0..=self.deadlines.ledger_retries {
            match tokio::time::timeout(self.deadlines.ledger, lock.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => debug!(%advisor_id, attempt, "advisor lock contended"),
            }
        }
        Err(BookingError::Conflict("advisor busy".into()))
    }

    async fn mirror(&self, booking: &Booking) -> Vec<String> {
        let published = external_deadline(
            "calendar bridge",
            self.deadlines.external,
            self.bridge.publish(booking),
        )
        .await;
        match published {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(booking_id = %booking.id, error = %e, "calendar mirror failed; booking stands");
                metrics::counter!(CALENDAR_PUBLISH_FAILURES_TOTAL).increment(1);
                vec![format!("calendar sync failed: {e}")]
            }
        }
    }
}

/// The whole slot must sit inside one active rule window on its local date.
fn ensure_within_rules(schedule: &AdvisorSchedule, span: &Span) -> Result<(), BookingError> {
    let clock = schedule.profile.clock;
    let date = clock
        .local(span.start)
        .map(|dt| dt.date())
        .ok_or_else(|| BookingError::Validation("slot start out of range".into()))?;
    if schedule
        .rules_on(date)
        .any(|r| r.window_on(date, clock).contains_span(span))
    {
        Ok(())
    } else {
        Err(BookingError::Validation(
            "slot is outside the advisor's availability".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NoopBridge;
    use crate::error::ExternalError;
    use crate::ledger::{Ledger, LedgerError};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime, Weekday};
    use std::future::Future;
    use std::path::PathBuf;
    use std::task::Poll;
    use std::time::Duration;

    const H: Ms = 3_600_000;
    const M: Ms = MINUTE_MS;
    /// 2024-01-01T00:00:00Z, a Monday.
    const MONDAY: Ms = 1_704_067_200_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeeper_test_reservation");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn ledger_with_monday(name: &str) -> (Arc<Ledger>, Ulid) {
        let ledger = Arc::new(Ledger::open(&test_wal_path(name)).unwrap());
        let aid = Ulid::new();
        ledger.register_advisor(aid, None, LocalClock::UTC).await.unwrap();
        ledger
            .add_rule(AvailabilityRule {
                id: Ulid::new(),
                advisor_id: aid,
                day_of_week: Weekday::Mon,
                start_time: hm(9, 0),
                end_time: hm(12, 0),
                active: true,
            })
            .await
            .unwrap();
        (ledger, aid)
    }

    fn coordinator(ledger: &Arc<Ledger>) -> ReservationCoordinator {
        ReservationCoordinator::new(
            ledger.clone(),
            ledger.clone(),
            Arc::new(NoopBridge),
            Deadlines::default(),
        )
    }

    fn request(aid: Ulid, start: Ms, minutes: u32) -> ReservationRequest {
        ReservationRequest {
            advisor_id: aid,
            customer_id: "cust-1".into(),
            package_id: "pkg-1".into(),
            slot_start: start,
            duration_minutes: minutes,
        }
    }

    async fn booked_count(ledger: &Ledger, aid: Ulid) -> usize {
        ledger
            .bookings_in(aid, LocalClock::UTC.day_span(monday()))
            .await
            .unwrap()
            .iter()
            .filter(|b| b.is_blocking())
            .count()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// Polls `fut` once and drops it, as a timed-out or disconnected request would.
    async fn abandon_after_first_poll<F: Future>(fut: F) -> bool {
        let mut fut = Box::pin(fut);
        let pending =
            std::future::poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx).is_pending())).await;
        drop(fut);
        pending
    }

    /// Ledger view that never reports existing bookings, so only the insert constraint can refuse.
    struct BlindReads(Arc<Ledger>);

    #[async_trait]
    impl BookingLedger for BlindReads {
        async fn bookings(&self, _advisor_id: Ulid, _range: Span) -> Result<Vec<Booking>, LedgerError> {
            Ok(Vec::new())
        }
        async fn insert_booking(&self, booking: Booking) -> Result<Booking, LedgerError> {
            self.0.insert_booking(booking).await
        }
        async fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, LedgerError> {
            self.0.set_booking_status(id, status).await
        }
    }

    struct DownBridge;

    #[async_trait]
    impl CalendarBridge for DownBridge {
        async fn publish(&self, _booking: &Booking) -> Result<(), ExternalError> {
            Err(ExternalError::Rejected {
                service: "calendar bridge",
                status: 503,
            })
        }
    }

    #[tokio::test]
    async fn second_reservation_of_same_slot_conflicts() {
        let (ledger, aid) = ledger_with_monday("scenario_d.wal").await;
        let coord = coordinator(&ledger);

        let first = coord.reserve(request(aid, MONDAY + 11 * H, 60)).await.unwrap();
        assert!(first.warnings.is_empty());
        assert_eq!(first.booking.status, BookingStatus::Booked);

        let second = coord.reserve(request(aid, MONDAY + 11 * H, 60)).await;
        assert!(matches!(second, Err(BookingError::Conflict(_))));
        assert_eq!(booked_count(&ledger, aid).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_reservations_admit_exactly_one() {
        let (ledger, aid) = ledger_with_monday("race.wal").await;
        let coord = Arc::new(coordinator(&ledger));

        let mut handles = Vec::new();
        for i in 0..12 {
            let coord = coord.clone();
            // Starts 10:00..10:55, all pairwise overlapping for 60 minutes.
            let start = MONDAY + 10 * H + i * 5 * M;
            handles.push(tokio::spawn(async move { coord.reserve(request(aid, start, 60)).await }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(BookingError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 11);
        assert_eq!(booked_count(&ledger, aid).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_coordinators_are_arbitrated_by_the_ledger() {
        let (ledger, aid) = ledger_with_monday("two_coordinators.wal").await;
        let a = Arc::new(coordinator(&ledger));
        let b = Arc::new(coordinator(&ledger));

        let mut handles = Vec::new();
        for i in 0..8 {
            let coord = if i % 2 == 0 { a.clone() } else { b.clone() };
            let start = MONDAY + 9 * H + i * 5 * M;
            handles.push(tokio::spawn(async move { coord.reserve(request(aid, start, 45)).await }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(booked_count(&ledger, aid).await, 1);
    }

    #[tokio::test]
    async fn insert_rejection_surfaces_as_conflict() {
        let (ledger, aid) = ledger_with_monday("blind.wal").await;
        let coord = ReservationCoordinator::new(
            ledger.clone(),
            Arc::new(BlindReads(ledger.clone())),
            Arc::new(NoopBridge),
            Deadlines::default(),
        );

        coord.reserve(request(aid, MONDAY + 10 * H, 60)).await.unwrap();
        let err = coord
            .reserve(request(aid, MONDAY + 10 * H + 30 * M, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));
        assert!(err.to_string().starts_with("slot no longer available"));
    }

    #[tokio::test]
    async fn slots_outside_rule_windows_are_rejected() {
        let (ledger, aid) = ledger_with_monday("window.wal").await;
        let coord = coordinator(&ledger);

        // Before the window, straddling its end, and on a day without rules.
        for (start, minutes) in [(8 * H, 60), (11 * H + 30 * M, 60), (24 * H + 10 * H, 60)] {
            let err = coord.reserve(request(aid, MONDAY + start, minutes)).await.unwrap_err();
            assert!(matches!(err, BookingError::Validation(_)), "{start}: {err}");
        }
        assert_eq!(booked_count(&ledger, aid).await, 0);

        // Inside the window but off the generator grid is fine.
        coord.reserve(request(aid, MONDAY + 9 * H + 15 * M, 30)).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected_before_any_read() {
        let (ledger, aid) = ledger_with_monday("malformed.wal").await;
        let coord = coordinator(&ledger);

        let mut req = request(aid, MONDAY + 9 * H, 60);
        req.customer_id.clear();
        assert!(matches!(coord.reserve(req).await, Err(BookingError::Validation(_))));

        assert!(matches!(
            coord.reserve(request(aid, MONDAY + 9 * H, 0)).await,
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            coord.reserve(request(aid, i64::MAX, 60)).await,
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            coord.reserve(request(Ulid::new(), MONDAY + 9 * H, 60)).await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bridge_failure_is_a_warning_not_a_rollback() {
        let (ledger, aid) = ledger_with_monday("bridge.wal").await;
        let coord = ReservationCoordinator::new(
            ledger.clone(),
            ledger.clone(),
            Arc::new(DownBridge),
            Deadlines::default(),
        );

        let reservation = coord.reserve(request(aid, MONDAY + 9 * H, 60)).await.unwrap();
        assert_eq!(reservation.warnings.len(), 1);
        assert!(reservation.warnings[0].contains("503"));
        assert_eq!(
            ledger.booking(reservation.booking.id).await.unwrap().status,
            BookingStatus::Booked
        );
    }

    #[tokio::test]
    async fn cancellation_frees_the_slot() {
        let (ledger, aid) = ledger_with_monday("cancel.wal").await;
        let coord = coordinator(&ledger);

        let first = coord.reserve(request(aid, MONDAY + 10 * H, 60)).await.unwrap();
        let cancelled = coord
            .transition(first.booking.id, BookingStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        coord.reserve(request(aid, MONDAY + 10 * H, 60)).await.unwrap();

        let err = coord
            .transition(first.booking.id, BookingStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn held_advisor_lock_times_out_as_busy() {
        let (ledger, aid) = ledger_with_monday("busy_lock.wal").await;
        let coord = ReservationCoordinator::new(
            ledger.clone(),
            ledger.clone(),
            Arc::new(NoopBridge),
            Deadlines {
                ledger: Duration::from_millis(20),
                ledger_retries: 1,
                ..Deadlines::default()
            },
        );

        let lock = coord.advisor_lock(aid);
        let _held = lock.lock().await;
        let err = coord.reserve(request(aid, MONDAY + 9 * H, 60)).await.unwrap_err();
        assert!(matches!(&err, BookingError::Conflict(msg) if msg == "advisor busy"));
        assert_eq!(booked_count(&ledger, aid).await, 0);
    }

    #[tokio::test]
    async fn abandoned_reservation_still_holds_its_slot_after_replay() {
        let path = test_wal_path("abandoned.wal");
        let aid;
        {
            let (ledger, advisor) = ledger_with_monday("abandoned.wal").await;
            aid = advisor;
            let coord = coordinator(&ledger);

            let mut alice = request(aid, MONDAY + 10 * H, 60);
            alice.customer_id = "alice".into();
            assert!(abandon_after_first_poll(coord.reserve(alice)).await);

            let mut bob = request(aid, MONDAY + 10 * H, 60);
            bob.customer_id = "bob".into();
            assert!(matches!(coord.reserve(bob).await, Err(BookingError::Conflict(_))));
            assert_eq!(booked_count(&ledger, aid).await, 1);
        }

        let reopened = Ledger::open(&path).unwrap();
        let booked: Vec<_> = reopened
            .bookings_in(aid, LocalClock::UTC.day_span(monday()))
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.is_blocking())
            .collect();
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].customer_id, "alice");
    }
}
