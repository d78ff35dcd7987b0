use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 24 * 60 * MINUTE_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span of `minutes` starting at `start`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Fixed-offset wall clock of an advisor. Rules are written in this clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalClock {
    pub utc_offset_minutes: i32,
}

impl LocalClock {
    pub const UTC: LocalClock = LocalClock { utc_offset_minutes: 0 };

    pub fn new(utc_offset_minutes: i32) -> Self {
        Self { utc_offset_minutes }
    }

    fn offset_ms(&self) -> Ms {
        Ms::from(self.utc_offset_minutes) * MINUTE_MS
    }

    /// Instant of a local wall-clock reading.
    pub fn instant(&self, local: NaiveDateTime) -> Ms {
        local.and_utc().timestamp_millis() - self.offset_ms()
    }

    /// Instant of `time` on local `date`.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        self.instant(date.and_time(time))
    }

    /// `[local midnight, next local midnight)` of `date`.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.at(date, NaiveTime::MIN);
        Span::new(start, start + DAY_MS)
    }

    /// Local wall-clock reading of an instant. `None` outside chrono's range.
    pub fn local(&self, t: Ms) -> Option<NaiveDateTime> {
        DateTime::<Utc>::from_timestamp_millis(t + self.offset_ms()).map(|dt| dt.naive_utc())
    }
}

/// Recurring weekly window in which an advisor accepts bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub advisor_id: Ulid,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
}

impl AvailabilityRule {
    pub fn applies_to(&self, date: NaiveDate) -> bool {
        self.active && self.day_of_week == date.weekday()
    }

    /// The rule's window on a concrete local date.
    pub fn window_on(&self, date: NaiveDate, clock: LocalClock) -> Span {
        Span::new(clock.at(date, self.start_time), clock.at(date, self.end_time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Booked,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "Booked",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    /// Lifecycle: `Booked` moves to `Completed` or `Cancelled`, nothing else moves.
    pub fn can_become(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Booked, BookingStatus::Completed)
                | (BookingStatus::Booked, BookingStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub advisor_id: Ulid,
    pub customer_id: String,
    pub package_id: String,
    pub scheduled_at: Ms,
    pub duration_minutes: u32,
    pub status: BookingStatus,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.scheduled_at, self.duration_minutes)
    }

    /// Only `Booked` entries take part in conflict detection.
    pub fn is_blocking(&self) -> bool {
        self.status == BookingStatus::Booked
    }
}

/// Externally reported busy period. Fetched per query, never persisted.
pub type BusyInterval = Span;

/// Derived candidate reservation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: Ms,
    pub end: Ms,
    pub available: bool,
}

impl TimeSlot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Result of a slot query. `degraded` is set when external busy data was expected but missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotList {
    pub slots: Vec<TimeSlot>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorProfile {
    pub id: Ulid,
    pub name: Option<String>,
    pub clock: LocalClock,
}

/// Rules of one advisor in store order, with the clock they are written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorSchedule {
    pub profile: AdvisorProfile,
    pub rules: Vec<AvailabilityRule>,
}

impl AdvisorSchedule {
    /// Active rules for the weekday of `date`, in store order.
    pub fn rules_on(&self, date: NaiveDate) -> impl Iterator<Item = &AvailabilityRule> {
        self.rules.iter().filter(move |r| r.applies_to(date))
    }
}

#[derive(Debug, Clone)]
pub struct AdvisorState {
    pub profile: AdvisorProfile,
    /// Rules in insertion order; slot output order depends on it.
    pub rules: Vec<AvailabilityRule>,
    /// All bookings (any status), sorted by `scheduled_at`.
    pub bookings: Vec<Booking>,
}

impl AdvisorState {
    pub fn new(profile: AdvisorProfile) -> Self {
        Self {
            profile,
            rules: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn schedule(&self) -> AdvisorSchedule {
        AdvisorSchedule {
            profile: self.profile.clone(),
            rules: self.rules.clone(),
        }
    }

    /// Insert booking maintaining sort order by scheduled_at.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.scheduled_at <= booking.scheduled_at);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn upsert_rule(&mut self, rule: AvailabilityRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<AvailabilityRule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.scheduled_at < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span().end > query.start)
    }

    /// First `Booked` entry overlapping `span`, if any.
    pub fn blocking_overlap(&self, span: &Span) -> Option<&Booking> {
        self.overlapping(span).find(|b| b.is_blocking())
    }
}

/// Ledger events, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AdvisorRegistered {
        id: Ulid,
        name: Option<String>,
        clock: LocalClock,
    },
    AdvisorUpdated {
        id: Ulid,
        name: Option<String>,
        clock: LocalClock,
    },
    RuleAdded {
        rule: AvailabilityRule,
    },
    RuleUpdated {
        rule: AvailabilityRule,
    },
    RuleRemoved {
        id: Ulid,
        advisor_id: Ulid,
    },
    BookingInserted {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        advisor_id: Ulid,
        status: BookingStatus,
    },
}

impl Event {
    pub fn advisor_id(&self) -> Ulid {
        match self {
            Event::AdvisorRegistered { id, .. } | Event::AdvisorUpdated { id, .. } => *id,
            Event::RuleAdded { rule } | Event::RuleUpdated { rule } => rule.advisor_id,
            Event::RuleRemoved { advisor_id, .. }
            | Event::BookingStatusChanged { advisor_id, .. } => *advisor_id,
            Event::BookingInserted { booking } => booking.advisor_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booking(start: Ms, minutes: u32, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            advisor_id: Ulid::nil(),
            customer_id: "c".into(),
            package_id: "p".into(),
            scheduled_at: start,
            duration_minutes: minutes,
            status,
        }
    }

    fn state() -> AdvisorState {
        AdvisorState::new(AdvisorProfile {
            id: Ulid::new(),
            name: None,
            clock: LocalClock::UTC,
        })
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(Span::new(0, 400).contains_span(&a));
        assert!(!a.contains_span(&b));
    }

    #[test]
    fn clock_maps_local_time_to_instant() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let utc = LocalClock::UTC.at(date, hm(9, 0));
        let cet = LocalClock::new(60).at(date, hm(9, 0));
        assert_eq!(utc - cet, H);
        assert_eq!(LocalClock::new(60).day_span(date).duration_ms(), DAY_MS);

        let back = LocalClock::new(60).local(cet).unwrap();
        assert_eq!(back, date.and_time(hm(9, 0)));
    }

    #[test]
    fn rule_applies_only_on_its_weekday_when_active() {
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut rule = AvailabilityRule {
            id: Ulid::new(),
            advisor_id: Ulid::new(),
            day_of_week: Weekday::Mon,
            start_time: hm(9, 0),
            end_time: hm(12, 0),
            active: true,
        };
        assert!(rule.applies_to(monday));
        assert!(!rule.applies_to(monday.succ_opt().unwrap()));
        rule.active = false;
        assert!(!rule.applies_to(monday));
    }

    #[test]
    fn status_transitions() {
        assert!(BookingStatus::Booked.can_become(BookingStatus::Cancelled));
        assert!(BookingStatus::Booked.can_become(BookingStatus::Completed));
        assert!(!BookingStatus::Cancelled.can_become(BookingStatus::Booked));
        assert!(!BookingStatus::Completed.can_become(BookingStatus::Cancelled));
        assert!(!BookingStatus::Booked.can_become(BookingStatus::Booked));
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut st = state();
        st.insert_booking(booking(3 * H, 60, BookingStatus::Booked));
        st.insert_booking(booking(H, 60, BookingStatus::Booked));
        st.insert_booking(booking(2 * H, 60, BookingStatus::Booked));
        let starts: Vec<Ms> = st.bookings.iter().map(|b| b.scheduled_at).collect();
        assert_eq!(starts, vec![H, 2 * H, 3 * H]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut st = state();
        st.insert_booking(booking(0, 60, BookingStatus::Booked));
        st.insert_booking(booking(2 * H, 60, BookingStatus::Booked));
        st.insert_booking(booking(5 * H, 60, BookingStatus::Booked));
        let hits: Vec<_> = st.overlapping(&Span::new(H + H / 2, 3 * H)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scheduled_at, 2 * H);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut st = state();
        st.insert_booking(booking(0, 60, BookingStatus::Booked));
        assert!(st.overlapping(&Span::new(H, 2 * H)).next().is_none());
    }

    #[test]
    fn cancelled_bookings_do_not_block() {
        let mut st = state();
        st.insert_booking(booking(H, 60, BookingStatus::Cancelled));
        assert!(st.blocking_overlap(&Span::new(H, 2 * H)).is_none());
        st.insert_booking(booking(H, 30, BookingStatus::Booked));
        assert!(st.blocking_overlap(&Span::new(H, 2 * H)).is_some());
    }

    #[test]
    fn rules_keep_insertion_order() {
        let mut st = state();
        let advisor_id = st.profile.id;
        let make = |h: u32| AvailabilityRule {
            id: Ulid::new(),
            advisor_id,
            day_of_week: Weekday::Mon,
            start_time: hm(h, 0),
            end_time: hm(h + 1, 0),
            active: true,
        };
        let late = make(15);
        let early = make(9);
        st.upsert_rule(late.clone());
        st.upsert_rule(early.clone());
        assert_eq!(st.rules, vec![late.clone(), early.clone()]);

        let mut toggled = late.clone();
        toggled.active = false;
        st.upsert_rule(toggled.clone());
        assert_eq!(st.rules[0], toggled);

        assert_eq!(st.remove_rule(early.id), Some(early));
        assert_eq!(st.rules.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingInserted {
            booking: booking(H, 45, BookingStatus::Booked),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
