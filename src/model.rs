use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). Working hours reuse the type as an offset from midnight.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// In `StaffState::weekly` order.
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
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

    /// Move a time-of-day span onto an absolute day.
    pub fn shifted(&self, by: Ms) -> Span {
        Span::new(self.start + by, self.end + by)
    }
}

/// Midnight UTC of `date`, in Unix ms.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Calendar date (UTC) containing the instant `t`.
pub fn date_of(t: Ms) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp_millis(t).map(|dt| dt.date_naive())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Whether the booking still occupies its interval.
    pub fn occupies(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub service_id: Ulid,
    pub client: String,
    pub span: Span,
    pub status: BookingStatus,
}

/// Everything the engine knows about one staff member.
#[derive(Debug, Clone)]
pub struct StaffState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Recurring template indexed by `Weekday::num_days_from_monday()`.
    /// Each day is sorted and merged; spans are offsets from midnight.
    pub weekly: [Vec<Span>; 7],
    /// Date-specific working hours. An empty list is a closed day.
    pub overrides: BTreeMap<NaiveDate, Vec<Span>>,
    /// All bookings, any status, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl StaffState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            weekly: Default::default(),
            overrides: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    pub fn schedule(&self, weekday: Weekday) -> &[Span] {
        &self.weekly[weekday.num_days_from_monday() as usize]
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.occupies())
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Ulid,
    /// Normalised (lowercase, no port, no trailing dot).
    pub domain: String,
    pub active: bool,
}

/// Tenant-directory WAL records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantEvent {
    Registered { id: Ulid, domain: String },
    DomainChanged { id: Ulid, domain: String },
    ActiveSet { id: Ulid, active: bool },
}

/// Per-tenant WAL records. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffCreated {
        id: Ulid,
        name: Option<String>,
    },
    StaffRemoved {
        id: Ulid,
    },
    /// Full replacement of one weekday's template.
    ScheduleSet {
        staff_id: Ulid,
        weekday: Weekday,
        hours: Vec<Span>,
    },
    /// Full replacement of one date's override.
    OverrideSet {
        staff_id: Ulid,
        date: NaiveDate,
        hours: Vec<Span>,
    },
    OverrideCleared {
        staff_id: Ulid,
        date: NaiveDate,
    },
    BookingCreated {
        id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        client: String,
        span: Span,
        status: BookingStatus,
    },
    BookingStatusChanged {
        id: Ulid,
        staff_id: Ulid,
        status: BookingStatus,
    },
    BookingRescheduled {
        id: Ulid,
        staff_id: Ulid,
        span: Span,
    },
    /// Reassignment to another staff member, applied to both states at once.
    BookingMoved {
        id: Ulid,
        staff_id: Ulid,
        to_staff_id: Ulid,
        span: Span,
    },
    /// A batch of `BookingCreated` events written as one record, so the
    /// whole batch is durable or none of it is.
    BookingsCreated {
        bookings: Vec<Event>,
    },
}

impl Event {
    /// The staff member whose state this event mutates.
    pub fn staff_id(&self) -> Ulid {
        match self {
            Event::StaffCreated { id, .. } | Event::StaffRemoved { id } => *id,
            Event::ScheduleSet { staff_id, .. }
            | Event::OverrideSet { staff_id, .. }
            | Event::OverrideCleared { staff_id, .. }
            | Event::BookingCreated { staff_id, .. }
            | Event::BookingStatusChanged { staff_id, .. }
            | Event::BookingRescheduled { staff_id, .. }
            | Event::BookingMoved { staff_id, .. } => *staff_id,
            // A batch may touch several staff; report its first.
            Event::BookingsCreated { bookings } => bookings.first().map_or_else(Ulid::nil, Event::staff_id),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleInfo {
    pub staff_id: Ulid,
    pub weekday: Weekday,
    pub hours: Span,
}

/// `hours == None` marks a closed day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideInfo {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub hours: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub client: String,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

impl BookingInfo {
    pub fn from_booking(staff_id: Ulid, b: &Booking) -> Self {
        Self {
            id: b.id,
            staff_id,
            service_id: b.service_id,
            client: b.client.clone(),
            start: b.span.start,
            end: b.span.end,
            status: b.status,
        }
    }
}

/// Render a time-of-day offset as `HH:MM` (`24:00` for end of day).
pub fn format_time_of_day(ms: Ms) -> String {
    let minutes = ms / MINUTE_MS;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            service_id: Ulid::new(),
            client: "client".into(),
            span: Span::new(start, end),
            status,
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn day_start_is_utc_midnight() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(day_start_ms(date), DAY_MS);
        assert_eq!(date_of(DAY_MS), Some(date));
        assert_eq!(date_of(DAY_MS - 1), NaiveDate::from_ymd_opt(1970, 1, 1));
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Cancelled.occupies());
        assert!(Completed.occupies());
    }

    #[test]
    fn status_parse() {
        assert_eq!(BookingStatus::parse("Confirmed"), Some(BookingStatus::Confirmed));
        assert_eq!(BookingStatus::parse("canceled"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::parse("rescheduled"), None);
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut st = StaffState::new(Ulid::new(), None);
        st.insert_booking(booking(300, 400, BookingStatus::Pending));
        st.insert_booking(booking(100, 200, BookingStatus::Confirmed));
        st.insert_booking(booking(200, 300, BookingStatus::Cancelled));
        let starts: Vec<Ms> = st.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut st = StaffState::new(Ulid::new(), None);
        st.insert_booking(booking(100, 200, BookingStatus::Confirmed));
        st.insert_booking(booking(450, 600, BookingStatus::Confirmed));
        st.insert_booking(booking(1000, 1100, BookingStatus::Confirmed));

        let hits: Vec<_> = st.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut st = StaffState::new(Ulid::new(), None);
        st.insert_booking(booking(100, 200, BookingStatus::Confirmed));
        assert_eq!(st.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(st.overlapping(&Span::new(0, 100)).count(), 0);
        assert_eq!(st.overlapping(&Span::new(199, 300)).count(), 1);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut st = StaffState::new(Ulid::new(), None);
        let b = booking(100, 200, BookingStatus::Pending);
        let id = b.id;
        st.insert_booking(b);
        assert!(st.remove_booking(Ulid::new()).is_none());
        assert_eq!(st.remove_booking(id).map(|b| b.id), Some(id));
        assert!(st.bookings.is_empty());
    }

    #[test]
    fn time_of_day_formatting() {
        assert_eq!(format_time_of_day(9 * 60 * MINUTE_MS + 30 * MINUTE_MS), "09:30");
        assert_eq!(format_time_of_day(DAY_MS), "24:00");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::OverrideSet {
            staff_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
            hours: vec![Span::new(9 * 3_600_000, 12 * 3_600_000)],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
