use ulid::Ulid;

use crate::model::*;

use super::availability::working_hours;
use super::EngineError;

/// Build a booking span, rejecting `start >= end` and out-of-range instants.
pub fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(Span::new(start, end))
}

/// First booking that blocks `span`, ignoring `exclude`.
///
/// Pending, confirmed and completed bookings block; cancelled ones never do.
/// Overlap is half-open, so bookings that only touch `span` are not conflicts.
pub fn find_conflict(staff: &StaffState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    staff
        .overlapping(span)
        .find(|b| b.status.occupies() && Some(b.id) != exclude)
        .map(|b| b.id)
}

pub fn check_no_conflict(staff: &StaffState, span: &Span, exclude: Option<Ulid>) -> Result<(), EngineError> {
    match find_conflict(staff, span, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}

/// The span must sit inside a single working interval of its own day.
pub fn check_within_working_hours(staff: &StaffState, span: &Span) -> Result<(), EngineError> {
    let outside = || EngineError::OutsideWorkingHours { staff_id: staff.id, span: *span };
    let date = date_of(span.start).ok_or_else(outside)?;
    let day_start = day_start_ms(date);
    let covered = working_hours(staff, date)
        .iter()
        .any(|h| h.shifted(day_start).contains_span(span));
    if covered { Ok(()) } else { Err(outside()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn base() -> Ms {
        day_start_ms(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()) // Tuesday
    }

    fn staff_with(bookings: &[(Ms, Ms, BookingStatus)]) -> (StaffState, Vec<Ulid>) {
        let mut st = StaffState::new(Ulid::new(), None);
        let mut ids = Vec::new();
        for &(start, end, status) in bookings {
            let id = Ulid::new();
            ids.push(id);
            st.insert_booking(Booking {
                id,
                service_id: Ulid::new(),
                client: "c".into(),
                span: Span::new(start, end),
                status,
            });
        }
        (st, ids)
    }

    #[test]
    fn rejects_inverted_and_empty_intervals() {
        let b = base();
        assert!(matches!(validate_interval(b + H, b), Err(EngineError::InvalidInterval { .. })));
        assert!(matches!(validate_interval(b, b), Err(EngineError::InvalidInterval { .. })));
        assert!(matches!(validate_interval(0, 10), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(validate_interval(b, b + 2 * 24 * H), Err(EngineError::LimitExceeded(_))));
        assert_eq!(validate_interval(b, b + H).unwrap(), Span::new(b, b + H));
    }

    #[test]
    fn partial_overlap_conflicts() {
        let b = base();
        let (st, ids) = staff_with(&[(b + 10 * H, b + 10 * H + 30 * M, BookingStatus::Confirmed)]);
        let req = Span::new(b + 10 * H + 15 * M, b + 10 * H + 45 * M);
        assert_eq!(find_conflict(&st, &req, None), Some(ids[0]));
    }

    #[test]
    fn touching_is_not_a_conflict() {
        let b = base();
        let (st, _) = staff_with(&[(b + 10 * H, b + 10 * H + 30 * M, BookingStatus::Confirmed)]);
        let after = Span::new(b + 10 * H + 30 * M, b + 11 * H);
        let before = Span::new(b + 9 * H + 30 * M, b + 10 * H);
        assert_eq!(find_conflict(&st, &after, None), None);
        assert_eq!(find_conflict(&st, &before, None), None);
    }

    #[test]
    fn enclosing_request_conflicts() {
        let b = base();
        let (st, ids) = staff_with(&[(b + 10 * H, b + 10 * H + 30 * M, BookingStatus::Pending)]);
        assert_eq!(find_conflict(&st, &Span::new(b + 9 * H, b + 12 * H), None), Some(ids[0]));
    }

    #[test]
    fn cancelled_bookings_never_conflict() {
        let b = base();
        let (st, _) = staff_with(&[(b + 10 * H, b + 11 * H, BookingStatus::Cancelled)]);
        assert!(check_no_conflict(&st, &Span::new(b + 10 * H, b + 11 * H), None).is_ok());
    }

    #[test]
    fn excluded_booking_is_ignored() {
        let b = base();
        let (st, ids) = staff_with(&[
            (b + 10 * H, b + 10 * H + 30 * M, BookingStatus::Confirmed),
            (b + 11 * H, b + 12 * H, BookingStatus::Confirmed),
        ]);
        let moved = Span::new(b + 10 * H + 15 * M, b + 10 * H + 45 * M);
        assert_eq!(find_conflict(&st, &moved, Some(ids[0])), None);

        let into_other = Span::new(b + 10 * H + 45 * M, b + 11 * H + 15 * M);
        assert_eq!(find_conflict(&st, &into_other, Some(ids[0])), Some(ids[1]));
    }

    #[test]
    fn working_hours_cover_check() {
        let b = base();
        let mut st = StaffState::new(Ulid::new(), None);
        st.weekly[Weekday::Tue.num_days_from_monday() as usize] =
            vec![Span::new(9 * H, 12 * H), Span::new(13 * H, 17 * H)];

        assert!(check_within_working_hours(&st, &Span::new(b + 9 * H, b + 12 * H)).is_ok());
        assert!(check_within_working_hours(&st, &Span::new(b + 16 * H, b + 17 * H)).is_ok());
        // straddles the lunch gap
        assert!(matches!(
            check_within_working_hours(&st, &Span::new(b + 11 * H + 30 * M, b + 13 * H + 30 * M)),
            Err(EngineError::OutsideWorkingHours { .. })
        ));
        // next day (Wednesday) has no hours
        assert!(check_within_working_hours(&st, &Span::new(b + 24 * H + 9 * H, b + 24 * H + 10 * H)).is_err());
    }
}
