use chrono::{Datelike, NaiveDate};

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Working hours (offsets from midnight) that apply to `date`.
///
/// A date-specific override replaces the weekly template in full,
/// including an empty override meaning the staff member is closed.
pub fn working_hours(staff: &StaffState, date: NaiveDate) -> &[Span] {
    match staff.overrides.get(&date) {
        Some(hours) => hours,
        None => staff.schedule(date.weekday()),
    }
}

/// Bookable slots of exactly `duration` for `staff` on `date`, as absolute spans.
///
/// 1. Pick working hours (override wins, see [`working_hours`]).
/// 2. Cut each working interval into back-to-back slots, dropping a short tail.
/// 3. Drop every slot touched by a non-cancelled booking.
pub fn day_slots(staff: &StaffState, date: NaiveDate, duration: Ms) -> Vec<Span> {
    let day_start = day_start_ms(date);
    let hours: Vec<Span> = working_hours(staff, date)
        .iter()
        .map(|h| h.shifted(day_start))
        .collect();

    partition_slots(&hours, duration)
        .into_iter()
        .filter(|slot| !staff.overlapping(slot).any(|b| b.status.occupies()))
        .collect()
}

/// Partition sorted, disjoint intervals into contiguous slots of `duration`.
pub fn partition_slots(hours: &[Span], duration: Ms) -> Vec<Span> {
    if duration <= 0 {
        return Vec::new();
    }
    let mut slots = Vec::new();
    for h in hours {
        let mut cursor = h.start;
        while cursor + duration <= h.end {
            slots.push(Span::new(cursor, cursor + duration));
            cursor += duration;
        }
    }
    slots
}

/// Sort and merge so a day's hours are disjoint and ordered.
pub fn normalize_hours(mut hours: Vec<Span>) -> Vec<Span> {
    hours.sort_by_key(|s| s.start);
    merge_overlapping(&hours)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn staff() -> StaffState {
        StaffState::new(Ulid::new(), None)
    }

    fn set_schedule(st: &mut StaffState, weekday: Weekday, hours: Vec<Span>) {
        st.weekly[weekday.num_days_from_monday() as usize] = normalize_hours(hours);
    }

    fn book(st: &mut StaffState, start: Ms, end: Ms, status: BookingStatus) {
        st.insert_booking(Booking {
            id: Ulid::new(),
            service_id: Ulid::new(),
            client: "c".into(),
            span: Span::new(start, end),
            status,
        });
    }

    // ── partition_slots ───────────────────────────────────

    #[test]
    fn partition_drops_short_tail() {
        let slots = partition_slots(&[Span::new(0, 100 * M)], 30 * M);
        assert_eq!(
            slots,
            vec![Span::new(0, 30 * M), Span::new(30 * M, 60 * M), Span::new(60 * M, 90 * M)]
        );
    }

    #[test]
    fn partition_interval_shorter_than_duration() {
        assert!(partition_slots(&[Span::new(0, 20 * M)], 30 * M).is_empty());
    }

    #[test]
    fn partition_each_interval_separately() {
        let slots = partition_slots(&[Span::new(0, 45 * M), Span::new(60 * M, 90 * M)], 30 * M);
        assert_eq!(slots, vec![Span::new(0, 30 * M), Span::new(60 * M, 90 * M)]);
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    #[test]
    fn normalize_sorts_first() {
        let hours = vec![Span::new(13 * H, 17 * H), Span::new(9 * H, 12 * H), Span::new(11 * H, 13 * H)];
        assert_eq!(normalize_hours(hours), vec![Span::new(9 * H, 17 * H)]);
    }

    // ── working_hours / day_slots ─────────────────────────

    #[test]
    fn saturday_override_opens_closed_day() {
        // 2026-02-14 is a Saturday; no recurring Saturday hours.
        let d = date(2026, 2, 14);
        assert_eq!(d.weekday(), Weekday::Sat);
        let mut st = staff();
        set_schedule(&mut st, Weekday::Fri, vec![Span::new(8 * H, 18 * H)]);
        st.overrides.insert(d, vec![Span::new(9 * H, 12 * H)]);

        let base = day_start_ms(d);
        let slots = day_slots(&st, d, 30 * M);
        let expected: Vec<Span> = (0..6)
            .map(|i| Span::new(base + 9 * H + i * 30 * M, base + 9 * H + (i + 1) * 30 * M))
            .collect();
        assert_eq!(slots, expected);
    }

    #[test]
    fn override_replaces_template_entirely() {
        let d = date(2026, 3, 2); // Monday
        let mut st = staff();
        set_schedule(&mut st, Weekday::Mon, vec![Span::new(9 * H, 17 * H)]);
        st.overrides.insert(d, vec![Span::new(14 * H, 15 * H)]);

        let base = day_start_ms(d);
        assert_eq!(
            day_slots(&st, d, 60 * M),
            vec![Span::new(base + 14 * H, base + 15 * H)]
        );
    }

    #[test]
    fn empty_override_closes_day() {
        let d = date(2026, 3, 2);
        let mut st = staff();
        set_schedule(&mut st, Weekday::Mon, vec![Span::new(9 * H, 17 * H)]);
        st.overrides.insert(d, vec![]);
        assert!(working_hours(&st, d).is_empty());
        assert!(day_slots(&st, d, 30 * M).is_empty());
    }

    #[test]
    fn override_only_affects_its_date() {
        let d = date(2026, 3, 2);
        let mut st = staff();
        set_schedule(&mut st, Weekday::Mon, vec![Span::new(9 * H, 10 * H)]);
        st.overrides.insert(d, vec![]);
        let next_monday = date(2026, 3, 9);
        assert_eq!(day_slots(&st, next_monday, 60 * M).len(), 1);
    }

    #[test]
    fn override_outside_business_hours_is_honoured() {
        let d = date(2026, 3, 2);
        let mut st = staff();
        st.overrides.insert(d, vec![Span::new(22 * H, 24 * H)]);
        let base = day_start_ms(d);
        assert_eq!(
            day_slots(&st, d, 60 * M),
            vec![Span::new(base + 22 * H, base + 23 * H), Span::new(base + 23 * H, base + 24 * H)]
        );
    }

    #[test]
    fn partially_overlapping_booking_removes_whole_slot() {
        let d = date(2026, 3, 3); // Tuesday
        let mut st = staff();
        set_schedule(&mut st, Weekday::Tue, vec![Span::new(9 * H, 11 * H)]);
        let base = day_start_ms(d);
        // 09:45-10:15 touches the 09:30 and 10:00 slots
        book(&mut st, base + 9 * H + 45 * M, base + 10 * H + 15 * M, BookingStatus::Confirmed);

        let slots = day_slots(&st, d, 30 * M);
        assert_eq!(
            slots,
            vec![
                Span::new(base + 9 * H, base + 9 * H + 30 * M),
                Span::new(base + 10 * H + 30 * M, base + 11 * H),
            ]
        );
    }

    #[test]
    fn cancelled_booking_frees_slot_but_pending_does_not() {
        let d = date(2026, 3, 3);
        let mut st = staff();
        set_schedule(&mut st, Weekday::Tue, vec![Span::new(9 * H, 11 * H)]);
        let base = day_start_ms(d);
        book(&mut st, base + 9 * H, base + 10 * H, BookingStatus::Cancelled);
        book(&mut st, base + 10 * H, base + 11 * H, BookingStatus::Pending);

        assert_eq!(day_slots(&st, d, 60 * M), vec![Span::new(base + 9 * H, base + 10 * H)]);
    }

    #[test]
    fn touching_booking_keeps_neighbour_slot() {
        let d = date(2026, 3, 3);
        let mut st = staff();
        set_schedule(&mut st, Weekday::Tue, vec![Span::new(9 * H, 11 * H)]);
        let base = day_start_ms(d);
        book(&mut st, base + 10 * H, base + 11 * H, BookingStatus::Confirmed);
        assert_eq!(day_slots(&st, d, 60 * M), vec![Span::new(base + 9 * H, base + 10 * H)]);
    }

    #[test]
    fn slots_are_ordered_disjoint_and_inside_hours() {
        let d = date(2026, 3, 4); // Wednesday
        let mut st = staff();
        set_schedule(
            &mut st,
            Weekday::Wed,
            vec![Span::new(13 * H, 17 * H), Span::new(8 * H, 12 * H + 10 * M)],
        );
        let base = day_start_ms(d);
        book(&mut st, base + 14 * H, base + 14 * H + 20 * M, BookingStatus::Confirmed);

        let slots = day_slots(&st, d, 45 * M);
        assert!(!slots.is_empty());
        for pair in slots.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        let hours: Vec<Span> = working_hours(&st, d).iter().map(|h| h.shifted(base)).collect();
        for slot in &slots {
            assert_eq!(slot.duration_ms(), 45 * M);
            assert!(hours.iter().any(|h| h.contains_span(slot)));
        }
    }

    #[test]
    fn day_slots_is_idempotent() {
        let d = date(2026, 3, 4);
        let mut st = staff();
        set_schedule(&mut st, Weekday::Wed, vec![Span::new(9 * H, 17 * H)]);
        let base = day_start_ms(d);
        book(&mut st, base + 11 * H, base + 12 * H, BookingStatus::Pending);
        assert_eq!(day_slots(&st, d, 30 * M), day_slots(&st, d, 30 * M));
    }

    #[test]
    fn no_hours_no_slots() {
        let st = staff();
        assert!(day_slots(&st, date(2026, 3, 4), 30 * M).is_empty());
    }
}
