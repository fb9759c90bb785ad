use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::day_slots;
use super::conflict::{find_conflict, validate_interval};
use super::{Engine, EngineError, SharedStaffState};

impl Engine {
    /// Bookable slots for a staff member on `date`, `duration_min` minutes each.
    pub async fn get_slots(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        duration_min: u32,
    ) -> Result<Vec<Span>, EngineError> {
        if !(MIN_SERVICE_DURATION_MIN..=MAX_SERVICE_DURATION_MIN).contains(&duration_min) {
            return Err(EngineError::Validation(format!(
                "service duration must be {MIN_SERVICE_DURATION_MIN}..={MAX_SERVICE_DURATION_MIN} minutes, got {duration_min}"
            )));
        }
        let st = self.require_staff(&staff_id)?;
        let guard = st.read().await;
        Ok(day_slots(&guard, date, Ms::from(duration_min) * MINUTE_MS))
    }

    /// Read-only conflict check. `exclude` skips a booking's own interval
    /// when it is being rescheduled.
    pub async fn has_conflict(
        &self,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_interval(start, end)?;
        let st = self.require_staff(&staff_id)?;
        let guard = st.read().await;
        let conflict = find_conflict(&guard, &span, exclude).is_some();
        if conflict {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        }
        Ok(conflict)
    }

    /// Every staff member, in id order.
    pub(super) fn staff_snapshot(&self) -> Vec<SharedStaffState> {
        let mut all: Vec<(Ulid, SharedStaffState)> = self
            .staff
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, st)| st).collect()
    }

    pub async fn list_staff(&self) -> Vec<StaffInfo> {
        let mut out = Vec::with_capacity(self.staff.len());
        for st in self.staff_snapshot() {
            let guard = st.read().await;
            out.push(StaffInfo { id: guard.id, name: guard.name.clone() });
        }
        out
    }

    /// Weekly template rows, Monday first, one row per working interval.
    pub async fn get_schedule(&self, staff_id: Ulid) -> Result<Vec<ScheduleInfo>, EngineError> {
        let st = self.require_staff(&staff_id)?;
        let guard = st.read().await;
        Ok(WEEKDAYS
            .iter()
            .flat_map(|&weekday| {
                guard.schedule(weekday).iter().map(move |&hours| ScheduleInfo {
                    staff_id,
                    weekday,
                    hours,
                })
            })
            .collect())
    }

    /// Override rows by date. A closed day is one row with `hours: None`.
    pub async fn get_overrides(&self, staff_id: Ulid) -> Result<Vec<OverrideInfo>, EngineError> {
        let st = self.require_staff(&staff_id)?;
        let guard = st.read().await;
        let mut out = Vec::new();
        for (&date, hours) in &guard.overrides {
            if hours.is_empty() {
                out.push(OverrideInfo { staff_id, date, hours: None });
            }
            out.extend(hours.iter().map(|&h| OverrideInfo { staff_id, date, hours: Some(h) }));
        }
        Ok(out)
    }

    /// Bookings of one staff member, optionally limited to those touching `window`.
    pub async fn get_bookings(
        &self,
        staff_id: Ulid,
        window: Option<Span>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let st = self.require_staff(&staff_id)?;
        let guard = st.read().await;
        Ok(match window {
            Some(w) => guard
                .overlapping(&w)
                .map(|b| BookingInfo::from_booking(staff_id, b))
                .collect(),
            None => guard
                .bookings
                .iter()
                .map(|b| BookingInfo::from_booking(staff_id, b))
                .collect(),
        })
    }

    /// Bookings across every staff member of the tenant.
    pub async fn list_bookings(&self) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for st in self.staff_snapshot() {
            let guard = st.read().await;
            out.extend(guard.bookings.iter().map(|b| BookingInfo::from_booking(guard.id, b)));
        }
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let staff_id = self.get_staff_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let st = self.require_staff(&staff_id)?;
        let guard = st.read().await;
        guard
            .booking(id)
            .map(|b| BookingInfo::from_booking(staff_id, b))
            .ok_or(EngineError::NotFound(id))
    }

    /// Bookings looked up by id, skipping unknown ids.
    pub async fn get_bookings_by_id(&self, ids: &[Ulid]) -> Result<Vec<BookingInfo>, EngineError> {
        if ids.len() > MAX_IN_CLAUSE_ROWS {
            return Err(EngineError::LimitExceeded("too many booking ids"));
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_booking(*id).await {
                Ok(info) => out.push(info),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}
