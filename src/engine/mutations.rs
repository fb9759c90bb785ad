use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Weekday};
use tokio::sync::{oneshot, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::normalize_hours;
use super::conflict::{check_no_conflict, check_within_working_hours, validate_interval};
use super::{apply_to_staff, Engine, EngineError, WalCommand};

/// A booking request as it arrives from the booking flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub client: String,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

impl NewBooking {
    fn validate(&self) -> Result<Span, EngineError> {
        if self.client.trim().is_empty() {
            return Err(EngineError::Validation("client is required".into()));
        }
        if self.client.len() > MAX_CLIENT_LEN {
            return Err(EngineError::LimitExceeded("client too long"));
        }
        if !matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::Validation(format!(
                "new bookings must be pending or confirmed, got {}",
                self.status
            )));
        }
        validate_interval(self.start, self.end)
    }

    fn into_event(self, span: Span) -> Event {
        Event::BookingCreated {
            id: self.id,
            staff_id: self.staff_id,
            service_id: self.service_id,
            client: self.client,
            span,
            status: self.status,
        }
    }
}

/// Working hours are offsets from midnight within one day.
fn validate_hours(hours: &[Span]) -> Result<(), EngineError> {
    for h in hours {
        if h.start >= h.end {
            return Err(EngineError::InvalidInterval { start: h.start, end: h.end });
        }
        if h.start < 0 || h.end > DAY_MS {
            return Err(EngineError::Validation(format!(
                "working hours [{}, {}) must fall within one day",
                format_time_of_day(h.start.max(0)),
                format_time_of_day(h.end.min(DAY_MS))
            )));
        }
    }
    Ok(())
}

impl Engine {
    // ── Staff ────────────────────────────────────────────────

    pub async fn create_staff(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("staff name too long"));
            }
        // Serializes the existence check with the insert across the WAL await.
        let _membership = self.membership.lock().await;
        if self.staff.len() >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff"));
        }
        if self.staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StaffCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.staff.insert(id, Arc::new(RwLock::new(StaffState::new(id, name))));
        self.notify.send(id, &event);
        debug!("tenant {}: staff {id} created", self.tenant_id);
        Ok(())
    }

    pub async fn remove_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let _membership = self.membership.lock().await;
        let guard = self.lock_staff(&id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::StaffRemoved { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_to_staff.remove(&b.id);
        }
        self.staff.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        debug!("tenant {}: staff {id} removed", self.tenant_id);
        Ok(())
    }

    // ── Recurring schedule ───────────────────────────────────

    /// Merge `hours` into the weekday template of a staff member.
    pub async fn add_schedule_hours(
        &self,
        staff_id: Ulid,
        weekday: Weekday,
        hours: Vec<Span>,
    ) -> Result<(), EngineError> {
        validate_hours(&hours)?;
        let mut guard = self.lock_staff(&staff_id).await?;

        let mut combined = guard.schedule(weekday).to_vec();
        combined.extend(hours);
        let combined = normalize_hours(combined);
        if combined.len() > MAX_HOURS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many working intervals in a day"));
        }

        let event = Event::ScheduleSet { staff_id, weekday, hours: combined };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn clear_schedule(&self, staff_id: Ulid, weekday: Weekday) -> Result<(), EngineError> {
        let mut guard = self.lock_staff(&staff_id).await?;
        let event = Event::ScheduleSet { staff_id, weekday, hours: Vec::new() };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Date overrides ───────────────────────────────────────

    /// Add working hours for one date. With no hours the date becomes an
    /// explicit closed day (or keeps its existing override unchanged).
    pub async fn add_override_hours(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        hours: Vec<Span>,
    ) -> Result<(), EngineError> {
        validate_hours(&hours)?;
        let mut guard = self.lock_staff(&staff_id).await?;

        let existing = guard.overrides.get(&date);
        if existing.is_none() && guard.overrides.len() >= MAX_OVERRIDES_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many overrides"));
        }
        let mut combined = existing.cloned().unwrap_or_default();
        combined.extend(hours);
        let combined = normalize_hours(combined);
        if combined.len() > MAX_HOURS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many working intervals in a day"));
        }

        let event = Event::OverrideSet { staff_id, date, hours: combined };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Remove an override so the weekly template applies again.
    /// Returns whether an override existed.
    pub async fn clear_override(&self, staff_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let mut guard = self.lock_staff(&staff_id).await?;
        if !guard.overrides.contains_key(&date) {
            return Ok(false);
        }
        let event = Event::OverrideCleared { staff_id, date };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Check and insert under one staff write lock, so two concurrent
    /// requests for the same interval cannot both succeed.
    pub async fn create_booking(&self, booking: NewBooking) -> Result<(), EngineError> {
        let span = booking.validate()?;
        if self.booking_to_staff.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        let mut guard = self.lock_staff(&booking.staff_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many bookings on staff"));
        }
        // Re-check under the lock: a concurrent writer may have used the id.
        if self.booking_to_staff.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }

        check_within_working_hours(&guard, &span)?;
        check_no_conflict(&guard, &span, None)?;

        let id = booking.id;
        let event = booking.into_event(span);
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("tenant {}: booking {id} created on staff {}", self.tenant_id, guard.id);
        Ok(())
    }

    /// Atomically create multiple bookings. All-or-nothing: if any booking
    /// conflicts (with stored bookings or with another in the batch), none are
    /// committed. Bookings may span different staff.
    pub async fn create_bookings(&self, bookings: Vec<NewBooking>) -> Result<(), EngineError> {
        if bookings.is_empty() {
            return Ok(());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut spans = Vec::with_capacity(bookings.len());
        let mut ids = HashSet::new();
        for b in &bookings {
            spans.push(b.validate()?);
            if !ids.insert(b.id) || self.booking_to_staff.contains_key(&b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut staff_ids: Vec<Ulid> = bookings.iter().map(|b| b.staff_id).collect();
        staff_ids.sort();
        staff_ids.dedup();

        let mut guards = Vec::with_capacity(staff_ids.len());
        let mut slot_of = HashMap::new();
        for sid in &staff_ids {
            let guard = self.lock_staff(sid).await?;
            if guard.bookings.len() + bookings.len() > MAX_BOOKINGS_PER_STAFF {
                return Err(EngineError::LimitExceeded("too many bookings on staff"));
            }
            slot_of.insert(*sid, guards.len());
            guards.push(guard);
        }
        for b in &bookings {
            if self.booking_to_staff.contains_key(&b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
        }

        // Phase 1: validate everything against current state and each other.
        for (i, (b, span)) in bookings.iter().zip(&spans).enumerate() {
            let guard = &guards[slot_of[&b.staff_id]];
            check_within_working_hours(guard, span)?;
            check_no_conflict(guard, span, None)?;
            for (other, other_span) in bookings.iter().zip(&spans).skip(i + 1) {
                if other.staff_id == b.staff_id && other_span.overlaps(span) {
                    return Err(EngineError::Conflict(b.id));
                }
            }
        }

        // Phase 2: commit the batch as a single WAL record.
        let events: Vec<Event> = bookings
            .into_iter()
            .zip(spans)
            .map(|(b, span)| b.into_event(span))
            .collect();
        self.wal_append(&Event::BookingsCreated { bookings: events.clone() }).await?;
        for event in &events {
            let idx = slot_of[&event.staff_id()];
            apply_to_staff(&mut guards[idx], event, &self.booking_to_staff);
            self.notify.send(guards[idx].id, event);
        }
        Ok(())
    }

    /// Move a booking along the status lattice.
    pub async fn set_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let from = guard
            .booking(id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(id))?;
        if !from.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { id, from, to: status });
        }
        let staff_id = guard.id;
        let event = Event::BookingStatusChanged { id, staff_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("tenant {}: booking {id} {from} -> {status}", self.tenant_id);
        Ok(staff_id)
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_booking_status(id, BookingStatus::Confirmed).await
    }

    /// Status transition only; the booking row is kept.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await
    }

    pub async fn complete_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_booking_status(id, BookingStatus::Completed).await
    }

    /// Move a booking to `[start, end)`, optionally onto another staff member.
    /// The booking's own current interval never counts as a conflict.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
        to_staff: Option<Ulid>,
    ) -> Result<Ulid, EngineError> {
        let span = validate_interval(start, end)?;

        for _ in 0..MAX_LOCK_RETRIES {
            let from_id = self
                .get_staff_for_booking(&id)
                .ok_or(EngineError::NotFound(id))?;
            let target_id = to_staff.unwrap_or(from_id);

            if target_id == from_id {
                let from_st = self.require_staff(&from_id)?;
                let mut guard = from_st.clone().write_owned().await;
                if !self.is_current(&from_id, &from_st) {
                    continue;
                }
                let Some(status) = guard.booking(id).map(|b| b.status) else {
                    continue;
                };
                check_reschedulable(id, status)?;
                check_within_working_hours(&guard, &span)?;
                check_no_conflict(&guard, &span, Some(id))?;

                let event = Event::BookingRescheduled { id, staff_id: from_id, span };
                self.persist_and_apply(&mut guard, &event).await?;
                debug!("tenant {}: booking {id} rescheduled", self.tenant_id);
                return Ok(from_id);
            }

            // Two staff: lock in id order.
            let from_st = self.require_staff(&from_id)?;
            let to_st = self.require_staff(&target_id)?;
            let (mut from, mut to) = if from_id < target_id {
                let f = from_st.clone().write_owned().await;
                (f, to_st.clone().write_owned().await)
            } else {
                let t = to_st.clone().write_owned().await;
                (from_st.clone().write_owned().await, t)
            };
            if !self.is_current(&target_id, &to_st) {
                return Err(EngineError::NotFound(target_id));
            }
            if !self.is_current(&from_id, &from_st) {
                continue;
            }
            let Some(status) = from.booking(id).map(|b| b.status) else {
                continue;
            };
            check_reschedulable(id, status)?;
            if to.bookings.len() >= MAX_BOOKINGS_PER_STAFF {
                return Err(EngineError::LimitExceeded("too many bookings on staff"));
            }
            check_within_working_hours(&to, &span)?;
            check_no_conflict(&to, &span, Some(id))?;

            let event = Event::BookingMoved { id, staff_id: from_id, to_staff_id: target_id, span };
            self.persist_move(&mut from, &mut to, &event).await?;
            debug!("tenant {}: booking {id} moved {from_id} -> {target_id}", self.tenant_id);
            return Ok(target_id);
        }
        Err(EngineError::Store(format!("booking {id} kept moving, retry later")))
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// The staff set is frozen and every staff read lock is held, in id order,
    /// until the new log is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let membership = self.membership.lock().await;
        let mut events = Vec::new();
        let mut guards = Vec::new();

        for st in self.staff_snapshot() {
            let guard = st.read_owned().await;
            events.push(Event::StaffCreated { id: guard.id, name: guard.name.clone() });
            for (weekday, hours) in WEEKDAYS.iter().zip(&guard.weekly) {
                if !hours.is_empty() {
                    events.push(Event::ScheduleSet { staff_id: guard.id, weekday: *weekday, hours: hours.clone() });
                }
            }
            for (date, hours) in &guard.overrides {
                events.push(Event::OverrideSet { staff_id: guard.id, date: *date, hours: hours.clone() });
            }
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    staff_id: guard.id,
                    service_id: b.service_id,
                    client: b.client.clone(),
                    span: b.span,
                    status: b.status,
                });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()));
        drop(guards);
        drop(membership);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn check_reschedulable(id: Ulid, status: BookingStatus) -> Result<(), EngineError> {
    match status {
        BookingStatus::Pending | BookingStatus::Confirmed => Ok(()),
        other => Err(EngineError::Validation(format!("cannot reschedule {other} booking {id}"))),
    }
}
