mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{day_slots, merge_overlapping, normalize_hours, partition_slots, working_hours};
pub use conflict::{find_conflict, validate_interval};
pub use error::EngineError;
pub use mutations::NewBooking;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_LOCK_RETRIES;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedStaffState = Arc<RwLock<StaffState>>;
type StaffWriteGuard = tokio::sync::OwnedRwLockWriteGuard<StaffState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal<Event>, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {}: {e}", wal.path().display());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, &mut vec![(event, response)]),
    }
}

/// Scheduling state of one tenant. Every tenant gets its own engine and WAL.
pub struct Engine {
    pub tenant_id: Ulid,
    pub(super) staff: DashMap<Ulid, SharedStaffState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → staff id
    pub(super) booking_to_staff: DashMap<Ulid, Ulid>,
    /// Held while the staff set changes and for the whole of a compaction.
    pub(super) membership: Mutex<()>,
}

/// Apply a single-staff event. The caller holds the lock.
fn apply_to_staff(st: &mut StaffState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ScheduleSet { weekday, hours, .. } => {
            st.weekly[weekday.num_days_from_monday() as usize] = hours.clone();
        }
        Event::OverrideSet { date, hours, .. } => {
            st.overrides.insert(*date, hours.clone());
        }
        Event::OverrideCleared { date, .. } => {
            st.overrides.remove(date);
        }
        Event::BookingCreated { id, staff_id, service_id, client, span, status } => {
            st.insert_booking(Booking {
                id: *id,
                service_id: *service_id,
                client: client.clone(),
                span: *span,
                status: *status,
            });
            index.insert(*id, *staff_id);
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = st.booking_mut(*id) {
                b.status = *status;
            }
        }
        Event::BookingRescheduled { id, span, .. } => {
            // Re-insert to keep the start ordering.
            if let Some(mut b) = st.remove_booking(*id) {
                b.span = *span;
                st.insert_booking(b);
            }
        }
        // Handled at the DashMap level or across two staff states.
        Event::StaffCreated { .. }
        | Event::StaffRemoved { .. }
        | Event::BookingMoved { .. }
        | Event::BookingsCreated { .. } => {}
    }
}

/// Move a booking between two locked staff states.
fn apply_move(from: &mut StaffState, to: &mut StaffState, id: Ulid, span: Span, index: &DashMap<Ulid, Ulid>) {
    if let Some(mut b) = from.remove_booking(id) {
        b.span = span;
        to.insert_booking(b);
        index.insert(id, to.id);
    }
}

impl Engine {
    pub fn new(tenant_id: Ulid, wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events: Vec<Event> = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            tenant_id,
            staff: DashMap::new(),
            wal_tx,
            notify,
            booking_to_staff: DashMap::new(),
            membership: Mutex::new(()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never block here: this may run inside an async context.
        let contended = || io::Error::other("replay: contended staff lock");
        for event in &events {
            match event {
                Event::StaffCreated { id, name } => {
                    let st = StaffState::new(*id, name.clone());
                    engine.staff.insert(*id, Arc::new(RwLock::new(st)));
                }
                Event::StaffRemoved { id } => {
                    if let Some((_, st)) = engine.staff.remove(id) {
                        let guard = st.try_read().map_err(|_| contended())?;
                        for b in &guard.bookings {
                            engine.booking_to_staff.remove(&b.id);
                        }
                    }
                }
                Event::BookingsCreated { bookings } => {
                    for b in bookings {
                        if let Some(st) = engine.get_staff(&b.staff_id()) {
                            let mut guard = st.try_write().map_err(|_| contended())?;
                            apply_to_staff(&mut guard, b, &engine.booking_to_staff);
                        }
                    }
                }
                Event::BookingMoved { id, staff_id, to_staff_id, span } => {
                    if let (Some(from), Some(to)) = (engine.get_staff(staff_id), engine.get_staff(to_staff_id)) {
                        let mut from = from.try_write().map_err(|_| contended())?;
                        let mut to = to.try_write().map_err(|_| contended())?;
                        apply_move(&mut from, &mut to, *id, *span, &engine.booking_to_staff);
                    }
                }
                other => {
                    if let Some(st) = engine.get_staff(&other.staff_id()) {
                        let mut guard = st.try_write().map_err(|_| contended())?;
                        apply_to_staff(&mut guard, other, &engine.booking_to_staff);
                    }
                }
            }
        }

        info!(
            "tenant {tenant_id}: replayed {} events, {} staff",
            events.len(),
            engine.staff.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    pub fn get_staff(&self, id: &Ulid) -> Option<SharedStaffState> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    pub(super) fn require_staff(&self, id: &Ulid) -> Result<SharedStaffState, EngineError> {
        self.get_staff(id).ok_or(EngineError::NotFound(*id))
    }

    /// Whether `st` is still the registered state for `id`. A state
    /// detached by `remove_staff` must not take further writes.
    pub(super) fn is_current(&self, id: &Ulid, st: &SharedStaffState) -> bool {
        self.staff.get(id).is_some_and(|e| Arc::ptr_eq(e.value(), st))
    }

    /// Take the write lock of a live staff member.
    pub(super) async fn lock_staff(&self, id: &Ulid) -> Result<StaffWriteGuard, EngineError> {
        let st = self.require_staff(id)?;
        let guard = st.clone().write_owned().await;
        if !self.is_current(id, &st) {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    pub fn get_staff_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_staff.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        st: &mut StaffState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_staff(st, event, &self.booking_to_staff);
        self.notify.send(st.id, event);
        Ok(())
    }

    pub(super) async fn persist_move(
        &self,
        from: &mut StaffState,
        to: &mut StaffState,
        event: &Event,
    ) -> Result<(), EngineError> {
        let Event::BookingMoved { id, span, .. } = event else {
            return Err(EngineError::Store("persist_move expects BookingMoved".into()));
        };
        self.wal_append(event).await?;
        apply_move(from, to, *id, *span, &self.booking_to_staff);
        self.notify.send(from.id, event);
        self.notify.send(to.id, event);
        Ok(())
    }

    /// Lookup booking → staff, take the staff write lock, and confirm the
    /// booking is still there (it may have moved while we waited).
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<StaffWriteGuard, EngineError> {
        for _ in 0..MAX_LOCK_RETRIES {
            let staff_id = self
                .get_staff_for_booking(booking_id)
                .ok_or(EngineError::NotFound(*booking_id))?;
            let st = self.require_staff(&staff_id)?;
            let guard = st.clone().write_owned().await;
            if self.is_current(&staff_id, &st) && guard.booking(*booking_id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::Store(format!("booking {booking_id} kept moving, retry later")))
    }
}
