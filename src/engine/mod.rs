mod calendar;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::{BusyReason, EngineError};

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::gateway::{GatewayError, IdentityProvider, PaymentGateway};
use crate::inspection::IntegrityFlag;
use crate::journal::Journal;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Snapshot {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    RecordsSinceSnapshot {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends for group
/// commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut journal, &mut batch);
                            handle_non_append(&mut journal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut journal, &mut batch);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(journal: &mut Journal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(journal: &mut Journal, batch: &mut [PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = journal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Snapshot { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.install_snapshot());
            let _ = response.send(result);
        }
        JournalCommand::RecordsSinceSnapshot { response } => {
            let _ = response.send(journal.records_since_snapshot());
        }
        JournalCommand::Append { .. } => unreachable!(),
    }
}

// ── Operator review queue ────────────────────────────────

/// Anything a human should look at before money moves again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    /// Condition anomaly from the check-out comparison.
    Condition(IntegrityFlag),
    /// Refund instruction was not acknowledged by the gateway.
    RefundNotInstructed { amount: Cents },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityAlert {
    pub booking_id: Ulid,
    pub vehicle_id: Ulid,
    pub kind: AlertKind,
    pub noted_at: Ms,
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub state: DashMap<Ulid, SharedVehicleState>,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking or block id → vehicle id.
    pub(super) entity_to_vehicle: DashMap<Ulid, Ulid>,
    pub(super) config: EngineConfig,
    pub(super) payments: Arc<dyn PaymentGateway>,
    pub(super) identity: Arc<dyn IdentityProvider>,
    alerts: Mutex<VecDeque<IntegrityAlert>>,
}

/// Apply an event directly to a VehicleState (no locking, caller holds
/// the lock). Guards already ran; events in the journal are truth.
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::DatesBlocked {
            id,
            vehicle_id,
            span,
            reason,
            note,
        } => {
            vs.insert_entry(CalendarEntry {
                id: *id,
                span: *span,
                kind: EntryKind::Blocked {
                    reason: *reason,
                    note: note.clone(),
                },
            });
            entity_map.insert(*id, *vehicle_id);
        }
        Event::DatesUnblocked { id, .. } => {
            vs.remove_entry(*id);
            entity_map.remove(id);
        }
        Event::BookingRequested {
            booking,
            hold_expires_at,
        } => {
            // Status-aware so a snapshot can rebuild any booking from this
            // one event: live requests are always pending.
            match booking.status {
                BookingStatus::Pending => vs.insert_entry(CalendarEntry {
                    id: booking.id,
                    span: booking.span,
                    kind: EntryKind::Hold {
                        expires_at: *hold_expires_at,
                    },
                }),
                BookingStatus::Confirmed | BookingStatus::InProgress => {
                    vs.insert_entry(CalendarEntry {
                        id: booking.id,
                        span: booking.span,
                        kind: EntryKind::Booked,
                    })
                }
                _ => {}
            }
            vs.bookings.insert(booking.id, booking.clone());
            entity_map.insert(booking.id, booking.vehicle_id);
        }
        Event::BookingAccepted {
            id, payment_ref, ..
        } => {
            if let Some(b) = vs.bookings.get_mut(id) {
                b.status = BookingStatus::Confirmed;
                b.payment_ref = Some(payment_ref.clone());
                let span = b.span;
                vs.remove_entry(*id);
                vs.insert_entry(CalendarEntry {
                    id: *id,
                    span,
                    kind: EntryKind::Booked,
                });
            }
        }
        Event::BookingRejected { id, reason, .. } => {
            if let Some(b) = vs.bookings.get_mut(id) {
                b.status = BookingStatus::Rejected;
                b.closed_note = Some(reason.clone());
            }
            vs.remove_entry(*id);
        }
        Event::BookingCancelled {
            id, cancellation, ..
        } => {
            if let Some(b) = vs.bookings.get_mut(id) {
                b.status = BookingStatus::Cancelled;
                b.cancellation = Some(cancellation.clone());
            }
            vs.remove_entry(*id);
        }
        Event::BookingExpired { id, .. } => {
            if let Some(b) = vs.bookings.get_mut(id) {
                b.status = BookingStatus::Cancelled;
                b.closed_note = Some("hold expired".into());
            }
            vs.remove_entry(*id);
        }
        Event::CheckInRecorded { id, record, .. } => {
            if let Some(b) = vs.bookings.get_mut(id) {
                b.status = BookingStatus::InProgress;
                b.check_in = Some(record.clone());
            }
        }
        Event::CheckOutRecorded {
            id,
            record,
            charges,
            ..
        } => {
            if let Some(b) = vs.bookings.get_mut(id) {
                b.status = BookingStatus::Completed;
                b.check_out = Some(record.clone());
                b.condition_charges = Some(*charges);
            }
            vs.remove_entry(*id);
        }
        // VehicleListed/Retired are handled at the DashMap level, not here
        Event::VehicleListed { .. } | Event::VehicleRetired { .. } => {}
    }
}

impl Engine {
    pub fn new(
        journal_path: PathBuf,
        config: EngineConfig,
        payments: Arc<dyn PaymentGateway>,
        identity: Arc<dyn IdentityProvider>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            state: DashMap::new(),
            journal_tx,
            notify,
            entity_to_vehicle: DashMap::new(),
            config,
            payments,
            identity,
            alerts: Mutex::new(VecDeque::new()),
        };

        // Replay: we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context.
        for event in &events {
            match event {
                Event::VehicleListed {
                    id,
                    owner_id,
                    daily_rate,
                    deposit,
                } => {
                    let vs = VehicleState::new(*id, *owner_id, *daily_rate, *deposit);
                    engine.state.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VehicleRetired { id } => {
                    if let Some((_, arc)) = engine.state.remove(id) {
                        let vs = arc.try_read().expect("replay: uncontended read");
                        for booking_id in vs.bookings.keys() {
                            engine.entity_to_vehicle.remove(booking_id);
                        }
                        for entry in &vs.entries {
                            engine.entity_to_vehicle.remove(&entry.id);
                        }
                    }
                }
                other => {
                    if let Some(vehicle_id) = event_vehicle_id(other)
                        && let Some(entry) = engine.state.get(&vehicle_id)
                    {
                        let vs_arc = entry.value().clone();
                        let mut guard = vs_arc.try_write().expect("replay: uncontended write");
                        apply_to_vehicle(&mut guard, other, &engine.entity_to_vehicle);
                    }
                }
            }
        }
        metrics::gauge!(observability::VEHICLES_ACTIVE).set(engine.state.len() as f64);

        Ok(engine)
    }

    /// Write an event to the journal via the background group-commit writer.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn vehicle_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_vehicle.get(entity_id).map(|e| *e.value())
    }

    /// Journal-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        vehicle_id: Ulid,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_vehicle(vs, event, &self.entity_to_vehicle);
        self.notify.send(vehicle_id, event);
        Ok(())
    }

    /// Lookup booking → vehicle, get vehicle, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        let vehicle_id = self
            .vehicle_for_entity(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        Ok((vehicle_id, guard))
    }

    /// Run one collaborator call under the configured timeout, mapping
    /// failure and timeout alike onto the retryable upstream class.
    pub(super) async fn upstream_call<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.config.upstream_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "call" => call)
                    .increment(1);
                Err(EngineError::Upstream {
                    call,
                    detail: e.to_string(),
                })
            }
            Err(_) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "call" => call)
                    .increment(1);
                Err(EngineError::Upstream {
                    call,
                    detail: "timed out".into(),
                })
            }
        }
    }

    /// RED metrics around one operation.
    pub(super) async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let start = std::time::Instant::now();
        let result = fut.await;
        let status = if result.is_ok() { "ok" } else { "err" };
        metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => status)
            .increment(1);
        metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => op)
            .record(start.elapsed().as_secs_f64());
        result
    }

    pub(super) fn push_alert(&self, alert: IntegrityAlert) {
        metrics::counter!(observability::INTEGRITY_ALERTS_TOTAL).increment(1);
        self.alerts.lock().unwrap().push_back(alert);
    }

    /// Hand the queued anomalies to an operator, oldest first.
    pub fn drain_integrity_alerts(&self) -> Vec<IntegrityAlert> {
        self.alerts.lock().unwrap().drain(..).collect()
    }

    /// Live event feed for one vehicle's calendar and bookings.
    pub fn subscribe(&self, vehicle_id: Ulid) -> tokio::sync::broadcast::Receiver<Event> {
        self.notify.subscribe(vehicle_id)
    }
}

/// Extract the vehicle id from an event (for non-list/retire events).
fn event_vehicle_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::DatesBlocked { vehicle_id, .. }
        | Event::DatesUnblocked { vehicle_id, .. }
        | Event::BookingAccepted { vehicle_id, .. }
        | Event::BookingRejected { vehicle_id, .. }
        | Event::BookingCancelled { vehicle_id, .. }
        | Event::BookingExpired { vehicle_id, .. }
        | Event::CheckInRecorded { vehicle_id, .. }
        | Event::CheckOutRecorded { vehicle_id, .. } => Some(*vehicle_id),
        Event::BookingRequested { booking, .. } => Some(booking.vehicle_id),
        Event::VehicleListed { .. } | Event::VehicleRetired { .. } => None,
    }
}
