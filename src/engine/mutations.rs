//! Write-path operations: listings, calendar blocks, and the booking
//! lifecycle. Every mutation follows the same shape: validate, take the
//! vehicle write lock, journal the event, apply it to memory, notify.

use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::cancellation::refund_terms;
use crate::inspection::{self, ConditionReport};
use crate::lifecycle::{Action, next_status};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::quote_breakdown;

use super::calendar::{Occupancy, check_free, now_ms, validate_range};
use super::{AlertKind, Engine, EngineError, IntegrityAlert, JournalCommand};

impl Engine {
    /// Register a vehicle so its calendar can take bookings and blocks.
    pub async fn list_vehicle(
        &self,
        id: Ulid,
        owner_id: Ulid,
        daily_rate: Cents,
        deposit: Cents,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if daily_rate <= 0 {
            return Err(EngineError::Validation("daily rate must be positive"));
        }
        if deposit < 0 {
            return Err(EngineError::Validation("deposit must not be negative"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VehicleListed { id, owner_id, daily_rate, deposit };
        self.journal_append(&event).await?;
        let vs = VehicleState::new(id, owner_id, daily_rate, deposit);
        self.state.insert(id, Arc::new(RwLock::new(vs)));
        self.notify.send(id, &event);
        metrics::gauge!(observability::VEHICLES_ACTIVE).set(self.state.len() as f64);
        tracing::info!(vehicle = %id, rate = daily_rate, "vehicle listed");
        Ok(())
    }

    /// Remove a vehicle and its calendar. Refused while any booking is
    /// pending, confirmed, or in progress.
    pub async fn retire_vehicle(&self, id: Ulid, owner_id: Ulid) -> Result<(), EngineError> {
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let entity_ids: Vec<Ulid> = {
            let guard = vs.read().await;
            if guard.owner_id != owner_id {
                return Err(EngineError::NotOwner(owner_id));
            }
            if guard.bookings.values().any(|b| b.status.holds_calendar()) {
                return Err(EngineError::HasActiveBookings(id));
            }
            guard
                .bookings
                .keys()
                .copied()
                .chain(guard.entries.iter().map(|e| e.id))
                .collect()
        };

        let event = Event::VehicleRetired { id };
        self.journal_append(&event).await?;
        self.state.remove(&id);
        for entity_id in entity_ids {
            self.entity_to_vehicle.remove(&entity_id);
        }
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(observability::VEHICLES_ACTIVE).set(self.state.len() as f64);
        tracing::info!(vehicle = %id, "vehicle retired");
        Ok(())
    }

    /// Mark date ranges unavailable for maintenance or personal use.
    /// All-or-nothing: if any range collides with a booking or hold,
    /// nothing is blocked. Blocks may overlap existing blocks.
    pub async fn block_dates(
        &self,
        vehicle_id: Ulid,
        owner_id: Ulid,
        ranges: &[(Ms, Ms)],
        reason: BlockReason,
        note: Option<String>,
    ) -> Result<Vec<BlockedIntervalInfo>, EngineError> {
        self.timed(
            "block_dates",
            self.do_block_dates(vehicle_id, owner_id, ranges, reason, note),
        )
        .await
    }

    async fn do_block_dates(
        &self,
        vehicle_id: Ulid,
        owner_id: Ulid,
        ranges: &[(Ms, Ms)],
        reason: BlockReason,
        note: Option<String>,
    ) -> Result<Vec<BlockedIntervalInfo>, EngineError> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        if ranges.len() > MAX_SPANS_PER_BLOCK {
            return Err(EngineError::LimitExceeded("too many spans in one request"));
        }
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN {
                return Err(EngineError::LimitExceeded("note too long"));
            }
        let mut spans = Vec::with_capacity(ranges.len());
        for &(start, end) in ranges {
            spans.push(validate_range(start, end)?);
        }

        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.owner_id != owner_id {
            return Err(EngineError::NotOwner(owner_id));
        }
        if guard.entries.len() + spans.len() > MAX_ENTRIES_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many calendar entries"));
        }

        // Phase 1: every span must clear the bookings before any block lands.
        let now = now_ms();
        for span in &spans {
            check_free(&guard, span, now, Occupancy::BookingsOnly)?;
        }

        // Phase 2: all validated, commit one event per span.
        let mut blocked = Vec::with_capacity(spans.len());
        for span in spans {
            let id = Ulid::new();
            let event = Event::DatesBlocked {
                id,
                vehicle_id,
                span,
                reason,
                note: note.clone(),
            };
            self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
            blocked.push(BlockedIntervalInfo { id, vehicle_id, span, reason, note: note.clone() });
        }
        tracing::info!(vehicle = %vehicle_id, spans = blocked.len(), "dates blocked");
        Ok(blocked)
    }

    /// Release owner blocks. Unknown or already-released ids are ignored
    /// so a retried release stays idempotent.
    pub async fn unblock_dates(
        &self,
        vehicle_id: Ulid,
        owner_id: Ulid,
        block_ids: &[Ulid],
    ) -> Result<(), EngineError> {
        self.timed(
            "unblock_dates",
            self.do_unblock_dates(vehicle_id, owner_id, block_ids),
        )
        .await
    }

    async fn do_unblock_dates(
        &self,
        vehicle_id: Ulid,
        owner_id: Ulid,
        block_ids: &[Ulid],
    ) -> Result<(), EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.owner_id != owner_id {
            return Err(EngineError::NotOwner(owner_id));
        }

        for id in block_ids {
            let is_block = guard
                .entries
                .iter()
                .find(|e| e.id == *id)
                .map(|e| matches!(e.kind, EntryKind::Blocked { .. }));
            match is_block {
                Some(true) => {
                    let event = Event::DatesUnblocked { id: *id, vehicle_id };
                    self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
                }
                Some(false) => return Err(EngineError::Validation("not a block id")),
                None => {
                    if let Some(other) = self.vehicle_for_entity(id)
                        && other != vehicle_id {
                            return Err(EngineError::Validation("block belongs to a different vehicle"));
                        }
                }
            }
        }
        Ok(())
    }

    /// Place a booking request. The dates are held against the calendar
    /// until the owner answers or the hold lapses; payment is authorized
    /// but not captured.
    #[allow(clippy::too_many_arguments)]
    pub async fn reserve(
        &self,
        vehicle_id: Ulid,
        renter_id: Ulid,
        start: Ms,
        end: Ms,
        pickup_location: String,
        return_location: String,
        promo_code: Option<&str>,
    ) -> Result<Booking, EngineError> {
        self.timed(
            "reserve",
            self.do_reserve(
                vehicle_id,
                renter_id,
                start,
                end,
                pickup_location,
                return_location,
                promo_code,
            ),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn do_reserve(
        &self,
        vehicle_id: Ulid,
        renter_id: Ulid,
        start: Ms,
        end: Ms,
        pickup_location: String,
        return_location: String,
        promo_code: Option<&str>,
    ) -> Result<Booking, EngineError> {
        let span = validate_range(start, end)?;
        if pickup_location.is_empty() || return_location.is_empty() {
            return Err(EngineError::Validation("pickup and return locations are required"));
        }
        if pickup_location.len() > MAX_LOCATION_LEN || return_location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
        let promo = self.resolve_promo(promo_code)?;

        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let (owner_id, daily_rate, deposit) = {
            let guard = vs.read().await;
            (guard.owner_id, guard.daily_rate, guard.deposit)
        };
        if renter_id == owner_id {
            return Err(EngineError::Validation("owner cannot rent their own vehicle"));
        }
        if !self
            .upstream_call("verify_renter", self.identity.is_verified_renter(renter_id))
            .await?
        {
            return Err(EngineError::UnverifiedRenter(renter_id));
        }
        let price = quote_breakdown(daily_rate, span, &self.config.fees, promo)?;

        let mut guard = vs.write().await;
        if guard.entries.len() >= MAX_ENTRIES_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many calendar entries"));
        }
        let now = now_ms();
        check_free(&guard, &span, now, Occupancy::Everything)?;

        let id = Ulid::new();
        // Authorization runs under the vehicle lock: the dates must not
        // be reservable by anyone else while the gateway decides, and a
        // declined card must leave no hold behind.
        self.upstream_call(
            "authorize",
            self.payments.authorize(id, renter_id, price.total, deposit),
        )
        .await?;

        let booking = Booking {
            id,
            vehicle_id,
            renter_id,
            owner_id,
            span,
            status: BookingStatus::Pending,
            price,
            caution_amount: deposit,
            pickup_location,
            return_location,
            created_at: now,
            payment_ref: None,
            check_in: None,
            check_out: None,
            cancellation: None,
            condition_charges: None,
            closed_note: None,
        };
        let event = Event::BookingRequested {
            booking: booking.clone(),
            hold_expires_at: now + self.config.hold_ttl_ms,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::info!(
            booking = %id,
            vehicle = %vehicle_id,
            total = booking.price.total,
            "reservation placed"
        );
        Ok(booking)
    }

    /// Owner accepts a pending request. Payment is captured before the
    /// confirmation is journaled; a failed capture leaves the booking
    /// pending so the owner can retry.
    pub async fn accept_booking(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
    ) -> Result<Booking, EngineError> {
        self.timed("accept_booking", self.do_accept_booking(booking_id, owner_id))
            .await
    }

    async fn do_accept_booking(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let now = now_ms();
        let status = self
            .settle_lapsed_hold(vehicle_id, &mut guard, booking_id, now)
            .await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.owner_id != owner_id {
            return Err(EngineError::NotOwner(owner_id));
        }
        next_status(status, Action::Accept)?;
        let total = booking.price.total;

        // Capture runs under the vehicle lock so the sweep cannot expire
        // the hold while the gateway is mid-capture.
        let payment_ref = self
            .upstream_call("capture", self.payments.capture(booking_id, total))
            .await?;
        let event = Event::BookingAccepted { id: booking_id, vehicle_id, payment_ref };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::info!(booking = %booking_id, "booking confirmed");
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Owner declines a pending request. The hold is released; nothing
    /// was captured, so the authorization lapses on its own.
    pub async fn reject_booking(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
        reason: &str,
    ) -> Result<Booking, EngineError> {
        self.timed(
            "reject_booking",
            self.do_reject_booking(booking_id, owner_id, reason),
        )
        .await
    }

    async fn do_reject_booking(
        &self,
        booking_id: Ulid,
        owner_id: Ulid,
        reason: &str,
    ) -> Result<Booking, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let now = now_ms();
        let status = self
            .settle_lapsed_hold(vehicle_id, &mut guard, booking_id, now)
            .await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.owner_id != owner_id {
            return Err(EngineError::NotOwner(owner_id));
        }
        next_status(status, Action::Reject)?;

        let event = Event::BookingRejected {
            id: booking_id,
            vehicle_id,
            reason: reason.to_owned(),
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::info!(booking = %booking_id, "booking rejected");
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Cancel a booking before or during the rental. Either participant
    /// may cancel; the refund split follows the time-tiered policy and a
    /// failed refund instruction never blocks the cancellation itself.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        reason: &str,
    ) -> Result<(Booking, Cancellation), EngineError> {
        self.timed(
            "cancel_booking",
            self.do_cancel_booking(booking_id, actor_id, reason),
        )
        .await
    }

    async fn do_cancel_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        reason: &str,
    ) -> Result<(Booking, Cancellation), EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let now = now_ms();
        let status = self
            .settle_lapsed_hold(vehicle_id, &mut guard, booking_id, now)
            .await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let cancelled_by = if actor_id == booking.renter_id {
            CancelledBy::Renter
        } else if actor_id == booking.owner_id {
            CancelledBy::Owner
        } else {
            return Err(EngineError::NotParticipant(actor_id));
        };
        next_status(status, Action::Cancel)?;
        let total = booking.price.total;
        let trip_start = booking.span.start;

        let terms = refund_terms(total, trip_start, now, status == BookingStatus::Pending);
        // Money moves only for accepted bookings: before acceptance the
        // charge was authorized, never captured.
        let refund_status = if status == BookingStatus::Pending || terms.refund_amount == 0 {
            RefundStatus::Settled
        } else {
            match self
                .upstream_call("refund", self.payments.refund(booking_id, terms.refund_amount))
                .await
            {
                Ok(()) => RefundStatus::Instructed,
                Err(err) => {
                    tracing::warn!(
                        booking = %booking_id,
                        error = %err,
                        "refund instruction failed, queued for review"
                    );
                    self.push_alert(IntegrityAlert {
                        booking_id,
                        vehicle_id,
                        kind: AlertKind::RefundNotInstructed { amount: terms.refund_amount },
                        noted_at: now,
                    });
                    RefundStatus::InstructionFailed
                }
            }
        };

        let cancellation = Cancellation {
            booking_id,
            cancelled_by,
            reason: reason.to_owned(),
            cancelled_at: now,
            days_before_start: terms.days_before_start,
            refund_percentage: terms.refund_percentage,
            refund_amount: terms.refund_amount,
            fee_amount: terms.fee_amount,
            refund_status,
        };
        let event = Event::BookingCancelled {
            id: booking_id,
            vehicle_id,
            cancellation: cancellation.clone(),
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::info!(
            booking = %booking_id,
            refund = terms.refund_amount,
            fee = terms.fee_amount,
            "booking cancelled"
        );
        let updated = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok((updated, cancellation))
    }

    /// Record the handover inspection at pickup. Moves the booking from
    /// confirmed to in progress.
    pub async fn record_check_in(
        &self,
        booking_id: Ulid,
        record: CheckRecord,
    ) -> Result<Booking, EngineError> {
        self.timed("record_check_in", self.do_record_check_in(booking_id, record))
            .await
    }

    async fn do_record_check_in(
        &self,
        booking_id: Ulid,
        record: CheckRecord,
    ) -> Result<Booking, EngineError> {
        validate_check_record(&record)?;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let status = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .status;
        next_status(status, Action::CheckIn)?;

        let event = Event::CheckInRecorded { id: booking_id, vehicle_id, record };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::info!(booking = %booking_id, "check-in recorded");
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Record the return inspection, compare it against check-in, and
    /// settle condition charges. Completes the booking and frees the
    /// remaining calendar dates.
    pub async fn record_check_out(
        &self,
        booking_id: Ulid,
        record: CheckRecord,
    ) -> Result<(Booking, ConditionReport), EngineError> {
        self.timed(
            "record_check_out",
            self.do_record_check_out(booking_id, record),
        )
        .await
    }

    async fn do_record_check_out(
        &self,
        booking_id: Ulid,
        record: CheckRecord,
    ) -> Result<(Booking, ConditionReport), EngineError> {
        validate_check_record(&record)?;
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        next_status(booking.status, Action::CheckOut)?;
        let Some(check_in) = booking.check_in.clone() else {
            return Err(EngineError::InvalidTransition {
                status: booking.status,
                action: "check-out",
            });
        };

        let report = inspection::compare_records(&check_in, &record, &self.config.condition_rates);
        let now = now_ms();
        for flag in &report.flags {
            tracing::warn!(booking = %booking_id, flag = ?flag, "condition anomaly flagged");
            self.push_alert(IntegrityAlert {
                booking_id,
                vehicle_id,
                kind: AlertKind::Condition(flag.clone()),
                noted_at: now,
            });
        }

        let event = Event::CheckOutRecorded {
            id: booking_id,
            vehicle_id,
            record,
            charges: report.charges,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::info!(
            booking = %booking_id,
            charges = report.charges.total,
            "check-out recorded"
        );
        let updated = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok((updated, report))
    }

    /// Apply the expiry transition for one pending booking whose hold
    /// has lapsed. Racing with a concurrent accept is normal and
    /// surfaces as an invalid-transition error.
    pub async fn expire_booking(&self, booking_id: Ulid, now: Ms) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let status = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .status;
        next_status(status, Action::Expire)?;
        let lapsed = guard.entries.iter().any(|e| {
            e.id == booking_id
                && matches!(e.kind, EntryKind::Hold { expires_at } if expires_at <= now)
        });
        if !lapsed {
            return Err(EngineError::Validation("hold has not lapsed"));
        }

        let event = Event::BookingExpired { id: booking_id, vehicle_id };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        tracing::debug!(booking = %booking_id, "pending hold expired");
        Ok(())
    }

    /// Scan all vehicles for lapsed holds. Returns (booking id, vehicle
    /// id) pairs; vehicles whose lock is write-held are skipped and
    /// picked up on the next sweep.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let vs = entry.value().clone();
            if let Ok(guard) = vs.try_read() {
                for e in &guard.entries {
                    if let EntryKind::Hold { expires_at } = e.kind
                        && expires_at <= now {
                            expired.push((e.id, guard.id));
                        }
                }
            }
        }
        expired
    }

    /// If the booking is pending but its hold has lapsed, apply the
    /// expiry now instead of trusting the sweep to have run. Returns the
    /// status the caller should act on.
    async fn settle_lapsed_hold(
        &self,
        vehicle_id: Ulid,
        vs: &mut VehicleState,
        booking_id: Ulid,
        now: Ms,
    ) -> Result<BookingStatus, EngineError> {
        let status = vs
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .status;
        if status != BookingStatus::Pending {
            return Ok(status);
        }
        let lapsed = vs.entries.iter().any(|e| {
            e.id == booking_id
                && matches!(e.kind, EntryKind::Hold { expires_at } if expires_at <= now)
        });
        if !lapsed {
            return Ok(status);
        }

        let event = Event::BookingExpired { id: booking_id, vehicle_id };
        self.persist_and_apply(vehicle_id, vs, &event).await?;
        tracing::debug!(booking = %booking_id, "lapsed hold settled before action");
        Ok(BookingStatus::Cancelled)
    }

    /// Rewrite the journal with only the events needed to rebuild the
    /// current state: one listing per vehicle, one block per blocked
    /// range, one request carrying the stored booking per booking.
    pub async fn snapshot_journal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let vehicle_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in vehicle_ids {
            let Some(vs) = self.get_vehicle(&id) else {
                continue;
            };
            let guard = vs.read().await;
            events.push(Event::VehicleListed {
                id: guard.id,
                owner_id: guard.owner_id,
                daily_rate: guard.daily_rate,
                deposit: guard.deposit,
            });
            for entry in &guard.entries {
                if let EntryKind::Blocked { reason, note } = &entry.kind {
                    events.push(Event::DatesBlocked {
                        id: entry.id,
                        vehicle_id: guard.id,
                        span: entry.span,
                        reason: *reason,
                        note: note.clone(),
                    });
                }
            }
            let mut bookings: Vec<&Booking> = guard.bookings.values().collect();
            bookings.sort_by_key(|b| b.id);
            for booking in bookings {
                let hold_expires_at = guard
                    .entries
                    .iter()
                    .find_map(|e| {
                        if e.id == booking.id
                            && let EntryKind::Hold { expires_at } = e.kind
                        {
                            Some(expires_at)
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                events.push(Event::BookingRequested {
                    booking: booking.clone(),
                    hold_expires_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Snapshot { events, response: tx })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))?;
        tracing::info!("journal snapshot installed");
        Ok(())
    }

    /// Records appended since the last snapshot, for the compaction loop
    /// to poll.
    pub async fn journal_records_since_snapshot(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::RecordsSinceSnapshot { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_check_record(record: &CheckRecord) -> Result<(), EngineError> {
    if record.fuel_level > 100 {
        return Err(EngineError::Validation("fuel level must be between 0 and 100"));
    }
    if !(1..=5).contains(&record.cleanliness_rating) {
        return Err(EngineError::Validation("cleanliness rating must be between 1 and 5"));
    }
    if record.odometer_reading < 0 {
        return Err(EngineError::Validation("odometer reading must not be negative"));
    }
    if record.signature.is_empty() {
        return Err(EngineError::Validation("signature required"));
    }
    if record.taken_at < MIN_VALID_TIMESTAMP_MS || record.taken_at > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if record.damages.len() > MAX_DAMAGES_PER_RECORD {
        return Err(EngineError::LimitExceeded("too many damage notations"));
    }
    if record.photos.len() > MAX_PHOTOS_PER_RECORD {
        return Err(EngineError::LimitExceeded("too many photos"));
    }
    if record.signature.len() > MAX_SIGNATURE_LEN {
        return Err(EngineError::LimitExceeded("signature too large"));
    }
    for damage in &record.damages {
        if damage.location.is_empty() || damage.description.is_empty() {
            return Err(EngineError::Validation("damage location and description required"));
        }
        if damage.location.len() > MAX_DAMAGE_TEXT_LEN
            || damage.description.len() > MAX_DAMAGE_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("damage text too long"));
        }
    }
    Ok(())
}
