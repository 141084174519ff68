use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing::quote_breakdown;

use super::calendar::{self, Occupancy, check_free, now_ms, validate_range};
use super::{Engine, EngineError};

impl Engine {
    /// Price a prospective rental without touching the calendar. The
    /// dates must be free at quote time so a renter never sees a price
    /// for a trip that cannot be booked.
    pub async fn quote(
        &self,
        vehicle_id: Ulid,
        start: Ms,
        end: Ms,
        promo_code: Option<&str>,
    ) -> Result<PriceBreakdown, EngineError> {
        self.timed("quote", self.do_quote(vehicle_id, start, end, promo_code))
            .await
    }

    async fn do_quote(
        &self,
        vehicle_id: Ulid,
        start: Ms,
        end: Ms,
        promo_code: Option<&str>,
    ) -> Result<PriceBreakdown, EngineError> {
        let span = validate_range(start, end)?;
        let promo = self.resolve_promo(promo_code)?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        check_free(&guard, &span, now_ms(), Occupancy::Everything)?;
        quote_breakdown(guard.daily_rate, span, &self.config.fees, promo)
    }

    /// Contiguous free windows within the query range, with bookings,
    /// live holds, and blocks subtracted. Adjacent free stretches are
    /// merged.
    pub async fn free_windows(
        &self,
        vehicle_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        if from >= to {
            return Err(EngineError::Validation("start date must be before end date"));
        }
        if to - from > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let vs = match self.get_vehicle(&vehicle_id) {
            Some(vs) => vs,
            None => return Ok(vec![]),
        };
        let guard = vs.read().await;
        Ok(calendar::free_windows(&guard, &Span::new(from, to), now_ms()))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let vehicle_id = self
            .vehicle_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = vs.read().await;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// All bookings for a vehicle, oldest first. Terminal bookings stay
    /// listed; they are part of the vehicle's history.
    pub async fn list_bookings(&self, vehicle_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let vs = match self.get_vehicle(&vehicle_id) {
            Some(vs) => vs,
            None => return Ok(vec![]),
        };
        let guard = vs.read().await;
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        Ok(bookings)
    }

    pub async fn list_blocks(
        &self,
        vehicle_id: Ulid,
    ) -> Result<Vec<BlockedIntervalInfo>, EngineError> {
        let vs = match self.get_vehicle(&vehicle_id) {
            Some(vs) => vs,
            None => return Ok(vec![]),
        };
        let guard = vs.read().await;
        Ok(guard
            .entries
            .iter()
            .filter_map(|e| match &e.kind {
                EntryKind::Blocked { reason, note } => Some(BlockedIntervalInfo {
                    id: e.id,
                    vehicle_id,
                    span: e.span,
                    reason: *reason,
                    note: note.clone(),
                }),
                _ => None,
            })
            .collect())
    }

    pub async fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for vs in handles {
            let guard = vs.read().await;
            out.push(VehicleInfo {
                id: guard.id,
                owner_id: guard.owner_id,
                daily_rate: guard.daily_rate,
                deposit: guard.deposit,
            });
        }
        out.sort_by_key(|v| v.id);
        out
    }

    /// Look a promo code up in the configured table. Unknown codes are
    /// rejected rather than silently priced at full rate.
    pub(super) fn resolve_promo<'a>(
        &self,
        code: Option<&'a str>,
    ) -> Result<Option<(&'a str, f64)>, EngineError> {
        let Some(code) = code else {
            return Ok(None);
        };
        if code.len() > MAX_PROMO_CODE_LEN {
            return Err(EngineError::LimitExceeded("promo code too long"));
        }
        match self.config.promos.get(code) {
            Some(fraction) => Ok(Some((code, *fraction))),
            None => Err(EngineError::Validation("unknown promo code")),
        }
    }
}
