use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Currency minor units, the only money type.
pub type Cents = i64;

pub const MS_PER_DAY: Ms = 86_400_000;

/// Whole days from `from` to `to`, rounded toward negative infinity.
/// Negative when `to` is already behind `from`.
pub fn whole_days_between(from: Ms, to: Ms) -> i64 {
    (to - from).div_euclid(MS_PER_DAY)
}

/// Days billed for an elapsed duration: every started day counts, and a
/// sub-24h duration still bills one day.
pub fn billable_days_between(from: Ms, to: Ms) -> i64 {
    let elapsed = to - from;
    let days = elapsed.div_euclid(MS_PER_DAY)
        + if elapsed.rem_euclid(MS_PER_DAY) > 0 { 1 } else { 0 };
    days.max(1)
}

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

    pub fn billable_days(&self) -> i64 {
        billable_days_between(self.start, self.end)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Why an owner closed a date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    Maintenance,
    Manual,
    Other,
}

/// What a calendar entry occupies the vehicle with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Owner-declared unavailability. Blocks may overlap each other.
    Blocked {
        reason: BlockReason,
        note: Option<String>,
    },
    /// Soft hold backing a pending booking, kept until the owner decides
    /// or the hold expires.
    Hold { expires_at: Ms },
    /// Confirmed or in-progress rental.
    Booked,
}

/// One occupied range on a vehicle's calendar. The id is the block id or
/// the booking id the entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: Ulid,
    pub span: Span,
    pub kind: EntryKind,
}

// ── Booking ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected
        )
    }

    /// Statuses whose date range occupies the calendar.
    pub fn holds_calendar(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully itemized charge summary. Every line item is rounded to whole
/// cents on its own before summing, so
/// `total = base_price - discount + service_fee + insurance_fee + tax`
/// holds exactly and renders the same at quote time and invoice time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub daily_rate: Cents,
    pub duration_days: i64,
    pub base_price: Cents,
    pub promo_code: Option<String>,
    pub discount: Cents,
    pub service_fee: Cents,
    pub insurance_fee: Cents,
    pub tax: Cents,
    pub total: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub renter_id: Ulid,
    pub owner_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub price: PriceBreakdown,
    /// Security deposit held against the rental; never part of the total.
    pub caution_amount: Cents,
    pub pickup_location: String,
    pub return_location: String,
    pub created_at: Ms,
    /// Capture reference reported by the payment gateway on acceptance.
    pub payment_ref: Option<String>,
    pub check_in: Option<CheckRecord>,
    pub check_out: Option<CheckRecord>,
    pub cancellation: Option<Cancellation>,
    pub condition_charges: Option<ConditionCharges>,
    /// Owner's stated reason on rejection, or the expiry note.
    pub closed_note: Option<String>,
}

// ── Condition records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageItem {
    pub id: Ulid,
    pub location: String,
    pub description: String,
    pub severity: Severity,
}

/// Per-zone pass booleans from the walk-around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentChecklist {
    pub exterior: bool,
    pub interior: bool,
    pub tires: bool,
    pub lights: bool,
    pub engine_bay: bool,
}

pub type PhotoRef = String;

/// Condition snapshot taken at hand-over (check-in) or return (check-out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub odometer_reading: i64,
    /// Fuel gauge as a percentage, 0 to 100.
    pub fuel_level: u8,
    pub component_checklist: ComponentChecklist,
    pub damages: Vec<DamageItem>,
    /// 1 (filthy) to 5 (spotless).
    pub cleanliness_rating: u8,
    pub photos: Vec<PhotoRef>,
    pub signature: String,
    pub taken_at: Ms,
}

/// Additional-charge line items derived from the check-in/check-out delta.
/// Always itemized, even when everything is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCharges {
    pub fuel_penalty: Cents,
    pub mileage_penalty: Cents,
    pub damage_penalty: Cents,
    pub cleaning_fee: Cents,
    pub total: Cents,
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelledBy {
    Renter,
    Owner,
}

/// Outcome of the refund instruction sent to the payment gateway at
/// cancellation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundStatus {
    /// No captured funds needed moving.
    Settled,
    /// Gateway acknowledged the refund instruction.
    Instructed,
    /// Gateway call failed or timed out; queued for operator review.
    InstructionFailed,
}

/// Written exactly once per cancelled booking and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub booking_id: Ulid,
    pub cancelled_by: CancelledBy,
    pub reason: String,
    pub cancelled_at: Ms,
    pub days_before_start: i64,
    pub refund_percentage: u8,
    pub refund_amount: Cents,
    pub fee_amount: Cents,
    pub refund_status: RefundStatus,
}

// ── Per-vehicle state ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub daily_rate: Cents,
    pub deposit: Cents,
    /// Active occupancy (blocks, holds, booked ranges), sorted by `span.start`.
    pub entries: Vec<CalendarEntry>,
    /// Every booking ever taken on this vehicle, terminal ones included.
    pub bookings: HashMap<Ulid, Booking>,
}

impl VehicleState {
    pub fn new(id: Ulid, owner_id: Ulid, daily_rate: Cents, deposit: Cents) -> Self {
        Self {
            id,
            owner_id,
            daily_rate,
            deposit,
            entries: Vec::new(),
            bookings: HashMap::new(),
        }
    }

    /// Insert an entry maintaining sort order by span.start.
    pub fn insert_entry(&mut self, entry: CalendarEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Remove an entry by id. Returns None when the id is not on the
    /// calendar, which callers treat as an already-released range.
    pub fn remove_entry(&mut self, id: Ulid) -> Option<CalendarEntry> {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    /// Entries whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &CalendarEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}

// ── Journal record format ───────────────────────────────────────────────────

/// The event types, flat with no nesting. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleListed {
        id: Ulid,
        owner_id: Ulid,
        daily_rate: Cents,
        deposit: Cents,
    },
    VehicleRetired {
        id: Ulid,
    },
    DatesBlocked {
        id: Ulid,
        vehicle_id: Ulid,
        span: Span,
        reason: BlockReason,
        note: Option<String>,
    },
    DatesUnblocked {
        id: Ulid,
        vehicle_id: Ulid,
    },
    BookingRequested {
        booking: Booking,
        hold_expires_at: Ms,
    },
    BookingAccepted {
        id: Ulid,
        vehicle_id: Ulid,
        payment_ref: String,
    },
    BookingRejected {
        id: Ulid,
        vehicle_id: Ulid,
        reason: String,
    },
    BookingCancelled {
        id: Ulid,
        vehicle_id: Ulid,
        cancellation: Cancellation,
    },
    BookingExpired {
        id: Ulid,
        vehicle_id: Ulid,
    },
    CheckInRecorded {
        id: Ulid,
        vehicle_id: Ulid,
        record: CheckRecord,
    },
    CheckOutRecorded {
        id: Ulid,
        vehicle_id: Ulid,
        record: CheckRecord,
        charges: ConditionCharges,
    },
}

// ── Query result types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub daily_rate: Cents,
    pub deposit: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedIntervalInfo {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub span: Span,
    pub reason: BlockReason,
    pub note: Option<String>,
}
