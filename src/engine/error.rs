use ulid::Ulid;

use crate::model::BookingStatus;

/// Why a date range is taken, surfaced so the caller can render a
/// specific message rather than a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// Another booking (pending hold or confirmed rental) occupies it.
    Booked,
    /// The owner closed these dates.
    Blocked,
}

impl std::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BusyReason::Booked => "booked",
            BusyReason::Blocked => "blocked",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Calendar conflict. Never worth an automatic retry: the same dates
    /// will conflict again until the caller picks different ones.
    Busy { entry_id: Ulid, reason: BusyReason },
    /// Malformed input, rejected before any side effect.
    Validation(&'static str),
    /// State machine guard violation; an integration bug, never a no-op.
    InvalidTransition {
        status: BookingStatus,
        action: &'static str,
    },
    NotOwner(Ulid),
    /// Actor is neither the renter nor the owner of the booking.
    NotParticipant(Ulid),
    UnverifiedRenter(Ulid),
    HasActiveBookings(Ulid),
    /// Payment gateway or identity provider failed or timed out. The only
    /// class callers may retry with backoff.
    Upstream {
        call: &'static str,
        detail: String,
    },
    LimitExceeded(&'static str),
    Journal(String),
}

impl EngineError {
    /// Retry guidance for callers: upstream and persistence hiccups may
    /// clear; everything else will fail identically on replay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Upstream { .. } | EngineError::Journal(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Busy { entry_id, reason } => {
                write!(f, "dates unavailable: {reason} (entry {entry_id})")
            }
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidTransition { status, action } => {
                write!(f, "invalid transition: cannot {action} a {status} booking")
            }
            EngineError::NotOwner(id) => write!(f, "user {id} does not own this vehicle"),
            EngineError::NotParticipant(id) => {
                write!(f, "user {id} is not a party to this booking")
            }
            EngineError::UnverifiedRenter(id) => {
                write!(f, "renter {id} has not completed verification")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot retire vehicle {id}: active bookings exist")
            }
            EngineError::Upstream { call, detail } => {
                write!(f, "upstream {call} failed: {detail}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
