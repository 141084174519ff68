//! Booking state machine. The whole table lives here so every mutation
//! asks the same question: may this action fire from this status?

use crate::engine::EngineError;
use crate::model::BookingStatus;

/// Events that move a booking between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject,
    Cancel,
    CheckIn,
    CheckOut,
    Expire,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
            Action::CheckIn => "check-in",
            Action::CheckOut => "check-out",
            Action::Expire => "expire",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status `action` lands in when fired from `status`. Anything not in
/// the table is an `InvalidTransition` naming both sides; callers must
/// surface it, never swallow it into a no-op.
pub fn next_status(status: BookingStatus, action: Action) -> Result<BookingStatus, EngineError> {
    use Action::*;
    use BookingStatus::*;
    let next = match (status, action) {
        (Pending, Accept) => Confirmed,
        (Pending, Reject) => Rejected,
        (Pending, Cancel) => Cancelled,
        // Only an unaccepted hold can time out
        (Pending, Expire) => Cancelled,
        (Confirmed, CheckIn) => InProgress,
        (Confirmed, Cancel) => Cancelled,
        (InProgress, CheckOut) => Completed,
        (InProgress, Cancel) => Cancelled,
        _ => {
            return Err(EngineError::InvalidTransition {
                status,
                action: action.as_str(),
            });
        }
    };
    Ok(next)
}
