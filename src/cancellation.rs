//! Refund policy. Pure function of the booking total, its start date, and
//! the clock; the engine turns the result into a `Cancellation` record.

use crate::model::{Cents, Ms, whole_days_between};

/// How a cancelled booking's money splits between renter and fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundTerms {
    pub days_before_start: i64,
    pub refund_percentage: u8,
    pub refund_amount: Cents,
    pub fee_amount: Cents,
}

/// Tiered by whole days between `now` and the rental start, floored, so a
/// cancellation 6 days and 23 hours out already sits in the 50% tier.
///
/// A still-pending booking short-circuits to a full refund regardless of
/// timing: the owner never accepted, so no service was withheld from
/// anyone. The fee is always the complement of the refund, never rounded
/// on its own, so `refund_amount + fee_amount == total` exactly.
pub fn refund_terms(total: Cents, start: Ms, now: Ms, still_pending: bool) -> RefundTerms {
    let days_before_start = whole_days_between(now, start);
    let refund_percentage: u8 = if still_pending {
        100
    } else if days_before_start >= 7 {
        100
    } else if days_before_start >= 3 {
        50
    } else {
        0
    };
    let refund_amount = (total * refund_percentage as i64 + 50) / 100;
    RefundTerms {
        days_before_start,
        refund_percentage,
        refund_amount,
        fee_amount: total - refund_amount,
    }
}
