//! Quote arithmetic. Pure: no clock, no I/O, no engine state.

use crate::config::FeeSchedule;
use crate::engine::EngineError;
use crate::model::{Cents, PriceBreakdown, Span};

/// Round half up to whole cents. Inputs here are never negative.
fn round_half_up(value: f64) -> Cents {
    (value + 0.5).floor() as Cents
}

/// Itemized price for renting at `daily_rate` over `span`.
///
/// Each line item is rounded to whole cents on its own before summing, so
/// quoting twice with identical inputs is byte-identical and
/// `total = base_price - discount + service_fee + insurance_fee + tax`
/// holds exactly rather than within float noise. The tax basis is the
/// discounted base plus both fees.
pub fn quote_breakdown(
    daily_rate: Cents,
    span: Span,
    fees: &FeeSchedule,
    promo: Option<(&str, f64)>,
) -> Result<PriceBreakdown, EngineError> {
    if daily_rate <= 0 {
        return Err(EngineError::Validation("daily rate must be positive"));
    }
    if span.start >= span.end {
        return Err(EngineError::Validation("start date must be before end date"));
    }

    let duration_days = span.billable_days();
    let base_price = daily_rate * duration_days;

    let (promo_code, discount) = match promo {
        Some((code, fraction)) => {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(EngineError::Validation("discount fraction out of range"));
            }
            (
                Some(code.to_owned()),
                round_half_up(base_price as f64 * fraction),
            )
        }
        None => (None, 0),
    };

    let discounted = base_price - discount;
    let service_fee = round_half_up(discounted as f64 * fees.service_fee_rate);
    let insurance_fee = round_half_up(discounted as f64 * fees.insurance_rate);
    let tax = round_half_up((discounted + service_fee + insurance_fee) as f64 * fees.tax_rate);

    Ok(PriceBreakdown {
        daily_rate,
        duration_days,
        base_price,
        promo_code,
        discount,
        service_fee,
        insurance_fee,
        tax,
        total: discounted + service_fee + insurance_fee + tax,
    })
}
