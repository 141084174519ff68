//! Condition-delta comparison between the check-in and check-out records.
//! Pure: anomalies come back as flags for the operator queue, never as
//! errors, and never block the hand-back.

use crate::config::ConditionRates;
use crate::model::{Cents, CheckRecord, ConditionCharges, DamageItem, billable_days_between};

/// Suspicious readings that deserve a human look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFlag {
    /// Check-out odometer is behind check-in.
    OdometerRollback { kilometres: i64 },
    /// Check-out was stamped before check-in.
    RecordsOutOfOrder,
}

/// What changed between hand-over and return, with charges itemized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionReport {
    pub mileage_difference: i64,
    pub fuel_difference: i64,
    /// Check-out damages with no matching check-in notation.
    pub new_damages: Vec<DamageItem>,
    pub cleanliness_drop: i64,
    pub charges: ConditionCharges,
    pub flags: Vec<IntegrityFlag>,
}

/// Quantify the delta between two condition snapshots.
///
/// Fuel tolerates 10 points of gauge noise before charging. Damage
/// matching is exact equality on (location, description); anything on the
/// check-out sheet without a check-in twin counts as new. Mileage bills
/// only the kilometres beyond the included per-day allowance, using the
/// actual elapsed trip days. A rolled-back odometer contributes no charge
/// but is flagged.
pub fn compare_records(
    check_in: &CheckRecord,
    check_out: &CheckRecord,
    rates: &ConditionRates,
) -> ConditionReport {
    let mut flags = Vec::new();

    if check_out.taken_at < check_in.taken_at {
        flags.push(IntegrityFlag::RecordsOutOfOrder);
    }

    let mileage_difference = check_out.odometer_reading - check_in.odometer_reading;
    let mileage_penalty: Cents = if mileage_difference < 0 {
        flags.push(IntegrityFlag::OdometerRollback {
            kilometres: -mileage_difference,
        });
        0
    } else {
        let trip_days = billable_days_between(check_in.taken_at, check_out.taken_at);
        let allowance = rates.included_km_per_day * trip_days;
        (mileage_difference - allowance).max(0) * rates.per_km_rate
    };

    let fuel_difference = check_out.fuel_level as i64 - check_in.fuel_level as i64;
    let fuel_penalty: Cents = if fuel_difference < -10 {
        fuel_difference.abs() * rates.fuel_rate
    } else {
        0
    };

    let new_damages: Vec<DamageItem> = check_out
        .damages
        .iter()
        .filter(|d| {
            !check_in
                .damages
                .iter()
                .any(|prior| prior.location == d.location && prior.description == d.description)
        })
        .cloned()
        .collect();
    let damage_penalty = new_damages.len() as Cents * rates.per_damage_rate;

    let cleanliness_drop =
        check_in.cleanliness_rating as i64 - check_out.cleanliness_rating as i64;
    let cleaning_fee = if cleanliness_drop >= 3 {
        rates.cleaning_flat_fee
    } else {
        0
    };

    ConditionReport {
        mileage_difference,
        fuel_difference,
        new_damages,
        cleanliness_drop,
        charges: ConditionCharges {
            fuel_penalty,
            mileage_penalty,
            damage_penalty,
            cleaning_fee,
            total: fuel_penalty + mileage_penalty + damage_penalty + cleaning_fee,
        },
        flags,
    }
}
