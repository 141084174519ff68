//! Engine tuning knobs. Everything has a sensible default; deployments
//! override through `KERB_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::{Cents, Ms};

/// Marketplace fee rates applied at quote time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    /// Fraction of the discounted base charged as platform fee.
    pub service_fee_rate: f64,
    /// Jurisdiction-dependent; zero where not required.
    pub tax_rate: f64,
    /// Optional marketplace insurance. Zero disables the line item.
    pub insurance_rate: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            service_fee_rate: 0.10,
            tax_rate: 0.0,
            insurance_rate: 0.0,
        }
    }
}

/// Rates for condition-delta charges at check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionRates {
    /// Cents per missing fuel percentage point.
    pub fuel_rate: Cents,
    /// Flat charge per new damage notation.
    pub per_damage_rate: Cents,
    pub cleaning_flat_fee: Cents,
    /// Cents per kilometre beyond the included allowance.
    pub per_km_rate: Cents,
    pub included_km_per_day: i64,
}

impl Default for ConditionRates {
    fn default() -> Self {
        Self {
            fuel_rate: 150,
            per_damage_rate: 7_500,
            cleaning_flat_fee: 5_000,
            per_km_rate: 25,
            included_km_per_day: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a pending booking keeps its calendar hold before the
    /// expiry sweep cancels it.
    pub hold_ttl_ms: Ms,
    /// Ceiling on any single payment gateway or identity provider call.
    pub upstream_timeout: Duration,
    /// Journal appends between automatic compactions.
    pub compact_threshold: u64,
    pub fees: FeeSchedule,
    pub condition_rates: ConditionRates,
    /// Promo code to discount fraction, resolved at quote time.
    pub promos: HashMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl_ms: 30 * 60_000,
            upstream_timeout: Duration::from_secs(10),
            compact_threshold: 1_000,
            fees: FeeSchedule::default(),
            condition_rates: ConditionRates::default(),
            promos: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by whatever `KERB_*` variables are set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<Ms>("KERB_HOLD_TTL_MS") {
            cfg.hold_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u64>("KERB_UPSTREAM_TIMEOUT_MS") {
            cfg.upstream_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("KERB_COMPACT_THRESHOLD") {
            cfg.compact_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("KERB_SERVICE_FEE_RATE") {
            cfg.fees.service_fee_rate = v;
        }
        if let Some(v) = env_parse::<f64>("KERB_TAX_RATE") {
            cfg.fees.tax_rate = v;
        }
        if let Some(v) = env_parse::<f64>("KERB_INSURANCE_RATE") {
            cfg.fees.insurance_rate = v;
        }
        if let Some(v) = env_parse::<Cents>("KERB_FUEL_RATE") {
            cfg.condition_rates.fuel_rate = v;
        }
        if let Some(v) = env_parse::<Cents>("KERB_PER_DAMAGE_RATE") {
            cfg.condition_rates.per_damage_rate = v;
        }
        if let Some(v) = env_parse::<Cents>("KERB_CLEANING_FLAT_FEE") {
            cfg.condition_rates.cleaning_flat_fee = v;
        }
        if let Some(v) = env_parse::<Cents>("KERB_PER_KM_RATE") {
            cfg.condition_rates.per_km_rate = v;
        }
        if let Some(v) = env_parse::<i64>("KERB_INCLUDED_KM_PER_DAY") {
            cfg.condition_rates.included_km_per_day = v;
        }
        cfg
    }

    pub fn with_promo(mut self, code: impl Into<String>, fraction: f64) -> Self {
        self.promos.insert(code.into(), fraction);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
