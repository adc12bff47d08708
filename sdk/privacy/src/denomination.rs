//! Pool denominations
//!
//! Deposits only come in fixed amounts so the amount itself does not single
//! out a depositor. Amounts are in base units (10^9 per whole unit).

use serde::{Deserialize, Serialize};

use crate::error::PrivacyError;

pub const BASE_UNITS: u64 = 1_000_000_000;

/// 0.1, 0.5, 1, 5, 10, 50, 100, 500 and 1000 units.
pub const DEFAULT_DENOMINATIONS: [u64; 9] = [
    100_000_000,
    500_000_000,
    1_000_000_000,
    5_000_000_000,
    10_000_000_000,
    50_000_000_000,
    100_000_000_000,
    500_000_000_000,
    1_000_000_000_000,
];

pub const MAX_DENOMINATIONS: usize = 16;

/// Set of accepted deposit amounts.
///
/// With `allow_custom` any amount in `[min, max]` is accepted; otherwise the
/// amount must also be one of `enabled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationSet {
    pub enabled: Vec<u64>,
    pub allow_custom: bool,
    pub min: u64,
    pub max: u64,
}

impl Default for DenominationSet {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_DENOMINATIONS.to_vec(),
            allow_custom: false,
            min: DEFAULT_DENOMINATIONS[0],
            max: DEFAULT_DENOMINATIONS[DEFAULT_DENOMINATIONS.len() - 1],
        }
    }
}

impl DenominationSet {
    pub fn is_valid(&self, denomination: u64) -> bool {
        if denomination < self.min || denomination > self.max {
            return false;
        }
        self.allow_custom || self.enabled.contains(&denomination)
    }

    pub fn validate(&self, denomination: u64) -> Result<u64, PrivacyError> {
        if self.is_valid(denomination) {
            Ok(denomination)
        } else {
            Err(PrivacyError::InvalidDenomination(denomination))
        }
    }

    /// Enable an extra denomination. Returns false if it was already
    /// enabled, out of bounds, or the set is full.
    pub fn enable(&mut self, denomination: u64) -> bool {
        if denomination < self.min
            || denomination > self.max
            || self.enabled.contains(&denomination)
            || self.enabled.len() >= MAX_DENOMINATIONS
        {
            return false;
        }
        self.enabled.push(denomination);
        true
    }

    pub fn disable(&mut self, denomination: u64) -> bool {
        match self.enabled.iter().position(|&d| d == denomination) {
            Some(pos) => {
                self.enabled.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Render base units as a decimal amount, e.g. `1.5`.
pub fn format_units(amount: u64) -> String {
    let whole = amount / BASE_UNITS;
    let frac = amount % BASE_UNITS;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:09}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
