//! Order sizing
//!
//! Converts the free balance into a per-order notional and that notional
//! into a contract count the venue will accept. Lot and tick arithmetic is
//! done in `Decimal` so step rounding is exact.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::InstrumentSpec;

/// How the balance is split across symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    /// Divide by every configured symbol
    #[default]
    All,
    /// Divide by symbols with an entry signal this cycle
    Signals,
}

/// Sizing configuration (quote currency amounts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Fixed notional per order; takes priority when set
    pub target_notional: Option<f64>,
    pub allocation: AllocationMode,
    /// Multiplier applied to the balance share (leverage-like)
    pub notional_factor: f64,
    pub min_per_symbol: f64,
    pub max_per_symbol: Option<f64>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            target_notional: None,
            allocation: AllocationMode::All,
            notional_factor: 50.0,
            min_per_symbol: 0.0,
            max_per_symbol: None,
        }
    }
}

impl SizingConfig {
    /// Notional for one order
    ///
    /// `symbols` is the number of configured symbols, `active_signals` the
    /// number of symbols with an entry signal this cycle.
    pub fn order_notional(&self, balance: f64, symbols: usize, active_signals: usize) -> f64 {
        if let Some(target) = self.target_notional.filter(|t| *t > 0.0) {
            return target;
        }
        if !(balance.is_finite() && balance > 0.0) {
            return 0.0;
        }

        let divisor = match self.allocation {
            AllocationMode::All => symbols,
            AllocationMode::Signals => active_signals,
        }
        .max(1);

        let mut notional = balance / divisor as f64 * self.notional_factor;
        notional = notional.max(self.min_per_symbol);
        if let Some(max) = self.max_per_symbol.filter(|m| *m > 0.0) {
            notional = notional.min(max);
        }
        notional
    }
}

/// Contracts for `notional` at `price`, rounded up to the lot step
///
/// Never below the instrument minimum. Returns 0 when the inputs cannot
/// produce a valid size.
pub fn contracts_for_notional(notional: f64, price: f64, spec: &InstrumentSpec) -> f64 {
    let (Some(notional), Some(price), Some(ct_val)) = (
        to_decimal(notional),
        to_decimal(price),
        to_decimal(spec.contract_value),
    ) else {
        return 0.0;
    };
    if notional <= Decimal::ZERO || price <= Decimal::ZERO || ct_val <= Decimal::ZERO {
        return 0.0;
    }

    let raw = notional / (price * ct_val);
    let lot = to_decimal(spec.lot_size).filter(|l| *l > Decimal::ZERO);
    let min = to_decimal(spec.min_size).unwrap_or(Decimal::ZERO);

    let mut contracts = match lot {
        Some(lot) => (raw / lot).ceil() * lot,
        None => raw,
    };
    if contracts < min {
        contracts = min;
    }

    contracts.normalize().to_f64().unwrap_or(0.0)
}

/// Align a price to the tick grid, rounding up or down
pub fn align_to_tick(price: f64, tick_size: f64, round_up: bool) -> f64 {
    let (Some(p), Some(tick)) = (to_decimal(price), to_decimal(tick_size)) else {
        return price;
    };
    if tick <= Decimal::ZERO {
        return price;
    }

    let steps = p / tick;
    let steps = if round_up { steps.ceil() } else { steps.floor() };
    (steps * tick).normalize().to_f64().unwrap_or(price)
}

/// f64 to Decimal with binary noise removed
fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(12))
}
