//! Adaptive stop-loss / take-profit engine
//!
//! Computes initial ATR-scaled protective levels for a new position and
//! ratchets the stop toward price as the position matures. The stop only
//! ever moves in the risk-reducing direction: non-decreasing for longs,
//! non-increasing for shorts.
//!
//! ```text
//! long:  sl = entry - n * atr      tp = entry + m * atr
//! short: sl = entry + n * atr      tp = entry - m * atr
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RiskError;
use crate::sizing::align_to_tick;
use crate::types::PositionSide;

/// Global risk thresholds shared by all symbols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// ATR / price above which the stop multiplier is damped
    pub extreme_volatility_ratio: f64,
    /// (high - low) / close of the last bar above which the stop multiplier is damped
    pub extreme_range_ratio: f64,
    /// Factor applied to the stop multiplier in extreme volatility
    pub volatility_damping: f64,
    /// Minimum stop distance as a fraction of entry price
    pub min_sl_distance_pct: f64,
    /// Minimum gap between the stop and the liquidation price, as a fraction of it
    pub liquidation_buffer_pct: f64,
    pub first_stage_profit_atr: f64,
    pub first_stage_atr_multiple: f64,
    pub second_stage_profit_atr: f64,
    pub second_stage_atr_multiple: f64,
    /// Venue stop is replaced once the local stop moved this many ATRs
    pub replace_threshold_atr: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            extreme_volatility_ratio: 0.05,
            extreme_range_ratio: 0.08,
            volatility_damping: 0.5,
            min_sl_distance_pct: 0.003,
            liquidation_buffer_pct: 0.02,
            first_stage_profit_atr: 1.5,
            first_stage_atr_multiple: 1.2,
            second_stage_profit_atr: 2.5,
            second_stage_atr_multiple: 1.0,
            replace_threshold_atr: 0.1,
        }
    }
}

impl RiskConfig {
    /// Set the extreme-volatility thresholds and damping factor
    pub fn with_extreme_volatility(mut self, atr_ratio: f64, range_ratio: f64, damping: f64) -> Self {
        self.extreme_volatility_ratio = atr_ratio;
        self.extreme_range_ratio = range_ratio;
        self.volatility_damping = damping;
        self
    }

    /// Set the minimum stop distance (fraction of entry)
    pub fn with_min_sl_distance_pct(mut self, pct: f64) -> Self {
        self.min_sl_distance_pct = pct;
        self
    }

    /// Set the liquidation safety buffer (fraction of liquidation price)
    pub fn with_liquidation_buffer_pct(mut self, pct: f64) -> Self {
        self.liquidation_buffer_pct = pct;
        self
    }

    /// Set both profit stages as (profit in ATR, stop offset in ATR)
    pub fn with_stages(mut self, first: (f64, f64), second: (f64, f64)) -> Self {
        self.first_stage_profit_atr = first.0;
        self.first_stage_atr_multiple = first.1;
        self.second_stage_profit_atr = second.0;
        self.second_stage_atr_multiple = second.1;
        self
    }

    pub fn build(self) -> RiskEngine {
        RiskEngine::new(self)
    }
}

/// Per-symbol stop parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopParams {
    /// Stop distance in ATRs (n)
    pub sl_atr_multiple: f64,
    /// Target distance in ATRs (m)
    pub tp_atr_multiple: f64,
    /// Move from entry that activates trailing
    pub trigger_pct: f64,
    /// Trailing distance from the extremum
    pub trail_pct: f64,
}

impl Default for StopParams {
    fn default() -> Self {
        Self {
            sl_atr_multiple: 2.0,
            tp_atr_multiple: 3.0,
            trigger_pct: 0.010,
            trail_pct: 0.006,
        }
    }
}

/// Protective levels of one open position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlTpState {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub side: PositionSide,
    pub entry_price: f64,
}

/// Which protective level a price reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::TakeProfit => write!(f, "take-profit"),
        }
    }
}

impl SlTpState {
    /// Level reached by `price`, if any. The stop wins when both are.
    pub fn exit_trigger(&self, price: f64) -> Option<ExitReason> {
        match self.side {
            PositionSide::Long if price <= self.stop_loss => Some(ExitReason::StopLoss),
            PositionSide::Long if price >= self.take_profit => Some(ExitReason::TakeProfit),
            PositionSide::Short if price >= self.stop_loss => Some(ExitReason::StopLoss),
            PositionSide::Short if price <= self.take_profit => Some(ExitReason::TakeProfit),
            _ => None,
        }
    }
}

/// High-water mark (long) or low-water mark (short) since entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingExtremum {
    pub side: PositionSide,
    pub value: f64,
}

impl TrailingExtremum {
    pub fn new(side: PositionSide, entry_price: f64) -> Self {
        Self {
            side,
            value: entry_price,
        }
    }

    /// Fold a new price into the extremum
    pub fn observe(&mut self, price: f64) {
        match self.side {
            PositionSide::Long => self.value = self.value.max(price),
            PositionSide::Short => self.value = self.value.min(price),
            PositionSide::None => {}
        }
    }
}

/// Inputs for computing initial stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopContext {
    pub entry_price: f64,
    pub side: PositionSide,
    pub atr: f64,
    /// (high - low) / close of the latest bar
    pub range_ratio: Option<f64>,
    pub liquidation_price: Option<f64>,
}

/// Result of computing initial stops
#[derive(Debug, Clone, PartialEq)]
pub enum StopInit {
    Ready(SlTpState),
    /// Inputs unusable; caller keeps whatever state it had
    Degraded(String),
}

/// Result of a trailing update
#[derive(Debug, Clone, PartialEq)]
pub enum StopUpdate {
    Tightened { previous: f64, current: f64 },
    Unchanged,
    /// Inputs unusable; state left untouched
    Degraded(String),
}

/// Stop/target calculator
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Initial stops from entry, side and ATR only
    pub fn initialize_stops(
        &self,
        entry_price: f64,
        side: PositionSide,
        atr: f64,
        params: &StopParams,
    ) -> Result<StopInit, RiskError> {
        self.initialize_with(
            &StopContext {
                entry_price,
                side,
                atr,
                range_ratio: None,
                liquidation_price: None,
            },
            params,
        )
    }

    /// Initial stops with volatility damping, distance floor and liquidation clamp
    pub fn initialize_with(
        &self,
        ctx: &StopContext,
        params: &StopParams,
    ) -> Result<StopInit, RiskError> {
        if let Some(reason) = unusable_inputs(ctx.entry_price, ctx.atr) {
            return Ok(StopInit::Degraded(reason));
        }
        if ctx.side == PositionSide::None {
            return Ok(StopInit::Degraded("no position side".into()));
        }

        let n = self.effective_sl_multiple(params.sl_atr_multiple, ctx.entry_price, ctx.atr, ctx.range_ratio);
        let floor = ctx.entry_price * self.config.min_sl_distance_pct;
        let sl_distance = (n * ctx.atr).max(floor);
        let tp_distance = params.tp_atr_multiple * ctx.atr;

        if !(sl_distance.is_finite() && sl_distance > 0.0) {
            return Err(RiskError::InvariantViolation(format!(
                "non-positive stop distance {sl_distance}"
            )));
        }
        if !(tp_distance.is_finite() && tp_distance > 0.0) {
            return Err(RiskError::InvariantViolation(format!(
                "non-positive target distance {tp_distance}"
            )));
        }

        let (stop_loss, take_profit) = match ctx.side {
            PositionSide::Long => (ctx.entry_price - sl_distance, ctx.entry_price + tp_distance),
            _ => (ctx.entry_price + sl_distance, ctx.entry_price - tp_distance),
        };
        let stop_loss =
            self.clamp_to_liquidation(ctx.side, stop_loss, ctx.liquidation_price, ctx.entry_price);
        if let Some(liq) = usable_liquidation(ctx.liquidation_price) {
            let beyond_stop = match ctx.side {
                PositionSide::Long => liq < stop_loss,
                _ => liq > stop_loss,
            };
            if !beyond_stop {
                return Err(RiskError::InvariantViolation(format!(
                    "liquidation {liq} is not beyond the {} stop {stop_loss}",
                    ctx.side
                )));
            }
        }

        let state = SlTpState {
            stop_loss,
            take_profit,
            side: ctx.side,
            entry_price: ctx.entry_price,
        };
        check_levels(&state)?;

        debug!(
            side = %ctx.side,
            entry = ctx.entry_price,
            atr = ctx.atr,
            n,
            sl = state.stop_loss,
            tp = state.take_profit,
            "initialized stops"
        );

        Ok(StopInit::Ready(state))
    }

    /// Ratchet the stop toward `price`
    ///
    /// Once price is beyond `entry * (1 ± trigger_pct)`, the stop becomes the
    /// best of the existing stop, an ATR offset from price and a percentage
    /// offset from the extremum. Profit stages tighten it further. The result
    /// never loosens the stop.
    pub fn update_trailing_stop(
        &self,
        state: &mut SlTpState,
        extremum: &mut TrailingExtremum,
        price: f64,
        atr: f64,
        params: &StopParams,
        liquidation_price: Option<f64>,
    ) -> Result<StopUpdate, RiskError> {
        if let Some(reason) = unusable_inputs(state.entry_price, atr) {
            return Ok(StopUpdate::Degraded(reason));
        }
        if !(price.is_finite() && price > 0.0) {
            return Ok(StopUpdate::Degraded(format!("unusable price {price}")));
        }

        extremum.observe(price);

        let previous = state.stop_loss;
        let entry = state.entry_price;
        let n = self.effective_sl_multiple(params.sl_atr_multiple, price, atr, None);
        let cfg = &self.config;

        let candidate = match state.side {
            PositionSide::Long => {
                let mut sl = previous;
                if price >= entry * (1.0 + params.trigger_pct) {
                    sl = sl
                        .max(price - n * atr)
                        .max(extremum.value * (1.0 - params.trail_pct));
                }
                let profit = price - entry;
                if profit >= cfg.second_stage_profit_atr * atr {
                    sl = sl.max(price - cfg.second_stage_atr_multiple * atr);
                } else if profit >= cfg.first_stage_profit_atr * atr {
                    sl = sl.max(price - cfg.first_stage_atr_multiple * atr);
                }
                self.clamp_to_liquidation(PositionSide::Long, sl, liquidation_price, entry)
                    .max(previous)
            }
            PositionSide::Short => {
                let mut sl = previous;
                if price <= entry * (1.0 - params.trigger_pct) {
                    sl = sl
                        .min(price + n * atr)
                        .min(extremum.value * (1.0 + params.trail_pct));
                }
                let profit = entry - price;
                if profit >= cfg.second_stage_profit_atr * atr {
                    sl = sl.min(price + cfg.second_stage_atr_multiple * atr);
                } else if profit >= cfg.first_stage_profit_atr * atr {
                    sl = sl.min(price + cfg.first_stage_atr_multiple * atr);
                }
                self.clamp_to_liquidation(PositionSide::Short, sl, liquidation_price, entry)
                    .min(previous)
            }
            PositionSide::None => return Ok(StopUpdate::Degraded("no position side".into())),
        };

        if !(candidate.is_finite() && candidate > 0.0) {
            return Err(RiskError::InvariantViolation(format!(
                "trailing stop computed as {candidate}"
            )));
        }

        if candidate == previous {
            return Ok(StopUpdate::Unchanged);
        }

        state.stop_loss = candidate;
        debug!(
            side = %state.side,
            price,
            extremum = extremum.value,
            from = previous,
            to = candidate,
            "trailing stop tightened"
        );
        Ok(StopUpdate::Tightened {
            previous,
            current: candidate,
        })
    }

    /// Whether the venue-held stop lags the local one enough to replace it
    pub fn should_replace(&self, placed_stop: f64, current_stop: f64, atr: f64) -> bool {
        if atr <= 0.0 {
            return false;
        }
        (current_stop - placed_stop).abs() >= self.config.replace_threshold_atr * atr
    }

    fn effective_sl_multiple(&self, n: f64, price: f64, atr: f64, range_ratio: Option<f64>) -> f64 {
        let atr_ratio = atr / price;
        let extreme = atr_ratio > self.config.extreme_volatility_ratio
            || range_ratio.is_some_and(|r| r > self.config.extreme_range_ratio);
        if extreme {
            warn!(
                atr_ratio,
                range_ratio = range_ratio.unwrap_or_default(),
                "extreme volatility, damping stop multiplier"
            );
            n * self.config.volatility_damping
        } else {
            n
        }
    }

    /// Keep the stop `liquidation_buffer_pct` clear of liquidation
    ///
    /// When the buffer would put the stop past entry (high leverage), the
    /// stop is held at the minimum distance from entry instead.
    fn clamp_to_liquidation(
        &self,
        side: PositionSide,
        stop: f64,
        liquidation: Option<f64>,
        entry: f64,
    ) -> f64 {
        let Some(liq) = usable_liquidation(liquidation) else {
            return stop;
        };
        let buffer = self.config.liquidation_buffer_pct;
        let min_gap = self.config.min_sl_distance_pct;
        let (target, limit) = match side {
            PositionSide::Long => (liq * (1.0 + buffer), entry * (1.0 - min_gap)),
            PositionSide::Short => (liq * (1.0 - buffer), entry * (1.0 + min_gap)),
            PositionSide::None => return stop,
        };
        let capped = match side {
            PositionSide::Long => target.min(limit),
            _ => target.max(limit),
        };
        if capped != target {
            debug!(liq, target, limit, "liquidation buffer reaches entry, stop held at minimum distance");
        }
        match side {
            PositionSide::Long => stop.max(capped),
            _ => stop.min(capped),
        }
    }
}

fn usable_liquidation(liquidation: Option<f64>) -> Option<f64> {
    liquidation.filter(|l| l.is_finite() && *l > 0.0)
}

fn unusable_inputs(entry_price: f64, atr: f64) -> Option<String> {
    if !(atr.is_finite() && atr > 0.0) {
        Some(format!("atr unavailable ({atr})"))
    } else if !(entry_price.is_finite() && entry_price > 0.0) {
        Some(format!("entry price unavailable ({entry_price})"))
    } else {
        None
    }
}

fn check_levels(state: &SlTpState) -> Result<(), RiskError> {
    let entry = state.entry_price;
    let ok = match state.side {
        PositionSide::Long => state.stop_loss > 0.0 && state.stop_loss < entry && state.take_profit > entry,
        PositionSide::Short => state.stop_loss > entry && state.take_profit > 0.0 && state.take_profit < entry,
        PositionSide::None => false,
    };
    if ok {
        Ok(())
    } else {
        Err(RiskError::InvariantViolation(format!(
            "degenerate {} stops: entry {entry}, sl {}, tp {}",
            state.side, state.stop_loss, state.take_profit
        )))
    }
}

/// Trigger prices ready for the venue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Keep triggers on the correct side of the last price and align them to the tick
///
/// The minimum gap is `max(0.1% of last, 5 ticks)`. Both levels are rounded
/// away from the last price.
pub fn protective_levels(state: &SlTpState, last_price: f64, tick_size: f64) -> ProtectiveLevels {
    let gap = (last_price * 0.001).max(tick_size * 5.0);
    match state.side {
        PositionSide::Short => ProtectiveLevels {
            stop_loss: align_to_tick(state.stop_loss.max(last_price + gap), tick_size, true),
            take_profit: align_to_tick(state.take_profit.min(last_price - gap), tick_size, false),
        },
        _ => ProtectiveLevels {
            stop_loss: align_to_tick(state.stop_loss.min(last_price - gap), tick_size, false),
            take_profit: align_to_tick(state.take_profit.max(last_price + gap), tick_size, true),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ready(init: StopInit) -> SlTpState {
        match init {
            StopInit::Ready(state) => state,
            StopInit::Degraded(reason) => panic!("unexpected degraded result: {reason}"),
        }
    }

    #[test]
    fn test_initial_stops_long() {
        let engine = RiskEngine::default();
        let state = ready(
            engine
                .initialize_stops(100.0, PositionSide::Long, 2.0, &StopParams::default())
                .unwrap(),
        );
        assert_eq!(state.stop_loss, 96.0);
        assert_eq!(state.take_profit, 106.0);
    }

    #[test]
    fn test_initial_stops_short() {
        let engine = RiskEngine::default();
        let state = ready(
            engine
                .initialize_stops(100.0, PositionSide::Short, 2.0, &StopParams::default())
                .unwrap(),
        );
        assert_eq!(state.stop_loss, 104.0);
        assert_eq!(state.take_profit, 94.0);
    }

    #[test]
    fn test_zero_atr_degrades() {
        let engine = RiskEngine::default();
        let init = engine
            .initialize_stops(100.0, PositionSide::Long, 0.0, &StopParams::default())
            .unwrap();
        assert!(matches!(init, StopInit::Degraded(_)));

        let init = engine
            .initialize_stops(0.0, PositionSide::Long, 2.0, &StopParams::default())
            .unwrap();
        assert!(matches!(init, StopInit::Degraded(_)));
    }

    #[test]
    fn test_extreme_volatility_damps_multiplier() {
        let engine = RiskEngine::default();
        // atr / price = 0.1 > 0.05
        let state = ready(
            engine
                .initialize_stops(100.0, PositionSide::Long, 10.0, &StopParams::default())
                .unwrap(),
        );
        assert_relative_eq!(state.stop_loss, 90.0);
        assert_relative_eq!(state.take_profit, 130.0);
    }

    #[test]
    fn test_range_ratio_damps_multiplier() {
        let engine = RiskEngine::default();
        let ctx = StopContext {
            entry_price: 100.0,
            side: PositionSide::Long,
            atr: 2.0,
            range_ratio: Some(0.12),
            liquidation_price: None,
        };
        let state = ready(engine.initialize_with(&ctx, &StopParams::default()).unwrap());
        assert_relative_eq!(state.stop_loss, 98.0);
    }

    #[test]
    fn test_min_distance_floor() {
        let engine = RiskConfig::default().with_min_sl_distance_pct(0.01).build();
        let state = ready(
            engine
                .initialize_stops(100.0, PositionSide::Long, 0.1, &StopParams::default())
                .unwrap(),
        );
        assert_relative_eq!(state.stop_loss, 99.0, epsilon = 1e-9);
    }

    #[test]
    fn test_liquidation_clamp_long() {
        let engine = RiskEngine::default();
        let ctx = StopContext {
            entry_price: 100.0,
            side: PositionSide::Long,
            atr: 2.0,
            range_ratio: None,
            liquidation_price: Some(95.0),
        };
        let state = ready(engine.initialize_with(&ctx, &StopParams::default()).unwrap());
        // 95 * 1.02
        assert_relative_eq!(state.stop_loss, 96.9, epsilon = 1e-9);
    }

    #[test]
    fn test_liquidation_clamp_short() {
        let engine = RiskEngine::default();
        let ctx = StopContext {
            entry_price: 100.0,
            side: PositionSide::Short,
            atr: 2.0,
            range_ratio: None,
            liquidation_price: Some(105.0),
        };
        let state = ready(engine.initialize_with(&ctx, &StopParams::default()).unwrap());
        // 105 * 0.98
        assert_relative_eq!(state.stop_loss, 102.9, epsilon = 1e-9);
    }

    #[test]
    fn test_liquidation_buffer_past_entry_holds_minimum_distance() {
        let engine = RiskEngine::default();
        // 99 * 1.02 would sit above entry
        let ctx = StopContext {
            entry_price: 100.0,
            side: PositionSide::Long,
            atr: 2.0,
            range_ratio: None,
            liquidation_price: Some(99.0),
        };
        let state = ready(engine.initialize_with(&ctx, &StopParams::default()).unwrap());
        assert_relative_eq!(state.stop_loss, 99.7, epsilon = 1e-9);

        let ctx = StopContext {
            side: PositionSide::Short,
            liquidation_price: Some(101.0),
            ..ctx
        };
        let state = ready(engine.initialize_with(&ctx, &StopParams::default()).unwrap());
        assert_relative_eq!(state.stop_loss, 100.3, epsilon = 1e-9);
    }

    #[test]
    fn test_liquidation_beyond_entry_is_invariant_violation() {
        let engine = RiskEngine::default();
        let ctx = StopContext {
            entry_price: 100.0,
            side: PositionSide::Long,
            atr: 2.0,
            range_ratio: None,
            liquidation_price: Some(99.8),
        };
        assert!(matches!(
            engine.initialize_with(&ctx, &StopParams::default()),
            Err(RiskError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_trailing_clamp_never_passes_entry_limit() {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let ctx = StopContext {
            entry_price: 100.0,
            side: PositionSide::Long,
            atr: 2.0,
            range_ratio: None,
            liquidation_price: Some(99.0),
        };
        let mut state = ready(engine.initialize_with(&ctx, &params).unwrap());
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);
        let update = engine
            .update_trailing_stop(&mut state, &mut extremum, 99.9, 2.0, &params, Some(99.0))
            .unwrap();
        assert_eq!(update, StopUpdate::Unchanged);
        assert_relative_eq!(state.stop_loss, 99.7, epsilon = 1e-9);
        assert_eq!(state.exit_trigger(99.9), None);
    }

    #[test]
    fn test_trailing_not_active_below_trigger() {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let mut state = ready(engine.initialize_stops(100.0, PositionSide::Long, 2.0, &params).unwrap());
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

        let update = engine
            .update_trailing_stop(&mut state, &mut extremum, 100.5, 2.0, &params, None)
            .unwrap();
        assert_eq!(update, StopUpdate::Unchanged);
        assert_eq!(state.stop_loss, 96.0);
        assert_eq!(extremum.value, 100.5);
    }

    #[test]
    fn test_trailing_long_rally() {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let mut state = ready(engine.initialize_stops(100.0, PositionSide::Long, 2.0, &params).unwrap());
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

        let update = engine
            .update_trailing_stop(&mut state, &mut extremum, 105.0, 2.0, &params, None)
            .unwrap();
        assert!(matches!(update, StopUpdate::Tightened { .. }));
        assert_relative_eq!(state.stop_loss, 104.37, epsilon = 1e-9);
        assert_eq!(state.exit_trigger(96.5), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_first_stage_tightening_without_trailing() {
        let engine = RiskEngine::default();
        let params = StopParams {
            trigger_pct: 0.5,
            ..StopParams::default()
        };
        let mut state = ready(engine.initialize_stops(100.0, PositionSide::Long, 2.0, &params).unwrap());
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

        // profit 3.2 >= 1.5 * atr, stop = 103.2 - 1.2 * 2
        engine
            .update_trailing_stop(&mut state, &mut extremum, 103.2, 2.0, &params, None)
            .unwrap();
        assert_relative_eq!(state.stop_loss, 100.8, epsilon = 1e-9);
    }

    #[test]
    fn test_trailing_short_never_loosens() {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let mut state = ready(engine.initialize_stops(100.0, PositionSide::Short, 2.0, &params).unwrap());
        let mut extremum = TrailingExtremum::new(PositionSide::Short, 100.0);

        engine
            .update_trailing_stop(&mut state, &mut extremum, 95.0, 2.0, &params, None)
            .unwrap();
        let tightened = state.stop_loss;
        assert!(tightened < 104.0);

        let update = engine
            .update_trailing_stop(&mut state, &mut extremum, 99.0, 2.0, &params, None)
            .unwrap();
        assert_eq!(update, StopUpdate::Unchanged);
        assert_eq!(state.stop_loss, tightened);
    }

    #[test]
    fn test_trailing_degraded_keeps_state() {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let mut state = ready(engine.initialize_stops(100.0, PositionSide::Long, 2.0, &params).unwrap());
        let before = state;
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

        let update = engine
            .update_trailing_stop(&mut state, &mut extremum, 110.0, 0.0, &params, None)
            .unwrap();
        assert!(matches!(update, StopUpdate::Degraded(_)));
        assert_eq!(state, before);
        assert_eq!(extremum.value, 100.0);
    }

    #[test]
    fn test_exit_trigger() {
        let state = SlTpState {
            stop_loss: 96.0,
            take_profit: 106.0,
            side: PositionSide::Long,
            entry_price: 100.0,
        };
        assert_eq!(state.exit_trigger(100.0), None);
        assert_eq!(state.exit_trigger(95.9), Some(ExitReason::StopLoss));
        assert_eq!(state.exit_trigger(106.0), Some(ExitReason::TakeProfit));

        let short = SlTpState {
            stop_loss: 104.0,
            take_profit: 94.0,
            side: PositionSide::Short,
            entry_price: 100.0,
        };
        assert_eq!(short.exit_trigger(104.5), Some(ExitReason::StopLoss));
        assert_eq!(short.exit_trigger(93.0), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_protective_levels_clamped_and_aligned() {
        let state = SlTpState {
            stop_loss: 99.99,
            take_profit: 106.004,
            side: PositionSide::Long,
            entry_price: 100.0,
        };
        let levels = protective_levels(&state, 100.0, 0.01);
        // gap = max(0.1, 0.05)
        assert_relative_eq!(levels.stop_loss, 99.9, epsilon = 1e-9);
        assert_relative_eq!(levels.take_profit, 106.01, epsilon = 1e-9);
    }

    #[test]
    fn test_should_replace() {
        let engine = RiskEngine::default();
        assert!(!engine.should_replace(96.0, 96.1, 2.0));
        assert!(engine.should_replace(96.0, 96.5, 2.0));
    }
}
