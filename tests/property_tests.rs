//! Property tests for signal and risk invariants.
//!
//! Uses proptest to verify:
//! 1. Histogram identity: histogram == line - signal for any long-enough series
//! 2. Ratchet monotonicity: stops only tighten under arbitrary price walks
//! 3. Detector state machine: flat never closes, held never opens

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use perp_trader::indicators::{macd, IndicatorParams};
use perp_trader::risk::{RiskEngine, StopInit, StopParams, TrailingExtremum};
use perp_trader::signal::{SignalAction, SignalDetector};
use perp_trader::{Candle, PositionSide};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_closes(min: usize, max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1000.0_f64, min..max)
}

fn arb_walk() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.04..0.04_f64, 1..200).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .map(|step| {
                price *= 1.0 + step;
                price
            })
            .collect()
    })
}

fn to_candles(closes: &[f64]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            datetime: start + Duration::minutes(15 * i as i64),
            open: close,
            high: close * 1.004,
            low: close * 0.996,
            close,
            volume: 1.0,
        })
        .collect()
}

// ── 1. Histogram Identity ────────────────────────────────────────────

proptest! {
    #[test]
    fn histogram_equals_line_minus_signal(closes in arb_closes(35, 150)) {
        let value = macd(&closes, 12, 26, 9).unwrap();
        prop_assert!((value.histogram - (value.line - value.signal)).abs() <= 1e-9);
    }
}

// ── 2. Ratchet Monotonicity ──────────────────────────────────────────

proptest! {
    /// A long stop never decreases, whatever the prices do
    #[test]
    fn long_stop_never_loosens(walk in arb_walk(), atr in 0.2..6.0_f64) {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let StopInit::Ready(mut state) = engine
            .initialize_stops(100.0, PositionSide::Long, atr, &params)
            .unwrap() else {
            return Err(TestCaseError::fail("initial stops degraded"));
        };
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

        let mut last = state.stop_loss;
        for price in walk {
            engine
                .update_trailing_stop(&mut state, &mut extremum, price, atr, &params, None)
                .unwrap();
            prop_assert!(state.stop_loss >= last);
            last = state.stop_loss;
        }
    }

    /// A short stop never increases, whatever the prices do
    #[test]
    fn short_stop_never_loosens(walk in arb_walk(), atr in 0.2..6.0_f64) {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let StopInit::Ready(mut state) = engine
            .initialize_stops(100.0, PositionSide::Short, atr, &params)
            .unwrap() else {
            return Err(TestCaseError::fail("initial stops degraded"));
        };
        let mut extremum = TrailingExtremum::new(PositionSide::Short, 100.0);

        let mut last = state.stop_loss;
        for price in walk {
            engine
                .update_trailing_stop(&mut state, &mut extremum, price, atr, &params, Some(250.0))
                .unwrap();
            prop_assert!(state.stop_loss <= last);
            last = state.stop_loss;
        }
    }

    /// Take-profit is fixed for the life of the position
    #[test]
    fn take_profit_is_untouched(walk in arb_walk(), atr in 0.2..6.0_f64) {
        let engine = RiskEngine::default();
        let params = StopParams::default();
        let StopInit::Ready(mut state) = engine
            .initialize_stops(100.0, PositionSide::Long, atr, &params)
            .unwrap() else {
            return Err(TestCaseError::fail("initial stops degraded"));
        };
        let target = state.take_profit;
        let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);
        for price in walk {
            engine
                .update_trailing_stop(&mut state, &mut extremum, price, atr, &params, None)
                .unwrap();
        }
        assert_relative_eq!(state.take_profit, target);
    }
}

// ── 3. Detector State Machine ────────────────────────────────────────

proptest! {
    #[test]
    fn detector_respects_position_state(walk in arb_walk()) {
        let bars = to_candles(&walk);
        let params = IndicatorParams { macd_fast: 3, macd_slow: 6, macd_signal: 3, atr_period: 3, adx_period: 3 };
        let detector = SignalDetector::new(0.0);

        let flat = detector.evaluate_bars(&bars, &params, PositionSide::None);
        prop_assert_ne!(flat.action, SignalAction::Close);

        for side in [PositionSide::Long, PositionSide::Short] {
            let held = detector.evaluate_bars(&bars, &params, side);
            prop_assert!(matches!(held.action, SignalAction::Close | SignalAction::Hold));
        }
    }
}
