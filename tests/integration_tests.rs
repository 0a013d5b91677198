//! Integration tests for the perp-trader signal and risk core
//!
//! These tests verify that indicators, the detector and the risk engine
//! work together on synthetic bar series.

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};

use perp_trader::error::{EngineError, ErrorKind, RiskError};
use perp_trader::indicators::{self, snapshot_pair, IndicatorParams};
use perp_trader::risk::{
    ExitReason, RiskEngine, SlTpState, StopContext, StopInit, StopParams, StopUpdate,
    TrailingExtremum,
};
use perp_trader::signal::{SignalAction, SignalDetector, INSUFFICIENT_DATA};
use perp_trader::{Candle, PositionSide};

// =============================================================================
// Test Utilities
// =============================================================================

fn candles_from_closes(closes: &[f64], half_range: f64) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            datetime: start + Duration::minutes(15 * i as i64),
            open: close,
            high: close + half_range,
            low: close - half_range,
            close,
            volume: 1000.0,
        })
        .collect()
}

/// 30 bars with gaps and uneven ranges
fn fixture_bars() -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    (0..30)
        .map(|i| {
            let x = i as f64;
            let close = 50.0 + (x * 0.7).sin() * 3.0 + x * 0.15;
            let open = close - (x * 1.3).cos();
            let high = open.max(close) + 0.4 + (i % 4) as f64 * 0.25;
            let low = open.min(close) - 0.3 - (i % 3) as f64 * 0.2;
            Candle {
                datetime: start + Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 500.0 + x,
            }
        })
        .collect()
}

/// Wilder ATR written independently of the library
fn reference_atr(bars: &[Candle], period: usize) -> f64 {
    let mut trs = Vec::new();
    for i in 1..bars.len() {
        let prev_close = bars[i - 1].close;
        let tr = (bars[i].high - bars[i].low)
            .max((bars[i].high - prev_close).abs())
            .max((bars[i].low - prev_close).abs());
        trs.push(tr);
    }
    let mut value = trs.iter().take(period).sum::<f64>() / period as f64;
    for tr in trs.iter().skip(period) {
        value += (tr - value) / period as f64;
    }
    value
}

fn ready(init: StopInit) -> SlTpState {
    match init {
        StopInit::Ready(state) => state,
        StopInit::Degraded(reason) => panic!("unexpected degraded result: {reason}"),
    }
}

// =============================================================================
// Indicator Tests
// =============================================================================

#[test]
fn test_atr_matches_wilder_reference() {
    let bars = fixture_bars();
    for period in [5, 10, 14] {
        let value = indicators::atr(&bars, period).unwrap();
        assert_relative_eq!(value, reference_atr(&bars, period), epsilon = 1e-6);
    }
}

#[test]
fn test_histogram_is_line_minus_signal() {
    let bars = fixture_bars();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let value = indicators::macd(&closes, 5, 12, 4).unwrap();
    assert!((value.histogram - (value.line - value.signal)).abs() <= 1e-9);
}

#[test]
fn test_macd_rejects_short_series() {
    let closes = vec![100.0; 34];
    let err = indicators::macd(&closes, 12, 26, 9).unwrap_err();
    assert_eq!(
        err,
        perp_trader::error::IndicatorError::InsufficientData {
            required: 35,
            available: 34
        }
    );
}

// =============================================================================
// Signal Detector Tests
// =============================================================================

#[test]
fn test_rising_series_emits_single_open_long() {
    let mut closes = vec![100.0; 60];
    closes.extend((1..=40).map(|i| 100.0 + i as f64));
    let bars = candles_from_closes(&closes, 0.5);

    let detector = SignalDetector::new(0.0);
    let params = IndicatorParams::default();

    let entries: Vec<(usize, SignalAction)> = (2..=bars.len())
        .map(|n| (n, detector.evaluate_bars(&bars[..n], &params, PositionSide::None)))
        .filter(|(_, d)| d.is_entry())
        .map(|(n, d)| (n, d.action))
        .collect();

    // The first rising bar is index 60, a window of 61 bars
    assert_eq!(entries, vec![(61, SignalAction::OpenLong)]);
}

#[test]
fn test_histogram_stays_positive_after_crossover() {
    let mut closes = vec![100.0; 60];
    closes.extend((1..=40).map(|i| 100.0 + i as f64));
    let params = IndicatorParams::default();

    for n in 61..=closes.len() {
        let value = indicators::macd(&closes[..n], 12, 26, 9).unwrap();
        assert!(value.histogram > 0.0, "histogram turned at {n}");
    }
    let bars = candles_from_closes(&closes, 0.5);
    let (current, _) = snapshot_pair(&bars, &params).unwrap();
    assert!(current.histogram > 0.0);
}

#[test]
fn test_short_window_holds_with_insufficient_data() {
    let bars = candles_from_closes(&[100.0, 101.0, 102.0], 0.5);
    let detector = SignalDetector::default();
    for side in [PositionSide::None, PositionSide::Long, PositionSide::Short] {
        let decision = detector.evaluate_bars(&bars, &IndicatorParams::default(), side);
        assert_eq!(decision.action, SignalAction::Hold);
        assert_eq!(decision.reason, INSUFFICIENT_DATA);
    }
    assert_eq!(detector.evaluate(None, None, PositionSide::None).reason, INSUFFICIENT_DATA);
}

#[test]
fn test_falling_series_closes_long_but_never_opens_while_held() {
    let mut closes = vec![100.0; 60];
    closes.extend((1..=20).map(|i| 100.0 - i as f64));
    let bars = candles_from_closes(&closes, 0.5);
    let params = IndicatorParams::default();
    let detector = SignalDetector::new(0.0);

    let long = detector.evaluate_bars(&bars[..61], &params, PositionSide::Long);
    assert_eq!(long.action, SignalAction::Close);

    let flat = detector.evaluate_bars(&bars[..61], &params, PositionSide::None);
    assert_eq!(flat.action, SignalAction::OpenShort);

    let short = detector.evaluate_bars(&bars[..61], &params, PositionSide::Short);
    assert_eq!(short.action, SignalAction::Hold);
}

// =============================================================================
// Risk Engine Tests
// =============================================================================

#[test]
fn test_initial_stops_exact() {
    let engine = RiskEngine::default();
    let params = StopParams {
        sl_atr_multiple: 2.0,
        tp_atr_multiple: 3.0,
        ..StopParams::default()
    };
    let state = ready(
        engine
            .initialize_stops(100.0, PositionSide::Long, 2.0, &params)
            .unwrap(),
    );
    assert_eq!(state.stop_loss, 96.0);
    assert_eq!(state.take_profit, 106.0);
}

#[test]
fn test_unusable_inputs_degrade_without_touching_state() {
    let engine = RiskEngine::default();
    let params = StopParams::default();

    for (entry, atr) in [(100.0, 0.0), (0.0, 2.0), (-5.0, 2.0), (100.0, f64::NAN)] {
        let init = engine
            .initialize_stops(entry, PositionSide::Long, atr, &params)
            .unwrap();
        assert!(matches!(init, StopInit::Degraded(_)), "entry {entry} atr {atr}");
    }

    let mut state = ready(
        engine
            .initialize_stops(100.0, PositionSide::Long, 2.0, &params)
            .unwrap(),
    );
    let before = state;
    let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);
    let update = engine
        .update_trailing_stop(&mut state, &mut extremum, 110.0, 0.0, &params, None)
        .unwrap();
    assert!(matches!(update, StopUpdate::Degraded(_)));
    assert_eq!(state, before);
}

#[test]
fn test_rally_then_pullback_scenario() {
    let engine = RiskEngine::default();
    let params = StopParams::default();
    let mut state = ready(
        engine
            .initialize_stops(100.0, PositionSide::Long, 2.0, &params)
            .unwrap(),
    );
    assert_eq!((state.stop_loss, state.take_profit), (96.0, 106.0));
    let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

    // Rally past the 1% trigger
    let update = engine
        .update_trailing_stop(&mut state, &mut extremum, 105.0, 2.0, &params, None)
        .unwrap();
    assert!(matches!(update, StopUpdate::Tightened { .. }));
    let expected = 96.0_f64.max(105.0 - 2.0 * 2.0).max(105.0 * (1.0 - params.trail_pct));
    assert!(state.stop_loss > 96.0);
    assert_relative_eq!(state.stop_loss, expected, epsilon = 1e-9);

    // The pullback cannot loosen the stop and is now beyond it
    engine
        .update_trailing_stop(&mut state, &mut extremum, 96.5, 2.0, &params, None)
        .unwrap();
    assert_relative_eq!(state.stop_loss, expected, epsilon = 1e-9);
    assert_eq!(state.exit_trigger(96.5), Some(ExitReason::StopLoss));
}

#[test]
fn test_pullback_without_activation_does_not_exit() {
    let engine = RiskEngine::default();
    let params = StopParams::default();
    let mut state = ready(
        engine
            .initialize_stops(100.0, PositionSide::Long, 2.0, &params)
            .unwrap(),
    );
    let mut extremum = TrailingExtremum::new(PositionSide::Long, 100.0);

    for price in [100.5, 100.8, 96.5] {
        engine
            .update_trailing_stop(&mut state, &mut extremum, price, 2.0, &params, None)
            .unwrap();
    }
    assert_eq!(state.stop_loss, 96.0);
    assert_eq!(state.exit_trigger(96.5), None);
    assert_eq!(state.exit_trigger(95.9), Some(ExitReason::StopLoss));
}

#[test]
fn test_degenerate_levels_surface_as_invariant_kind() {
    let engine = RiskEngine::default();
    // Liquidation above entry would push a long stop past the entry price
    let result = engine.initialize_with(
        &StopContext {
            entry_price: 100.0,
            side: PositionSide::Long,
            atr: 2.0,
            range_ratio: None,
            liquidation_price: Some(101.0),
        },
        &StopParams::default(),
    );
    let err = result.unwrap_err();
    assert!(matches!(err, RiskError::InvariantViolation(_)));

    let engine_err: EngineError = err.into();
    assert_eq!(engine_err.kind(), ErrorKind::Invariant);
}
