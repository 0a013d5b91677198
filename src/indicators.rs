//! Technical indicators
//!
//! Pure functions over an ascending bar window. Nothing here keeps
//! streaming state: the engine re-derives every value from the latest
//! window each cycle.

use itertools::Itertools;

use crate::error::IndicatorError;
use crate::types::Candle;

/// Guard for divisions whose denominator may legitimately reach zero
const EPSILON: f64 = 1e-12;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    if period == 0 {
        return vec![None; values.len()];
    }

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate Exponential Moving Average
///
/// Smoothing constant is `2 / (period + 1)`; the first value is the simple
/// mean of the first `period` samples.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            // Seed with SMA
            let sum: f64 = values[..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev) = ema_value {
            let next = (value - prev) * multiplier + prev;
            ema_value = Some(next);
            result.push(Some(next));
        }
    }

    result
}

/// Latest MACD reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line, signal and histogram at the last close
///
/// Requires `closes.len() >= slow + signal`. Never returns zeros in place
/// of missing data.
pub fn macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<MacdValue, IndicatorError> {
    if fast == 0 || slow == 0 || signal == 0 {
        return Err(IndicatorError::InvalidPeriod(format!(
            "macd periods must be positive ({fast}/{slow}/{signal})"
        )));
    }
    if fast >= slow {
        return Err(IndicatorError::InvalidPeriod(format!(
            "macd fast period {fast} must be below slow period {slow}"
        )));
    }

    let required = slow + signal;
    if closes.len() < required {
        return Err(IndicatorError::InsufficientData {
            required,
            available: closes.len(),
        });
    }

    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .filter_map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let signal_series = ema(&line, signal);

    match (line.last(), signal_series.last().copied().flatten()) {
        (Some(&line), Some(signal)) => Ok(MacdValue {
            line,
            signal,
            histogram: line - signal,
        }),
        _ => Err(IndicatorError::InsufficientData {
            required,
            available: closes.len(),
        }),
    }
}

/// True range for each bar after the first
///
/// `result[i]` belongs to `bars[i + 1]` and uses `bars[i].close` as the
/// previous close.
pub fn true_range(bars: &[Candle]) -> Vec<f64> {
    bars.iter()
        .tuple_windows()
        .map(|(prev, cur)| {
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Wilder-smoothed ATR series
///
/// The first value is the mean of the first `period` true ranges, each
/// following value is `(prev * (period - 1) + tr) / period`.
pub fn atr_series(bars: &[Candle], period: usize) -> Result<Vec<f64>, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod("atr period must be positive".into()));
    }
    let required = period + 1;
    if bars.len() < required {
        return Err(IndicatorError::InsufficientData {
            required,
            available: bars.len(),
        });
    }

    let tr = true_range(bars);
    let p = period as f64;
    let seed = tr[..period].iter().sum::<f64>() / p;

    let mut out = Vec::with_capacity(tr.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &value in &tr[period..] {
        prev = (prev * (p - 1.0) + value) / p;
        out.push(prev);
    }

    Ok(out)
}

/// Latest Wilder ATR value
pub fn atr(bars: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    let series = atr_series(bars, period)?;
    series.last().copied().ok_or(IndicatorError::InsufficientData {
        required: period + 1,
        available: bars.len(),
    })
}

/// Average Directional Index at the last bar
///
/// Requires `2 * period` bars: `period` bars to seed the smoothed
/// directional movement and another `period` DX values to seed the ADX.
pub fn adx(bars: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod("adx period must be positive".into()));
    }
    let required = 2 * period;
    if bars.len() < required {
        return Err(IndicatorError::InsufficientData {
            required,
            available: bars.len(),
        });
    }

    let tr = true_range(bars);
    let (plus_dm, minus_dm): (Vec<f64>, Vec<f64>) = bars
        .iter()
        .tuple_windows()
        .map(|(prev, cur)| {
            let up = cur.high - prev.high;
            let down = prev.low - cur.low;
            let plus = if up > down && up > 0.0 { up } else { 0.0 };
            let minus = if down > up && down > 0.0 { down } else { 0.0 };
            (plus, minus)
        })
        .unzip();

    let p = period as f64;
    let mut tr_sm: f64 = tr[..period].iter().sum();
    let mut plus_sm: f64 = plus_dm[..period].iter().sum();
    let mut minus_sm: f64 = minus_dm[..period].iter().sum();

    let dx_at = |tr_sm: f64, plus_sm: f64, minus_sm: f64| {
        let tr_sm = if tr_sm.abs() < EPSILON { EPSILON } else { tr_sm };
        let plus_di = 100.0 * plus_sm / tr_sm;
        let minus_di = 100.0 * minus_sm / tr_sm;
        let sum = plus_di + minus_di;
        let sum = if sum.abs() < EPSILON { EPSILON } else { sum };
        100.0 * (plus_di - minus_di).abs() / sum
    };

    let mut dx = Vec::with_capacity(tr.len() - period + 1);
    dx.push(dx_at(tr_sm, plus_sm, minus_sm));
    for i in period..tr.len() {
        tr_sm = tr_sm - tr_sm / p + tr[i];
        plus_sm = plus_sm - plus_sm / p + plus_dm[i];
        minus_sm = minus_sm - minus_sm / p + minus_dm[i];
        dx.push(dx_at(tr_sm, plus_sm, minus_sm));
    }

    if dx.len() < period {
        return Err(IndicatorError::InsufficientData {
            required: required + 1,
            available: bars.len(),
        });
    }

    let mut adx = dx[..period].iter().sum::<f64>() / p;
    for &value in &dx[period..] {
        adx = (adx * (p - 1.0) + value) / p;
    }

    Ok(adx)
}

/// Periods feeding one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorParams {
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub adx_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            adx_period: 14,
        }
    }
}

impl IndicatorParams {
    /// Bars needed for a crossover comparison
    ///
    /// One bar beyond the first full MACD for the previous snapshot, plus one
    /// so the previous signal line has been smoothed at least once.
    pub fn min_bars(&self) -> usize {
        self.macd_slow + self.macd_signal + 2
    }
}

/// Trend and volatility metrics over a window ending at one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    /// None when the window is too short for ATR
    pub atr: Option<f64>,
    /// None when the window is too short for ADX
    pub adx: Option<f64>,
    pub close: f64,
}

impl IndicatorSnapshot {
    /// Compute a snapshot over the whole of `bars`
    pub fn compute(bars: &[Candle], params: &IndicatorParams) -> Result<Self, IndicatorError> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let macd = macd(
            &closes,
            params.macd_fast,
            params.macd_slow,
            params.macd_signal,
        )?;
        let close = closes.last().copied().ok_or(IndicatorError::InsufficientData {
            required: params.min_bars(),
            available: 0,
        })?;

        Ok(IndicatorSnapshot {
            line: macd.line,
            signal: macd.signal,
            histogram: macd.histogram,
            atr: atr(bars, params.atr_period).ok().filter(|v| *v > 0.0),
            adx: adx(bars, params.adx_period).ok(),
            close,
        })
    }
}

/// Snapshots for the full window and for the window without its last bar
pub fn snapshot_pair(
    bars: &[Candle],
    params: &IndicatorParams,
) -> Result<(IndicatorSnapshot, IndicatorSnapshot), IndicatorError> {
    let required = params.min_bars();
    if bars.len() < required {
        return Err(IndicatorError::InsufficientData {
            required,
            available: bars.len(),
        });
    }

    let current = IndicatorSnapshot::compute(bars, params)?;
    let previous = IndicatorSnapshot::compute(&bars[..bars.len() - 1], params)?;
    Ok((current, previous))
}
