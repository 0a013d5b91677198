//! MACD crossover signal detection
//!
//! A three-state machine per symbol (flat, long, short). Transitions are
//! driven only by confirmed crossovers between two consecutive indicator
//! snapshots; a position only returns to flat when the venue reports it
//! closed.

use crate::indicators::{snapshot_pair, IndicatorParams, IndicatorSnapshot};
use crate::types::{Candle, PositionSide};

/// Action requested by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::OpenLong => write!(f, "open-long"),
            SignalAction::OpenShort => write!(f, "open-short"),
            SignalAction::Close => write!(f, "close"),
            SignalAction::Hold => write!(f, "hold"),
        }
    }
}

/// Detector output with a human-readable reason
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecision {
    pub action: SignalAction,
    pub reason: String,
}

impl SignalDecision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            reason: reason.into(),
        }
    }

    fn new(action: SignalAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.action, SignalAction::OpenLong | SignalAction::OpenShort)
    }
}

pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// Dual-confirmation crossover detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalDetector {
    /// Entries are suppressed while ADX is positive and below this value.
    /// Zero disables the filter.
    pub adx_min_trend: f64,
}

impl Default for SignalDetector {
    fn default() -> Self {
        Self { adx_min_trend: 0.0 }
    }
}

impl SignalDetector {
    pub fn new(adx_min_trend: f64) -> Self {
        Self { adx_min_trend }
    }

    /// Decide from a current/previous snapshot pair and the held side
    ///
    /// Missing snapshots always yield a hold with reason
    /// `"insufficient data"`.
    pub fn evaluate(
        &self,
        current: Option<&IndicatorSnapshot>,
        previous: Option<&IndicatorSnapshot>,
        side: PositionSide,
    ) -> SignalDecision {
        let (cur, prev) = match (current, previous) {
            (Some(cur), Some(prev)) => (cur, prev),
            _ => return SignalDecision::hold(INSUFFICIENT_DATA),
        };

        let values = [
            cur.line,
            cur.signal,
            cur.histogram,
            prev.line,
            prev.signal,
            prev.histogram,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return SignalDecision::hold(INSUFFICIENT_DATA);
        }

        match side {
            PositionSide::None => self.evaluate_flat(cur, prev),
            PositionSide::Long => {
                let bearish_cross = prev.line >= prev.signal && cur.line < cur.signal;
                if bearish_cross && cur.histogram < 0.0 {
                    SignalDecision::new(
                        SignalAction::Close,
                        format!(
                            "MACD dead cross while long (hist {:.6})",
                            cur.histogram
                        ),
                    )
                } else {
                    SignalDecision::hold("holding long, no reversal")
                }
            }
            PositionSide::Short => {
                let bullish_cross = prev.line <= prev.signal && cur.line > cur.signal;
                if bullish_cross && cur.histogram > 0.0 {
                    SignalDecision::new(
                        SignalAction::Close,
                        format!(
                            "MACD golden cross while short (hist {:.6})",
                            cur.histogram
                        ),
                    )
                } else {
                    SignalDecision::hold("holding short, no reversal")
                }
            }
        }
    }

    fn evaluate_flat(&self, cur: &IndicatorSnapshot, prev: &IndicatorSnapshot) -> SignalDecision {
        let buy_cross = prev.line <= prev.signal && cur.line > cur.signal;
        let buy_color = prev.histogram <= 0.0 && cur.histogram > 0.0;
        let sell_cross = prev.line >= prev.signal && cur.line < cur.signal;
        let sell_color = prev.histogram >= 0.0 && cur.histogram < 0.0;

        let action = if buy_cross && buy_color {
            SignalAction::OpenLong
        } else if sell_cross && sell_color {
            SignalAction::OpenShort
        } else {
            return match (buy_cross || sell_cross, buy_color || sell_color) {
                (true, false) => SignalDecision::hold("crossover without histogram flip"),
                (false, true) => SignalDecision::hold("histogram flip without crossover"),
                _ => SignalDecision::hold("no signal"),
            };
        };

        if let Some(adx) = cur.adx {
            if self.adx_min_trend > 0.0 && adx > 0.0 && adx < self.adx_min_trend {
                return SignalDecision::hold(format!(
                    "trend too weak (ADX {:.1} < {:.1})",
                    adx, self.adx_min_trend
                ));
            }
        }

        let reason = match action {
            SignalAction::OpenLong => format!(
                "MACD golden cross, histogram turned positive ({:.6})",
                cur.histogram
            ),
            _ => format!(
                "MACD dead cross, histogram turned negative ({:.6})",
                cur.histogram
            ),
        };
        SignalDecision::new(action, reason)
    }

    /// Compute the snapshot pair from `bars` and evaluate it
    ///
    /// Too few bars degrade to a hold; this never fails.
    pub fn evaluate_bars(
        &self,
        bars: &[Candle],
        params: &IndicatorParams,
        side: PositionSide,
    ) -> SignalDecision {
        if bars.len() < 2 {
            return SignalDecision::hold(INSUFFICIENT_DATA);
        }
        match snapshot_pair(bars, params) {
            Ok((current, previous)) => self.evaluate(Some(&current), Some(&previous), side),
            Err(_) => SignalDecision::hold(INSUFFICIENT_DATA),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(line: f64, signal: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            line,
            signal,
            histogram: line - signal,
            atr: Some(1.0),
            adx: None,
            close: 100.0,
        }
    }

    #[test]
    fn test_missing_snapshot_holds() {
        let detector = SignalDetector::default();
        let decision = detector.evaluate(None, Some(&snap(0.0, 0.0)), PositionSide::None);
        assert_eq!(decision.action, SignalAction::Hold);
        assert_eq!(decision.reason, INSUFFICIENT_DATA);
    }

    #[test]
    fn test_golden_cross_opens_long() {
        let detector = SignalDetector::default();
        let decision = detector.evaluate(
            Some(&snap(0.5, 0.2)),
            Some(&snap(-0.1, 0.1)),
            PositionSide::None,
        );
        assert_eq!(decision.action, SignalAction::OpenLong);
    }

    #[test]
    fn test_dead_cross_opens_short() {
        let detector = SignalDetector::default();
        let decision = detector.evaluate(
            Some(&snap(-0.5, -0.2)),
            Some(&snap(0.1, -0.1)),
            PositionSide::None,
        );
        assert_eq!(decision.action, SignalAction::OpenShort);
    }

    #[test]
    fn test_cross_without_flip_holds() {
        let detector = SignalDetector::default();
        let mut prev = snap(-0.1, 0.1);
        // Histogram already positive on the previous bar
        prev.histogram = 0.05;
        let decision = detector.evaluate(Some(&snap(0.5, 0.2)), Some(&prev), PositionSide::None);
        assert_eq!(decision.action, SignalAction::Hold);
        assert_eq!(decision.reason, "crossover without histogram flip");
    }

    #[test]
    fn test_weak_trend_suppresses_entry() {
        let detector = SignalDetector::new(25.0);
        let mut cur = snap(0.5, 0.2);
        cur.adx = Some(18.0);
        let decision = detector.evaluate(Some(&cur), Some(&snap(-0.1, 0.1)), PositionSide::None);
        assert_eq!(decision.action, SignalAction::Hold);
        assert!(decision.reason.starts_with("trend too weak"));
    }

    #[test]
    fn test_close_long_on_dead_cross() {
        let detector = SignalDetector::new(25.0);
        let mut cur = snap(-0.5, -0.2);
        // Closing is never filtered by trend strength
        cur.adx = Some(5.0);
        let decision = detector.evaluate(Some(&cur), Some(&snap(0.1, -0.1)), PositionSide::Long);
        assert_eq!(decision.action, SignalAction::Close);
    }

    #[test]
    fn test_long_held_ignores_golden_cross() {
        let detector = SignalDetector::default();
        let decision = detector.evaluate(
            Some(&snap(0.5, 0.2)),
            Some(&snap(-0.1, 0.1)),
            PositionSide::Long,
        );
        assert_eq!(decision.action, SignalAction::Hold);
    }

    #[test]
    fn test_close_short_on_golden_cross() {
        let detector = SignalDetector::default();
        let decision = detector.evaluate(
            Some(&snap(0.5, 0.2)),
            Some(&snap(-0.1, 0.1)),
            PositionSide::Short,
        );
        assert_eq!(decision.action, SignalAction::Close);
    }

    #[test]
    fn test_evaluate_bars_short_series() {
        let detector = SignalDetector::default();
        let decision = detector.evaluate_bars(&[], &IndicatorParams::default(), PositionSide::None);
        assert_eq!(decision.reason, INSUFFICIENT_DATA);
    }
}
