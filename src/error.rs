//! Error taxonomy for the trading engine
//!
//! Venue failures, data shortfalls, order rejections and logic invariant
//! violations are kept as distinct types so the orchestrator can decide
//! between retry, skip and log without a blanket catch-all.

use thiserror::Error;

/// Errors raised by a venue client
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error {code}: {msg}")]
    Api { code: String, msg: String },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("failed to parse venue response: {0}")]
    Parse(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl VenueError {
    /// Whether the next scheduled cycle may reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Network(_) | VenueError::Api { .. })
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VenueError::Parse(err.to_string())
        } else {
            VenueError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for VenueError {
    fn from(err: serde_json::Error) -> Self {
        VenueError::Parse(err.to_string())
    }
}

/// Errors from indicator computation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("invalid period: {0}")]
    InvalidPeriod(String),
}

/// Risk engine failures that must never be mistaken for a normal hold
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("risk invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors surfaced from one symbol's cycle
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Invariant(#[from] RiskError),

    #[error("stats store error: {0}")]
    Stats(String),
}

/// Coarse classification used to pick log level and follow-up action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried implicitly by the next cycle
    Transient,
    /// Too few bars or unusable values, degrade to hold
    DataUnavailable,
    /// Venue refused the order, state is re-queried next cycle
    OrderRejected,
    /// Logic bug, fatal for this symbol's cycle only
    Invariant,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Venue(VenueError::Rejected(_)) => ErrorKind::OrderRejected,
            EngineError::Venue(VenueError::NotFound(_)) => ErrorKind::DataUnavailable,
            EngineError::Venue(_) => ErrorKind::Transient,
            EngineError::Indicator(_) => ErrorKind::DataUnavailable,
            EngineError::Invariant(_) => ErrorKind::Invariant,
            EngineError::Stats(_) => ErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VenueError::Network("timeout".into()).is_transient());
        assert!(VenueError::Api {
            code: "50011".into(),
            msg: "too many requests".into()
        }
        .is_transient());
        assert!(!VenueError::Rejected("bad size".into()).is_transient());
        assert!(!VenueError::Auth("bad key".into()).is_transient());
    }

    #[test]
    fn test_engine_error_kind() {
        let err: EngineError = VenueError::Rejected("51008".into()).into();
        assert_eq!(err.kind(), ErrorKind::OrderRejected);

        let err: EngineError = IndicatorError::InsufficientData {
            required: 55,
            available: 10,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);

        let err: EngineError = RiskError::InvariantViolation("negative distance".into()).into();
        assert_eq!(err.kind(), ErrorKind::Invariant);

        let err: EngineError = VenueError::Network("reset".into()).into();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
