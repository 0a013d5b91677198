//! Core data types used across the trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data (one price bar)
///
/// Bars are immutable once produced by the venue and always handed to the
/// engine in ascending time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// High-low range relative to close
    pub fn range_ratio(&self) -> f64 {
        if self.close <= 0.0 {
            return 0.0;
        }
        (self.high - self.low) / self.close
    }
}

/// Instrument identifier using Arc<str> for cheap cloning
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base currency of the instrument ("FIL-USDT-SWAP" -> "FIL")
    pub fn base(&self) -> &str {
        self.0
            .split(|c| c == '-' || c == '/')
            .next()
            .unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    #[default]
    None,
}

impl PositionSide {
    /// The order side that opens a position on this side
    pub fn entry_order_side(self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Buy),
            PositionSide::Short => Some(OrderSide::Sell),
            PositionSide::None => None,
        }
    }

    /// The order side that reduces a position on this side
    pub fn exit_order_side(self) -> Option<OrderSide> {
        match self {
            PositionSide::Long => Some(OrderSide::Sell),
            PositionSide::Short => Some(OrderSide::Buy),
            PositionSide::None => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
            PositionSide::None => PositionSide::None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
            PositionSide::None => write!(f, "none"),
        }
    }
}

/// Venue-owned position. The engine only ever holds a cached copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    /// Estimated liquidation price, when the venue reports one
    #[serde(default)]
    pub liquidation_price: Option<f64>,
}

impl Position {
    /// A flat position for `symbol`
    pub fn flat(symbol: Symbol) -> Self {
        Position {
            symbol,
            side: PositionSide::None,
            size: 0.0,
            entry_price: 0.0,
            unrealized_pnl: 0.0,
            leverage: 0.0,
            liquidation_price: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.size > 0.0 && self.side != PositionSide::None
    }

    pub fn notional(&self, price: f64) -> f64 {
        self.size * price
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Resting order as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub size: f64,
    /// None for market / trigger orders
    pub price: Option<f64>,
}

/// Market order intent
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    /// Position side the order acts on (hedge mode)
    pub position_side: PositionSide,
    /// Size in contracts
    pub size: f64,
    pub reduce_only: bool,
}

/// Kind of a venue-held conditional order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalKind {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ConditionalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionalKind::StopLoss => write!(f, "SL"),
            ConditionalKind::TakeProfit => write!(f, "TP"),
        }
    }
}

/// Conditional (trigger) order intent
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub size: f64,
    pub trigger_price: f64,
    pub kind: ConditionalKind,
    pub reduce_only: bool,
}

/// Trading constraints of an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: Symbol,
    /// Minimum order size in contracts
    pub min_size: f64,
    /// Order size step in contracts
    pub lot_size: f64,
    /// Price step
    pub tick_size: f64,
    /// Base units per contract
    pub contract_value: f64,
}

impl InstrumentSpec {
    /// Permissive spec used when the venue does not publish one
    pub fn fallback(symbol: Symbol) -> Self {
        InstrumentSpec {
            symbol,
            min_size: 0.000001,
            lot_size: 0.000001,
            tick_size: 0.0001,
            contract_value: 1.0,
        }
    }
}
