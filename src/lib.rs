//! Perpetual Futures Trend Agent
//!
//! An automated trading agent for perpetual swaps: MACD crossover signals
//! with histogram confirmation, an optional ADX trend filter, and
//! ATR-scaled protective orders that ratchet toward price as a position
//! matures.

pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod okx;
pub mod risk;
pub mod signal;
pub mod sizing;
pub mod state;
pub mod stats;
pub mod types;
pub mod venue;

pub use config::{Config, SymbolConfig};
pub use engine::{CycleReport, Engine, SymbolOutcome};
pub use error::{EngineError, ErrorKind, VenueError};
pub use types::*;
pub use venue::{PaperVenue, VenueClient};
