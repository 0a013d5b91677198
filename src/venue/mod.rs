//! Venue client interface
//!
//! The engine talks to an exchange only through [`VenueClient`]. Each venue
//! gets one implementation with one submission path per intent.

pub mod paper;

use async_trait::async_trait;

use crate::error::VenueError;
use crate::types::{
    Candle, ConditionalOrder, InstrumentSpec, MarketOrder, OpenOrder, Position, Symbol,
};

pub use paper::PaperVenue;

#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Bars in ascending time order; may be empty
    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError>;

    /// Current position; flat when none is open.
    ///
    /// `force_refresh` bypasses any client-side cache.
    async fn fetch_position(
        &self,
        symbol: &Symbol,
        force_refresh: bool,
    ) -> Result<Position, VenueError>;

    async fn fetch_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>, VenueError>;

    /// Returns the venue order id
    async fn submit_market_order(&self, order: &MarketOrder) -> Result<String, VenueError>;

    /// Returns the venue id of the conditional order
    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<String, VenueError>;

    async fn cancel_order(&self, order_id: &str, symbol: &Symbol) -> Result<(), VenueError>;

    /// Cancel every resting regular order; returns how many were cancelled
    async fn cancel_all_orders(&self, symbol: &Symbol) -> Result<usize, VenueError>;

    /// Cancel every pending SL/TP order; returns how many were cancelled
    async fn cancel_conditional_orders(&self, symbol: &Symbol) -> Result<usize, VenueError>;

    /// Free quote-currency balance
    async fn fetch_balance(&self) -> Result<f64, VenueError>;

    async fn fetch_last_price(&self, symbol: &Symbol) -> Result<f64, VenueError>;

    async fn instrument(&self, symbol: &Symbol) -> Result<InstrumentSpec, VenueError>;

    async fn set_leverage(&self, symbol: &Symbol, leverage: f64) -> Result<(), VenueError>;
}
