//! Paper trading venue
//!
//! In-memory account with one position per symbol. Market orders fill at
//! the latest close; pending SL/TP orders fire when a later bar trades
//! through their trigger. Bars are either pushed in directly or pulled
//! from another venue's public market data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::VenueClient;
use crate::error::VenueError;
use crate::types::{
    Candle, ConditionalKind, ConditionalOrder, InstrumentSpec, MarketOrder, OpenOrder, OrderSide,
    Position, PositionSide, Symbol,
};

/// Maintenance margin used for the liquidation estimate
const MAINTENANCE_MARGIN: f64 = 0.005;

/// Bars kept per symbol
const MAX_BARS: usize = 1000;

/// A position closed inside the paper venue
#[derive(Debug, Clone, PartialEq)]
pub struct PaperFill {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub price: f64,
    pub realized_pnl: f64,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: PositionSide,
    size: f64,
    entry_price: f64,
}

#[derive(Debug, Clone)]
struct PendingConditional {
    id: String,
    order: ConditionalOrder,
}

#[derive(Debug, Default)]
struct PaperState {
    balance: f64,
    bars: HashMap<Symbol, Vec<Candle>>,
    positions: HashMap<Symbol, PaperPosition>,
    conditionals: Vec<PendingConditional>,
    specs: HashMap<Symbol, InstrumentSpec>,
    leverage: HashMap<Symbol, f64>,
    unavailable: HashMap<Symbol, bool>,
    fills: Vec<PaperFill>,
    next_id: u64,
}

impl PaperState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn spec(&self, symbol: &Symbol) -> InstrumentSpec {
        self.specs
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| InstrumentSpec::fallback(symbol.clone()))
    }

    fn last_close(&self, symbol: &Symbol) -> Option<f64> {
        self.bars.get(symbol).and_then(|b| b.last()).map(|b| b.close)
    }

    fn pnl(&self, symbol: &Symbol, pos: &PaperPosition, exit: f64, size: f64) -> f64 {
        let ct_val = self.spec(symbol).contract_value;
        match pos.side {
            PositionSide::Long => (exit - pos.entry_price) * size * ct_val,
            PositionSide::Short => (pos.entry_price - exit) * size * ct_val,
            PositionSide::None => 0.0,
        }
    }

    /// Reduce the position on `symbol` by `size` at `price`
    fn reduce(&mut self, symbol: &Symbol, size: f64, price: f64, reason: &str) -> Option<PaperFill> {
        let pos = self.positions.get(symbol)?.clone();
        let size = size.min(pos.size);
        let realized = self.pnl(symbol, &pos, price, size);
        self.balance += realized;

        let remaining = pos.size - size;
        if remaining <= 1e-12 {
            self.positions.remove(symbol);
            // Reduce-only orders have nothing left to act on
            self.conditionals.retain(|c| &c.order.symbol != symbol);
        } else if let Some(p) = self.positions.get_mut(symbol) {
            p.size = remaining;
        }

        let fill = PaperFill {
            symbol: symbol.clone(),
            side: pos.side,
            size,
            price,
            realized_pnl: realized,
            reason: reason.to_string(),
        };
        self.fills.push(fill.clone());
        Some(fill)
    }

    /// Fire conditionals crossed by `bar`
    fn process_triggers(&mut self, symbol: &Symbol, bar: &Candle) {
        let fired: Vec<PendingConditional> = self
            .conditionals
            .iter()
            .filter(|c| &c.order.symbol == symbol && crossed(&c.order, bar))
            .cloned()
            .collect();

        for pending in fired {
            if !self.conditionals.iter().any(|c| c.id == pending.id) {
                continue;
            }
            self.conditionals.retain(|c| c.id != pending.id);
            let reason = format!("{} triggered at {}", pending.order.kind, pending.order.trigger_price);
            if let Some(fill) = self.reduce(
                symbol,
                pending.order.size,
                pending.order.trigger_price,
                &reason,
            ) {
                info!(
                    "[paper] {} {} closed {:.4} @ {:.6} pnl {:.4} ({})",
                    symbol, fill.side, fill.size, fill.price, fill.realized_pnl, reason
                );
            }
        }
    }

    fn push_bar(&mut self, symbol: &Symbol, bar: Candle) {
        self.process_triggers(symbol, &bar);
        let bars = self.bars.entry(symbol.clone()).or_default();
        bars.push(bar);
        if bars.len() > MAX_BARS {
            let excess = bars.len() - MAX_BARS;
            bars.drain(..excess);
        }
    }
}

fn crossed(order: &ConditionalOrder, bar: &Candle) -> bool {
    match (order.side, order.kind) {
        // Closing a long
        (OrderSide::Sell, ConditionalKind::StopLoss) => bar.low <= order.trigger_price,
        (OrderSide::Sell, ConditionalKind::TakeProfit) => bar.high >= order.trigger_price,
        // Closing a short
        (OrderSide::Buy, ConditionalKind::StopLoss) => bar.high >= order.trigger_price,
        (OrderSide::Buy, ConditionalKind::TakeProfit) => bar.low <= order.trigger_price,
    }
}

/// Simulated account
#[derive(Clone)]
pub struct PaperVenue {
    state: Arc<Mutex<PaperState>>,
    market_data: Option<Arc<dyn VenueClient>>,
}

impl PaperVenue {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                balance: initial_balance,
                ..PaperState::default()
            })),
            market_data: None,
        }
    }

    /// Pull bars, prices and instrument specs from `source`
    pub fn with_market_data(mut self, source: Arc<dyn VenueClient>) -> Self {
        self.market_data = Some(source);
        self
    }

    pub async fn set_instrument(&self, spec: InstrumentSpec) {
        self.state.lock().await.specs.insert(spec.symbol.clone(), spec);
    }

    /// Append bars for `symbol`, firing any conditionals they cross
    pub async fn push_bars(&self, symbol: &Symbol, bars: impl IntoIterator<Item = Candle>) {
        let mut state = self.state.lock().await;
        for bar in bars {
            state.push_bar(symbol, bar);
        }
    }

    /// Make every call for `symbol` fail with a network error
    pub async fn set_unavailable(&self, symbol: &Symbol, unavailable: bool) {
        self.state
            .lock()
            .await
            .unavailable
            .insert(symbol.clone(), unavailable);
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    /// Every reduction so far, oldest first
    pub async fn fills(&self) -> Vec<PaperFill> {
        self.state.lock().await.fills.clone()
    }

    /// Pending conditional orders for `symbol`
    pub async fn pending_conditionals(&self, symbol: &Symbol) -> Vec<ConditionalOrder> {
        self.state
            .lock()
            .await
            .conditionals
            .iter()
            .filter(|c| &c.order.symbol == symbol)
            .map(|c| c.order.clone())
            .collect()
    }

    async fn check_available(&self, symbol: &Symbol) -> Result<(), VenueError> {
        let state = self.state.lock().await;
        if state.unavailable.get(symbol).copied().unwrap_or(false) {
            return Err(VenueError::Network(format!("{symbol} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError> {
        self.check_available(symbol).await?;

        if let Some(source) = &self.market_data {
            let fresh = source.fetch_bars(symbol, timeframe, limit).await?;
            let mut state = self.state.lock().await;
            let last_seen = state
                .bars
                .get(symbol)
                .and_then(|b| b.last())
                .map(|b| b.datetime);
            for bar in fresh {
                match last_seen {
                    Some(seen) if bar.datetime < seen => continue,
                    Some(seen) if bar.datetime == seen => {
                        // In-progress bar: refresh it in place
                        state.process_triggers(symbol, &bar);
                        if let Some(last) = state.bars.get_mut(symbol).and_then(|b| b.last_mut()) {
                            *last = bar;
                        }
                    }
                    _ => state.push_bar(symbol, bar),
                }
            }
        }

        let state = self.state.lock().await;
        let bars = state.bars.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    async fn fetch_position(
        &self,
        symbol: &Symbol,
        _force_refresh: bool,
    ) -> Result<Position, VenueError> {
        self.check_available(symbol).await?;
        let state = self.state.lock().await;
        let Some(pos) = state.positions.get(symbol) else {
            return Ok(Position::flat(symbol.clone()));
        };

        let leverage = state.leverage.get(symbol).copied().unwrap_or(10.0);
        let last = state.last_close(symbol).unwrap_or(pos.entry_price);
        let liquidation_price = (leverage > 0.0).then(|| match pos.side {
            PositionSide::Short => pos.entry_price * (1.0 + 1.0 / leverage - MAINTENANCE_MARGIN),
            _ => pos.entry_price * (1.0 - 1.0 / leverage + MAINTENANCE_MARGIN),
        });

        Ok(Position {
            symbol: symbol.clone(),
            side: pos.side,
            size: pos.size,
            entry_price: pos.entry_price,
            unrealized_pnl: state.pnl(symbol, pos, last, pos.size),
            leverage,
            liquidation_price,
        })
    }

    async fn fetch_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>, VenueError> {
        self.check_available(symbol).await?;
        // Market orders fill immediately, nothing ever rests
        Ok(Vec::new())
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<String, VenueError> {
        self.check_available(&order.symbol).await?;
        if !(order.size.is_finite() && order.size > 0.0) {
            return Err(VenueError::Rejected(format!("invalid size {}", order.size)));
        }

        let mut state = self.state.lock().await;
        let price = state
            .last_close(&order.symbol)
            .ok_or_else(|| VenueError::NotFound(format!("no price for {}", order.symbol)))?;
        let id = state.next_id("paper");

        if order.reduce_only {
            let held = state.positions.get(&order.symbol).map(|p| p.side);
            if held != Some(order.position_side) {
                return Err(VenueError::Rejected(format!(
                    "reduce-only {} order without a {} position",
                    order.side, order.position_side
                )));
            }
            if let Some(fill) = state.reduce(&order.symbol, order.size, price, "market close") {
                info!(
                    "[paper] {} {} closed {:.4} @ {:.6} pnl {:.4}",
                    order.symbol, fill.side, fill.size, fill.price, fill.realized_pnl
                );
            }
            return Ok(id);
        }

        if order.position_side.entry_order_side() != Some(order.side) {
            return Err(VenueError::Rejected(format!(
                "{} order cannot open a {} position",
                order.side, order.position_side
            )));
        }

        match state.positions.get_mut(&order.symbol) {
            Some(pos) if pos.side != order.position_side => {
                return Err(VenueError::Rejected(format!(
                    "{} already holds a {} position",
                    order.symbol, pos.side
                )));
            }
            Some(pos) => {
                let total = pos.size + order.size;
                pos.entry_price = (pos.entry_price * pos.size + price * order.size) / total;
                pos.size = total;
            }
            None => {
                state.positions.insert(
                    order.symbol.clone(),
                    PaperPosition {
                        side: order.position_side,
                        size: order.size,
                        entry_price: price,
                    },
                );
            }
        }

        info!(
            "[paper] {} opened {} {:.4} @ {:.6}",
            order.symbol, order.position_side, order.size, price
        );
        Ok(id)
    }

    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<String, VenueError> {
        self.check_available(&order.symbol).await?;
        if !(order.trigger_price.is_finite() && order.trigger_price > 0.0) {
            return Err(VenueError::Rejected(format!(
                "invalid trigger price {}",
                order.trigger_price
            )));
        }

        let mut state = self.state.lock().await;
        if !state.positions.contains_key(&order.symbol) && order.reduce_only {
            return Err(VenueError::Rejected(format!(
                "no position to protect on {}",
                order.symbol
            )));
        }

        let id = state.next_id("algo");
        debug!(
            "[paper] {} {} {} trigger {:.6} size {:.4}",
            order.symbol, order.kind, order.side, order.trigger_price, order.size
        );
        state.conditionals.push(PendingConditional {
            id: id.clone(),
            order: order.clone(),
        });
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &Symbol) -> Result<(), VenueError> {
        self.check_available(symbol).await?;
        let mut state = self.state.lock().await;
        let before = state.conditionals.len();
        state.conditionals.retain(|c| c.id != order_id);
        if state.conditionals.len() == before {
            return Err(VenueError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &Symbol) -> Result<usize, VenueError> {
        self.check_available(symbol).await?;
        Ok(0)
    }

    async fn cancel_conditional_orders(&self, symbol: &Symbol) -> Result<usize, VenueError> {
        self.check_available(symbol).await?;
        let mut state = self.state.lock().await;
        let before = state.conditionals.len();
        state.conditionals.retain(|c| &c.order.symbol != symbol);
        Ok(before - state.conditionals.len())
    }

    async fn fetch_balance(&self) -> Result<f64, VenueError> {
        Ok(self.state.lock().await.balance)
    }

    async fn fetch_last_price(&self, symbol: &Symbol) -> Result<f64, VenueError> {
        self.check_available(symbol).await?;
        let state = self.state.lock().await;
        state
            .last_close(symbol)
            .ok_or_else(|| VenueError::NotFound(format!("no price for {symbol}")))
    }

    async fn instrument(&self, symbol: &Symbol) -> Result<InstrumentSpec, VenueError> {
        {
            let state = self.state.lock().await;
            if let Some(spec) = state.specs.get(symbol) {
                return Ok(spec.clone());
            }
        }

        let spec = match &self.market_data {
            Some(source) => source.instrument(symbol).await?,
            None => InstrumentSpec::fallback(symbol.clone()),
        };
        self.state
            .lock()
            .await
            .specs
            .insert(symbol.clone(), spec.clone());
        Ok(spec)
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: f64) -> Result<(), VenueError> {
        if leverage <= 0.0 {
            return Err(VenueError::Rejected(format!("invalid leverage {leverage}")));
        }
        self.state
            .lock()
            .await
            .leverage
            .insert(symbol.clone(), leverage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i),
            open: close,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    fn open_long(symbol: &Symbol, size: f64) -> MarketOrder {
        MarketOrder {
            symbol: symbol.clone(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            size,
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn test_open_and_close_long() {
        let venue = PaperVenue::new(1000.0);
        let symbol = Symbol::new("FIL-USDT-SWAP");
        venue.push_bars(&symbol, [bar(0, 101.0, 99.0, 100.0)]).await;

        venue.submit_market_order(&open_long(&symbol, 2.0)).await.unwrap();
        let pos = venue.fetch_position(&symbol, true).await.unwrap();
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.entry_price, 100.0);

        venue.push_bars(&symbol, [bar(1, 111.0, 109.0, 110.0)]).await;
        let close = MarketOrder {
            side: OrderSide::Sell,
            reduce_only: true,
            ..open_long(&symbol, 2.0)
        };
        venue.submit_market_order(&close).await.unwrap();

        assert!(!venue.fetch_position(&symbol, true).await.unwrap().is_open());
        assert_eq!(venue.balance().await, 1020.0);
    }

    #[tokio::test]
    async fn test_stop_loss_fires_on_later_bar() {
        let venue = PaperVenue::new(1000.0);
        let symbol = Symbol::new("WIF-USDT-SWAP");
        venue.push_bars(&symbol, [bar(0, 101.0, 99.0, 100.0)]).await;
        venue.submit_market_order(&open_long(&symbol, 1.0)).await.unwrap();

        let stop = ConditionalOrder {
            symbol: symbol.clone(),
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            size: 1.0,
            trigger_price: 96.0,
            kind: ConditionalKind::StopLoss,
            reduce_only: true,
        };
        venue.submit_conditional_order(&stop).await.unwrap();
        venue
            .submit_conditional_order(&ConditionalOrder {
                trigger_price: 106.0,
                kind: ConditionalKind::TakeProfit,
                ..stop.clone()
            })
            .await
            .unwrap();

        venue.push_bars(&symbol, [bar(1, 100.0, 95.0, 95.5)]).await;

        let fills = venue.fills().await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, 96.0);
        assert_eq!(fills[0].realized_pnl, -4.0);
        // Sibling take-profit is dropped with the position
        assert!(venue.pending_conditionals(&symbol).await.is_empty());
    }

    #[tokio::test]
    async fn test_opposite_side_rejected() {
        let venue = PaperVenue::new(1000.0);
        let symbol = Symbol::new("WLD-USDT-SWAP");
        venue.push_bars(&symbol, [bar(0, 101.0, 99.0, 100.0)]).await;
        venue.submit_market_order(&open_long(&symbol, 1.0)).await.unwrap();

        let short = MarketOrder {
            side: OrderSide::Sell,
            position_side: PositionSide::Short,
            ..open_long(&symbol, 1.0)
        };
        assert!(matches!(
            venue.submit_market_order(&short).await,
            Err(VenueError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_symbol() {
        let venue = PaperVenue::new(1000.0);
        let symbol = Symbol::new("ZRO-USDT-SWAP");
        venue.set_unavailable(&symbol, true).await;
        let err = venue.fetch_bars(&symbol, "15m", 100).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_bars_respects_limit() {
        let venue = PaperVenue::new(1000.0);
        let symbol = Symbol::new("FIL-USDT-SWAP");
        venue
            .push_bars(&symbol, (0..10).map(|i| bar(i, 11.0, 9.0, 10.0)))
            .await;
        let bars = venue.fetch_bars(&symbol, "15m", 4).await.unwrap();
        assert_eq!(bars.len(), 4);
        assert!(bars.windows(2).all(|w| w[0].datetime < w[1].datetime));
    }
}
