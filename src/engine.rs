//! Execution orchestrator
//!
//! Drives every configured symbol through one cycle at a time:
//! - Phase 1 (analysis): fetch bars, derive indicator snapshots, force a
//!   position refresh, ask the detector for a decision
//! - Phase 2 (execution): trail the stop, exit on SL/TP, keep protective
//!   orders on the venue, then act on the signal
//!
//! Each symbol's work is isolated; an error is classified by
//! [`EngineError::kind`] and logged without touching other symbols.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SymbolConfig};
use crate::error::{EngineError, ErrorKind, VenueError};
use crate::indicators::{atr, snapshot_pair, IndicatorSnapshot};
use crate::risk::{protective_levels, RiskEngine, StopContext, StopInit, StopUpdate};
use crate::signal::{SignalAction, SignalDecision};
use crate::sizing::contracts_for_notional;
use crate::state::StateStore;
use crate::stats::{StatsStore, TradeStats};
use crate::types::{
    Candle, ConditionalKind, ConditionalOrder, MarketOrder, Position, PositionSide, Symbol,
};
use crate::venue::VenueClient;

/// ATR / close below this is noted in the debug log
const LOW_VOLATILITY_RATIO: f64 = 0.004;

/// Shortest pause between cycles
const MIN_CYCLE_PAUSE: Duration = Duration::from_secs(1);

/// Phase 1 output for one symbol
#[derive(Debug, Clone)]
struct Analysis {
    bars: Vec<Candle>,
    current: Option<IndicatorSnapshot>,
    decision: SignalDecision,
}

impl Analysis {
    fn last_price(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    fn atr(&self) -> Option<f64> {
        self.current.and_then(|s| s.atr)
    }

    fn range_ratio(&self) -> Option<f64> {
        self.bars.last().map(Candle::range_ratio)
    }
}

/// Result of flattening a position
#[derive(Debug, Clone, Copy, PartialEq)]
enum Exit {
    AlreadyFlat,
    /// Accepted by the venue but not yet filled
    Pending,
    Closed {
        side: PositionSide,
        orders_cleared: bool,
    },
}

/// PnL of closing `position` at `exit`
fn realized_pnl(position: &Position, exit: f64, contract_value: f64) -> f64 {
    let per_contract = match position.side {
        PositionSide::Short => position.entry_price - exit,
        _ => exit - position.entry_price,
    };
    per_contract * position.size * contract_value
}

/// What happened to one symbol during a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Decided(SignalDecision),
    Failed(ErrorKind, String),
}

/// Per-symbol outcomes of one cycle, in configuration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(Symbol, SymbolOutcome)>,
}

impl CycleReport {
    pub fn outcome(&self, symbol: &Symbol) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, o)| o)
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::Failed(..)))
            .count()
    }
}

/// Trend-following agent bound to one venue
pub struct Engine<V: VenueClient> {
    venue: Arc<V>,
    config: Config,
    symbols: Vec<(Symbol, SymbolConfig)>,
    risk: RiskEngine,
    states: StateStore,
    stats_store: StatsStore,
    stats: TradeStats,
    cycle_count: u64,
    last_status_sync: Option<Instant>,
}

impl<V: VenueClient> Engine<V> {
    pub fn new(venue: Arc<V>, config: Config, stats_store: StatsStore) -> Result<Self, EngineError> {
        let symbols: Vec<(Symbol, SymbolConfig)> = config
            .symbols
            .iter()
            .map(|(name, cfg)| (Symbol::new(name), cfg.clone()))
            .collect();
        let states = StateStore::new(symbols.iter().map(|(s, _)| s));
        let stats = stats_store
            .load()
            .map_err(|e| EngineError::Stats(e.to_string()))?;
        let risk = RiskEngine::new(config.risk.clone());

        Ok(Self {
            venue,
            config,
            symbols,
            risk,
            states,
            stats_store,
            stats,
            cycle_count: 0,
            last_status_sync: None,
        })
    }

    pub fn venue(&self) -> &Arc<V> {
        &self.venue
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn stats(&self) -> &TradeStats {
        &self.stats
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Align local state with the venue before the first cycle
    ///
    /// Sets leverage, refreshes positions and adopts any position that is
    /// already open so its stops are managed from the first cycle. Failures
    /// are logged per symbol and never abort startup.
    pub async fn reconcile(&mut self) {
        info!("Reconciling {} symbols with {}", self.symbols.len(), self.venue.name());

        for (symbol, cfg) in self.symbols.clone() {
            if let Err(e) = self.venue.set_leverage(&symbol, cfg.leverage).await {
                warn!(symbol = %symbol, "Failed to set leverage {}x: {}", cfg.leverage, e);
            }

            if let Err(e) = self.adopt_position(&symbol, &cfg).await {
                self.report_error(&symbol, &e);
            }
        }
    }

    async fn adopt_position(&mut self, symbol: &Symbol, cfg: &SymbolConfig) -> Result<(), EngineError> {
        let position = self.venue.fetch_position(symbol, true).await?;
        self.states.entry(symbol).apply_position(position.clone());

        match self.venue.fetch_open_orders(symbol).await {
            Ok(orders) if !orders.is_empty() => {
                info!(symbol = %symbol, "{} open orders on venue", orders.len())
            }
            Ok(_) => {}
            Err(e) => warn!(symbol = %symbol, "Failed to list open orders: {}", e),
        }

        if !position.is_open() {
            return Ok(());
        }

        info!(
            symbol = %symbol,
            "Existing {} position: size {:.4} @ {:.6}, upl {:.4}",
            position.side, position.size, position.entry_price, position.unrealized_pnl
        );

        // Orders left by a previous run are replaced with fresh ones
        let stale = self.venue.cancel_conditional_orders(symbol).await?;
        if stale > 0 {
            info!(symbol = %symbol, "Cancelled {} stale conditional orders", stale);
        }

        let bars = self
            .venue
            .fetch_bars(symbol, &cfg.timeframe, cfg.bar_limit)
            .await?;
        let atr_value = atr(&bars, cfg.atr_period)?;
        let ctx = StopContext {
            entry_price: position.entry_price,
            side: position.side,
            atr: atr_value,
            range_ratio: bars.last().map(Candle::range_ratio),
            liquidation_price: position.liquidation_price,
        };
        self.start_tracking(symbol, &ctx, cfg)?;
        Ok(())
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// Run until Ctrl-C
    pub async fn run(&mut self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Error setting up signal handler: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, initiating shutdown...");
        })
        .await
    }

    /// Run cycles until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.reconcile().await;

        let interval = Duration::from_secs(self.config.engine.cycle_interval_secs);
        let backoff = Duration::from_secs(self.config.engine.error_backoff_secs);
        tokio::pin!(shutdown);

        info!("Starting trading loop...");
        loop {
            let started = Instant::now();
            let pause = match self.run_cycle().await {
                Ok(report) => {
                    if report.failures() > 0 {
                        debug!("Cycle {} finished with {} symbol failures", report.cycle, report.failures());
                    }
                    interval.saturating_sub(started.elapsed()).max(MIN_CYCLE_PAUSE)
                }
                Err(e) => {
                    error!("Trading cycle error: {} (retrying in {}s)", e, backoff.as_secs());
                    backoff
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                _ = &mut shutdown => break,
            }
        }

        info!("Trading loop stopped. {}", self.stats.summary());
    }

    /// One full pass over every symbol
    ///
    /// Only a failure shared by all symbols (the balance query) fails the
    /// cycle; per-symbol failures are recorded in the report.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        self.cycle_count += 1;
        info!("━━━ Trading cycle {} ━━━", self.cycle_count);

        self.sync_status_if_due().await;

        let balance = self.venue.fetch_balance().await?;
        self.log_status(balance);

        let mut report = CycleReport {
            cycle: self.cycle_count,
            outcomes: Vec::with_capacity(self.symbols.len()),
        };

        // Phase 1: analysis
        let mut analyses = Vec::with_capacity(self.symbols.len());
        for (symbol, cfg) in self.symbols.clone() {
            match self.analyze(&symbol, &cfg).await {
                Ok(analysis) => analyses.push((symbol, cfg, analysis)),
                Err(e) => {
                    self.report_error(&symbol, &e);
                    report
                        .outcomes
                        .push((symbol, SymbolOutcome::Failed(e.kind(), e.to_string())));
                }
            }
        }

        let active_signals = analyses.iter().filter(|(_, _, a)| a.decision.is_entry()).count();
        let notional = self
            .config
            .sizing
            .order_notional(balance, self.symbols.len(), active_signals);

        // Phase 2: execution
        for (symbol, cfg, analysis) in analyses {
            let outcome = match self.execute(&symbol, &cfg, &analysis, notional).await {
                Ok(()) => SymbolOutcome::Decided(analysis.decision),
                Err(e) => {
                    self.report_error(&symbol, &e);
                    SymbolOutcome::Failed(e.kind(), e.to_string())
                }
            };
            report.outcomes.push((symbol, outcome));
        }

        Ok(report)
    }

    // =========================================================================
    // Phase 1
    // =========================================================================

    async fn analyze(&mut self, symbol: &Symbol, cfg: &SymbolConfig) -> Result<Analysis, EngineError> {
        let bars = self
            .venue
            .fetch_bars(symbol, &cfg.timeframe, cfg.bar_limit)
            .await?;
        let params = cfg.indicator_params();
        let (current, previous) = match snapshot_pair(&bars, &params) {
            Ok((cur, prev)) => (Some(cur), Some(prev)),
            Err(e) => {
                debug!(symbol = %symbol, "Indicators unavailable: {}", e);
                (None, None)
            }
        };

        self.refresh_position(symbol, bars.last().map(|b| b.close)).await?;

        let side = self.states.entry(symbol).side();
        let decision = cfg
            .detector()
            .evaluate(current.as_ref(), previous.as_ref(), side);

        if let Some(snap) = current {
            if let Some(atr) = snap.atr.filter(|_| snap.close > 0.0) {
                let ratio = atr / snap.close;
                if ratio < LOW_VOLATILITY_RATIO {
                    debug!(symbol = %symbol, "Low volatility (ATR/close {:.4}), signal not filtered", ratio);
                }
            }
            info!(
                symbol = %symbol,
                "macd {:.6} signal {:.6} hist {:.6} adx {} | {} -> {} ({})",
                snap.line,
                snap.signal,
                snap.histogram,
                snap.adx.map_or("n/a".to_string(), |v| format!("{v:.1}")),
                side,
                decision.action,
                decision.reason
            );
        } else {
            info!(symbol = %symbol, "{} -> {} ({})", side, decision.action, decision.reason);
        }

        Ok(Analysis {
            bars,
            current,
            decision,
        })
    }

    /// Force-refresh the position, booking a close the venue made on its own
    async fn refresh_position(
        &mut self,
        symbol: &Symbol,
        last_price: Option<f64>,
    ) -> Result<Position, EngineError> {
        let position = self.venue.fetch_position(symbol, true).await?;

        let state = self.states.entry(symbol);
        let previous = state.position.clone();
        let closed_on_venue = state
            .sltp
            .filter(|_| previous.is_open())
            .is_some_and(|sltp| !position.is_open() || position.side != sltp.side);
        if !closed_on_venue {
            state.apply_position(position.clone());
            return Ok(position);
        }

        let spec = self.venue.instrument(symbol).await?;
        // Tracking ends here, so the close is booked at most once
        self.states.entry(symbol).apply_position(position.clone());

        let exit = last_price.unwrap_or(previous.entry_price);
        info!(
            symbol = %symbol,
            "{} position closed on venue (protective order filled) near {:.6}",
            previous.side, exit
        );
        self.record_trade(
            symbol,
            previous.side,
            realized_pnl(&previous, exit, spec.contract_value),
        )?;
        self.cancel_leftover_conditionals(symbol).await;
        Ok(position)
    }

    // =========================================================================
    // Phase 2
    // =========================================================================

    async fn execute(
        &mut self,
        symbol: &Symbol,
        cfg: &SymbolConfig,
        analysis: &Analysis,
        notional: f64,
    ) -> Result<(), EngineError> {
        let side = self.states.entry(symbol).side();

        if side != PositionSide::None {
            match self.manage_open_position(symbol, cfg, analysis, notional).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // A close signal is still honored without working stops
                Err(e) if analysis.decision.action == SignalAction::Close => {
                    warn!(symbol = %symbol, "Stop management failed, acting on close signal: {}", e)
                }
                Err(e) => return Err(e),
            }
        }

        match (analysis.decision.action, side) {
            (SignalAction::OpenLong, PositionSide::None) => {
                self.open_position(symbol, cfg, analysis, PositionSide::Long, notional)
                    .await
            }
            (SignalAction::OpenShort, PositionSide::None) => {
                self.open_position(symbol, cfg, analysis, PositionSide::Short, notional)
                    .await
            }
            (SignalAction::Close, PositionSide::Long | PositionSide::Short) => {
                let reason = analysis.decision.reason.clone();
                self.close_position(symbol, cfg, analysis, &reason, cfg.allow_reverse, notional)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Trail, exit on SL/TP and keep protective orders current
    ///
    /// Returns `true` when the position was closed.
    async fn manage_open_position(
        &mut self,
        symbol: &Symbol,
        cfg: &SymbolConfig,
        analysis: &Analysis,
        notional: f64,
    ) -> Result<bool, EngineError> {
        let Some(price) = analysis.last_price() else {
            return Ok(false);
        };
        let atr_value = analysis.atr().unwrap_or(0.0);
        let params = cfg.stop_params();

        if self.states.entry(symbol).sltp.is_none() {
            let position = self.states.entry(symbol).position.clone();
            let ctx = StopContext {
                entry_price: position.entry_price,
                side: position.side,
                atr: atr_value,
                range_ratio: analysis.range_ratio(),
                liquidation_price: position.liquidation_price,
            };
            if !self.start_tracking(symbol, &ctx, cfg)? {
                return Ok(false);
            }
        }

        let state = self.states.entry(symbol);
        let liquidation = state.position.liquidation_price;
        let (Some(sltp), Some(extremum)) = (state.sltp.as_mut(), state.extremum.as_mut()) else {
            return Ok(false);
        };

        match self
            .risk
            .update_trailing_stop(sltp, extremum, price, atr_value, &params, liquidation)?
        {
            StopUpdate::Tightened { previous, current } => {
                info!(symbol = %symbol, "Trailing stop {:.6} -> {:.6}", previous, current)
            }
            StopUpdate::Degraded(reason) => {
                debug!(symbol = %symbol, "Trailing update skipped: {}", reason)
            }
            StopUpdate::Unchanged => {}
        }

        let sltp = *sltp;
        if let Some(reason) = sltp.exit_trigger(price) {
            info!(
                symbol = %symbol,
                "{} hit at {:.6} (sl {:.6}, tp {:.6})",
                reason, price, sltp.stop_loss, sltp.take_profit
            );
            self.close_position(
                symbol,
                cfg,
                analysis,
                &reason.to_string(),
                cfg.reverse_on_stop,
                notional,
            )
            .await?;
            return Ok(true);
        }

        let state = self.states.entry(symbol);
        let needs_replace = match state.placed_stop {
            Some(placed) if state.protective_placed => {
                let spec = self.venue.instrument(symbol).await?;
                let target = protective_levels(&sltp, price, spec.tick_size).stop_loss;
                self.risk.should_replace(placed, target, atr_value)
            }
            _ => false,
        };

        if needs_replace {
            let cancelled = self.venue.cancel_conditional_orders(symbol).await?;
            debug!(symbol = %symbol, "Replacing protection, cancelled {} orders", cancelled);
            self.states.entry(symbol).invalidate_protection();
        }

        if !self.states.entry(symbol).protective_placed {
            self.place_protection(symbol, price).await?;
        }
        Ok(false)
    }

    async fn open_position(
        &mut self,
        symbol: &Symbol,
        cfg: &SymbolConfig,
        analysis: &Analysis,
        side: PositionSide,
        notional: f64,
    ) -> Result<(), EngineError> {
        let Some(order_side) = side.entry_order_side() else {
            return Ok(());
        };

        let cancelled = self.venue.cancel_all_orders(symbol).await?;
        if cancelled > 0 {
            info!(symbol = %symbol, "Cancelled {} open orders before entry", cancelled);
        }

        let price = self.venue.fetch_last_price(symbol).await?;
        let spec = self.venue.instrument(symbol).await?;
        let size = contracts_for_notional(notional, price, &spec);
        if size <= 0.0 {
            warn!(symbol = %symbol, "Order size is zero (notional {:.2} @ {:.6}), skipping entry", notional, price);
            return Ok(());
        }

        info!(
            symbol = %symbol,
            "Opening {} {:.4} contracts @ ~{:.6} (notional {:.2})",
            side, size, price, notional
        );
        let order_id = self
            .venue
            .submit_market_order(&MarketOrder {
                symbol: symbol.clone(),
                side: order_side,
                position_side: side,
                size,
                reduce_only: false,
            })
            .await?;
        debug!(symbol = %symbol, "Entry order {} accepted", order_id);

        self.settle().await;
        let position = self.refresh_position(symbol, Some(price)).await?;
        if !position.is_open() || position.side != side {
            warn!(symbol = %symbol, "Entry order accepted but no {} position visible yet", side);
            return Ok(());
        }

        let ctx = StopContext {
            entry_price: position.entry_price,
            side,
            atr: analysis.atr().unwrap_or(0.0),
            range_ratio: analysis.range_ratio(),
            liquidation_price: position.liquidation_price,
        };
        match self.start_tracking(symbol, &ctx, cfg) {
            Ok(true) => self.place_protection(symbol, price).await?,
            Ok(false) => {}
            Err(e) => {
                error!(symbol = %symbol, "New {} position cannot be protected, closing it: {}", side, e);
                if let Err(exit_err) = self
                    .exit_position(symbol, analysis, "stops could not be initialized")
                    .await
                {
                    error!(symbol = %symbol, "Failed to close unprotected position: {}", exit_err);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn close_position(
        &mut self,
        symbol: &Symbol,
        cfg: &SymbolConfig,
        analysis: &Analysis,
        reason: &str,
        reverse: bool,
        notional: f64,
    ) -> Result<(), EngineError> {
        match self.exit_position(symbol, analysis, reason).await? {
            Exit::Closed {
                side,
                orders_cleared: true,
            } if reverse => {
                let flipped = side.opposite();
                info!(symbol = %symbol, "Reversing into {}", flipped);
                self.open_position(symbol, cfg, analysis, flipped, notional)
                    .await
            }
            Exit::Closed {
                orders_cleared: false,
                ..
            } if reverse => {
                warn!(symbol = %symbol, "Not reversing while old conditional orders may be live");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Flatten the position with a reduce-only market order
    ///
    /// The trade is booked only once the venue reports the position gone.
    async fn exit_position(
        &mut self,
        symbol: &Symbol,
        analysis: &Analysis,
        reason: &str,
    ) -> Result<Exit, EngineError> {
        let position = self.refresh_position(symbol, analysis.last_price()).await?;
        let Some(exit_side) = position.side.exit_order_side().filter(|_| position.is_open()) else {
            info!(symbol = %symbol, "Nothing to close, position already flat");
            return Ok(Exit::AlreadyFlat);
        };
        let spec = self.venue.instrument(symbol).await?;

        info!(
            symbol = %symbol,
            "Closing {} {:.4} contracts: {}",
            position.side, position.size, reason
        );
        self.venue
            .submit_market_order(&MarketOrder {
                symbol: symbol.clone(),
                side: exit_side,
                position_side: position.side,
                size: position.size,
                reduce_only: true,
            })
            .await?;

        self.settle().await;
        let after = self.venue.fetch_position(symbol, true).await?;
        if after.is_open() && after.side == position.side {
            warn!(symbol = %symbol, "Close order accepted but position still open");
            self.states.entry(symbol).apply_position(after);
            return Ok(Exit::Pending);
        }
        self.states.entry(symbol).apply_position(after);

        let pnl = match analysis.last_price() {
            Some(exit) => realized_pnl(&position, exit, spec.contract_value),
            None => position.unrealized_pnl,
        };
        self.record_trade(symbol, position.side, pnl)?;
        let orders_cleared = self.cancel_leftover_conditionals(symbol).await;

        Ok(Exit::Closed {
            side: position.side,
            orders_cleared,
        })
    }

    // =========================================================================
    // Protection
    // =========================================================================

    /// Compute initial stops and start tracking them
    ///
    /// Returns `false` when the inputs were unusable and the symbol stays
    /// without local stops for this cycle.
    fn start_tracking(
        &mut self,
        symbol: &Symbol,
        ctx: &StopContext,
        cfg: &SymbolConfig,
    ) -> Result<bool, EngineError> {
        match self.risk.initialize_with(ctx, &cfg.stop_params())? {
            StopInit::Ready(sltp) => {
                info!(
                    symbol = %symbol,
                    "{} stops: entry {:.6}, sl {:.6}, tp {:.6}",
                    sltp.side, sltp.entry_price, sltp.stop_loss, sltp.take_profit
                );
                self.states.entry(symbol).begin_position(sltp);
                Ok(true)
            }
            StopInit::Degraded(reason) => {
                warn!(symbol = %symbol, "Stops not initialized: {}", reason);
                Ok(false)
            }
        }
    }

    /// Submit reduce-only SL and TP orders for the tracked stops
    async fn place_protection(&mut self, symbol: &Symbol, last_price: f64) -> Result<(), EngineError> {
        let state = self.states.entry(symbol);
        let Some(sltp) = state.sltp else {
            return Ok(());
        };
        let size = state.position.size;
        let Some(exit_side) = sltp.side.exit_order_side() else {
            return Ok(());
        };
        if size <= 0.0 {
            return Ok(());
        }

        let spec = self.venue.instrument(symbol).await?;
        let levels = protective_levels(&sltp, last_price, spec.tick_size);

        let order = |kind: ConditionalKind, trigger_price: f64| ConditionalOrder {
            symbol: symbol.clone(),
            side: exit_side,
            position_side: sltp.side,
            size,
            trigger_price,
            kind,
            reduce_only: true,
        };

        let placed: Result<String, VenueError> = async {
            self.venue
                .submit_conditional_order(&order(ConditionalKind::StopLoss, levels.stop_loss))
                .await?;
            self.venue
                .submit_conditional_order(&order(ConditionalKind::TakeProfit, levels.take_profit))
                .await
        }
        .await;

        if let Err(e) = placed {
            // A lone SL or TP is worse than none; retry both next cycle
            if let Err(cancel_err) = self.venue.cancel_conditional_orders(symbol).await {
                warn!(symbol = %symbol, "Failed to clean up partial protection: {}", cancel_err);
            }
            return Err(e.into());
        }

        info!(
            symbol = %symbol,
            "Protection placed: SL {:.6}, TP {:.6}",
            levels.stop_loss, levels.take_profit
        );
        self.states.entry(symbol).mark_protected(levels.stop_loss);
        Ok(())
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn record_trade(&mut self, symbol: &Symbol, side: PositionSide, pnl: f64) -> Result<(), EngineError> {
        self.stats_store
            .record_close(&mut self.stats, symbol, side, pnl)
            .map_err(|e| EngineError::Stats(e.to_string()))?;
        Ok(())
    }

    /// Returns `false` when the venue could not confirm the cancel
    async fn cancel_leftover_conditionals(&self, symbol: &Symbol) -> bool {
        match self.venue.cancel_conditional_orders(symbol).await {
            Ok(cancelled) => {
                if cancelled > 0 {
                    debug!(symbol = %symbol, "Cancelled {} leftover conditional orders", cancelled);
                }
                true
            }
            Err(e) => {
                warn!(symbol = %symbol, "Failed to cancel leftover conditional orders: {}", e);
                false
            }
        }
    }

    async fn settle(&self) {
        let delay = self.config.engine.settle_delay_ms;
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn sync_status_if_due(&mut self) {
        let every = Duration::from_secs(self.config.engine.status_sync_secs);
        if self.last_status_sync.is_some_and(|t| t.elapsed() < every) {
            return;
        }
        self.last_status_sync = Some(Instant::now());

        for (symbol, _) in self.symbols.clone() {
            match self.venue.fetch_position(&symbol, true).await {
                Ok(position) => {
                    let state = self.states.entry(&symbol);
                    // A vanished position is booked by the next analysis pass
                    if position.is_open() || state.sltp.is_none() {
                        state.apply_position(position);
                    }
                }
                Err(e) => debug!(symbol = %symbol, "Status sync failed: {}", e),
            }
        }
    }

    fn log_status(&self, balance: f64) {
        let mut floating = 0.0;
        for position in self.states.open_positions() {
            floating += position.unrealized_pnl;
            info!(
                "  {} {} size {:.4} @ {:.6} upl {:+.4}",
                position.symbol, position.side, position.size, position.entry_price, position.unrealized_pnl
            );
        }
        info!(
            "Balance {:.2} USDT | floating {:+.4} | {}",
            balance,
            floating,
            self.stats.summary()
        );
    }

    fn report_error(&self, symbol: &Symbol, err: &EngineError) {
        match err.kind() {
            ErrorKind::Transient => warn!(symbol = %symbol, "Transient error, retrying next cycle: {}", err),
            ErrorKind::DataUnavailable => info!(symbol = %symbol, "Data unavailable, holding: {}", err),
            ErrorKind::OrderRejected => {
                warn!(symbol = %symbol, "Order rejected, position is re-queried next cycle: {}", err)
            }
            ErrorKind::Invariant => error!(symbol = %symbol, "Invariant violated, symbol skipped this cycle: {}", err),
        }
    }
}
