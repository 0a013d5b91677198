//! Per-symbol position and protective-order state
//!
//! Owned by the engine and partitioned by symbol; nothing here is shared
//! between symbols, so a failure in one symbol's cycle cannot corrupt
//! another's state.

use std::collections::HashMap;

use crate::risk::{SlTpState, TrailingExtremum};
use crate::types::{Position, PositionSide, Symbol};

/// Everything the engine remembers about one symbol
#[derive(Debug, Clone)]
pub struct SymbolState {
    /// Last position reported by the venue
    pub position: Position,
    /// Protective levels of the open position
    pub sltp: Option<SlTpState>,
    /// Peak (long) or trough (short) since entry
    pub extremum: Option<TrailingExtremum>,
    /// Whether SL/TP orders for this position lifetime are on the venue
    pub protective_placed: bool,
    /// Stop price of the venue-held stop order
    pub placed_stop: Option<f64>,
}

impl SymbolState {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            position: Position::flat(symbol),
            sltp: None,
            extremum: None,
            protective_placed: false,
            placed_stop: None,
        }
    }

    /// Store a freshly fetched position
    ///
    /// A flat position (or one that flipped sides) drops the protective
    /// state in the same step.
    pub fn apply_position(&mut self, position: Position) {
        let side_changed = self.sltp.is_some_and(|s| s.side != position.side);
        if !position.is_open() || side_changed {
            self.clear_protection();
        }
        self.position = position;
    }

    /// Begin tracking a newly opened or rediscovered position
    pub fn begin_position(&mut self, sltp: SlTpState) {
        self.extremum = Some(TrailingExtremum::new(sltp.side, sltp.entry_price));
        self.sltp = Some(sltp);
        self.protective_placed = false;
        self.placed_stop = None;
    }

    /// Forget SL/TP, extremum and the placed flag
    pub fn clear_protection(&mut self) {
        self.sltp = None;
        self.extremum = None;
        self.protective_placed = false;
        self.placed_stop = None;
    }

    /// Record that protective orders went out with `stop`
    pub fn mark_protected(&mut self, stop: f64) {
        self.protective_placed = true;
        self.placed_stop = Some(stop);
    }

    /// Require protective orders to be re-submitted
    pub fn invalidate_protection(&mut self) {
        self.protective_placed = false;
    }

    pub fn side(&self) -> PositionSide {
        if self.position.is_open() {
            self.position.side
        } else {
            PositionSide::None
        }
    }
}

/// Symbol-keyed state table
#[derive(Debug, Default)]
pub struct StateStore {
    symbols: HashMap<Symbol, SymbolState>,
}

impl StateStore {
    pub fn new<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| (s.clone(), SymbolState::new(s.clone())))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolState> {
        self.symbols.get(symbol)
    }

    /// State for `symbol`, created flat on first use
    pub fn entry(&mut self, symbol: &Symbol) -> &mut SymbolState {
        self.symbols
            .entry(symbol.clone())
            .or_insert_with(|| SymbolState::new(symbol.clone()))
    }

    /// Open positions in the cache
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.symbols
            .values()
            .map(|s| &s.position)
            .filter(|p| p.is_open())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
