// Trade statistics
// SQLite-based persistence with JSON backup
//
// One record per completed close. Aggregates live in a key/value table,
// every close is also appended to an audit table.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::types::{PositionSide, Symbol};

/// Most recent trades kept in the aggregate record
pub const HISTORY_LIMIT: usize = 100;

const STATS_KEY: &str = "trade_stats";

// =============================================================================
// Data Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: String,
    pub symbol: String,
    pub side: PositionSide,
    /// Realized PnL, 4 decimal places
    pub pnl: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub win_trades: u64,
    pub loss_trades: u64,
    pub total_pnl: Decimal,
    pub total_win_pnl: Decimal,
    pub total_loss_pnl: Decimal,
    pub trades_history: Vec<TradeRecord>,
}

impl TradeStats {
    /// Fold one closed trade into the aggregates
    pub fn record(&mut self, symbol: &Symbol, side: PositionSide, pnl: f64) -> TradeRecord {
        let pnl = Decimal::from_f64(pnl).unwrap_or_default().round_dp(4);

        self.total_trades += 1;
        self.total_pnl += pnl;
        if pnl > Decimal::ZERO {
            self.win_trades += 1;
            self.total_win_pnl += pnl;
        } else {
            self.loss_trades += 1;
            self.total_loss_pnl += pnl;
        }

        let record = TradeRecord {
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            symbol: symbol.to_string(),
            side,
            pnl,
        };
        self.trades_history.push(record.clone());
        if self.trades_history.len() > HISTORY_LIMIT {
            let excess = self.trades_history.len() - HISTORY_LIMIT;
            self.trades_history.drain(..excess);
        }
        record
    }

    /// Win rate in percent
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.win_trades as f64 / self.total_trades as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "trades: {} | wins: {} | losses: {} | win rate: {:.1}% | total pnl: {:.4} USDT",
            self.total_trades,
            self.win_trades,
            self.loss_trades,
            self.win_rate(),
            self.total_pnl
        )
    }
}

// =============================================================================
// Stats Store Implementation
// =============================================================================

pub struct StatsStore {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: Option<PathBuf>,
}

impl StatsStore {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: Some(json_backup_path.as_ref().to_path_buf()),
        };
        store.create_tables()?;
        info!("Stats store initialized at {}", db_path.display());

        Ok(store)
    }

    /// Store without files, for paper runs and tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: None,
        };
        store.create_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("stats store connection lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                pnl TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;

        Ok(())
    }

    /// Persisted aggregates, empty when nothing was saved yet
    pub fn load(&self) -> Result<TradeStats> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![STATS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => serde_json::from_str(&json).context("Corrupt trade stats record"),
            None => {
                debug!("No trade stats found, starting empty");
                Ok(TradeStats::default())
            }
        }
    }

    /// Record one closed trade and save durably
    ///
    /// `stats` is only updated once the save succeeded.
    pub fn record_close(
        &self,
        stats: &mut TradeStats,
        symbol: &Symbol,
        side: PositionSide,
        pnl: f64,
    ) -> Result<TradeRecord> {
        let mut updated = stats.clone();
        let record = updated.record(symbol, side, pnl);
        self.save(&updated, &record)?;
        *stats = updated;

        let result = if record.pnl > Decimal::ZERO { "WIN" } else { "LOSS" };
        info!(
            "Trade recorded: {} {} pnl {} USDT | {} | {}",
            side,
            symbol,
            record.pnl,
            result,
            stats.summary()
        );
        Ok(record)
    }

    fn save(&self, stats: &TradeStats, record: &TradeRecord) -> Result<()> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                params![STATS_KEY, serde_json::to_string(stats)?],
            )?;
            tx.execute(
                "INSERT INTO trades (timestamp, symbol, side, pnl) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.timestamp,
                    record.symbol,
                    record.side.to_string(),
                    record.pnl.to_string()
                ],
            )?;
            tx.commit()?;
        }

        self.export_json(stats)
    }

    /// Most recent trades from the audit table, newest first
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, symbol, side, pnl FROM trades ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let side: String = row.get(2)?;
            let pnl: String = row.get(3)?;
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, side, pnl))
        })?;

        let mut trades = Vec::new();
        for row in rows {
            let (timestamp, symbol, side, pnl) = row?;
            let side = match side.as_str() {
                "long" => PositionSide::Long,
                "short" => PositionSide::Short,
                _ => PositionSide::None,
            };
            trades.push(TradeRecord {
                timestamp,
                symbol,
                side,
                pnl: Decimal::from_str(&pnl).with_context(|| format!("Bad pnl value {pnl}"))?,
            });
        }
        Ok(trades)
    }

    pub fn export_json(&self, stats: &TradeStats) -> Result<()> {
        let Some(path) = &self.json_backup_path else {
            return Ok(());
        };

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "stats": stats,
        });
        std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
        debug!("Stats exported to: {}", path.display());
        Ok(())
    }
}

// =============================================================================
// Factory Function
// =============================================================================

pub fn create_stats_store<P: AsRef<Path>>(state_dir: P) -> Result<StatsStore> {
    let state_dir = state_dir.as_ref();
    std::fs::create_dir_all(state_dir)?;

    StatsStore::new(
        state_dir.join("trade_stats.db"),
        state_dir.join("trade_stats.json"),
    )
}
