//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. The symbol table is loaded once
//! and shared by every component.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::indicators::IndicatorParams;
use crate::okx::Credentials;
use crate::risk::{RiskConfig, StopParams};
use crate::signal::SignalDetector;
use crate::sizing::SizingConfig;
use crate::types::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Per-instrument table keyed by instrument id
    pub symbols: BTreeMap<String, SymbolConfig>,
    #[serde(default)]
    pub stats: StatsConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay credentials and throttle settings from the environment
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("OKX_API_KEY") {
            self.exchange.api_key = Some(api_key);
        }
        if let Ok(secret) = std::env::var("OKX_SECRET_KEY") {
            self.exchange.api_secret = Some(secret);
        }
        if let Ok(passphrase) = std::env::var("OKX_PASSPHRASE") {
            self.exchange.passphrase = Some(passphrase);
        }
        if let Some(ms) = std::env::var("OKX_API_MIN_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.exchange.min_interval_ms = ms;
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("config must list at least one symbol");
        }
        for (name, sym) in &self.symbols {
            sym.validate()
                .with_context(|| format!("invalid config for symbol {name}"))?;
        }
        if self.engine.cycle_interval_secs == 0 {
            bail!("engine.cycle_interval_secs must be positive");
        }
        if !(self.risk.volatility_damping > 0.0 && self.risk.volatility_damping <= 1.0) {
            bail!("risk.volatility_damping must be in (0, 1]");
        }
        if self.risk.min_sl_distance_pct < 0.0 || self.risk.liquidation_buffer_pct < 0.0 {
            bail!("risk distances must not be negative");
        }
        if self.sizing.notional_factor <= 0.0 {
            bail!("sizing.notional_factor must be positive");
        }
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.keys().map(Symbol::new).collect()
    }

    pub fn symbol(&self, symbol: &Symbol) -> Option<&SymbolConfig> {
        self.symbols.get(symbol.as_str())
    }

    /// Credentials when all three parts are present
    pub fn credentials(&self) -> Option<Credentials> {
        match (
            &self.exchange.api_key,
            &self.exchange.api_secret,
            &self.exchange.passphrase,
        ) {
            (Some(key), Some(secret), Some(pass)) => {
                let creds = Credentials::new(key, secret, pass);
                creds.is_complete().then_some(creds)
            }
            _ => None,
        }
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    #[serde(skip_serializing)]
    pub passphrase: Option<String>,
    pub base_url: String,
    /// Trade on the OKX demo account
    pub simulated: bool,
    /// Minimum spacing between API calls
    pub min_interval_ms: u64,
    pub max_retries: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            passphrase: None,
            base_url: crate::okx::API_BASE_URL.to_string(),
            simulated: false,
            min_interval_ms: 200,
            max_retries: 2,
        }
    }
}

/// Orchestrator cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle_interval_secs: u64,
    /// Sleep after a failed cycle
    pub error_backoff_secs: u64,
    /// Force-refresh all positions this often
    pub status_sync_secs: u64,
    /// Wait after an order before re-reading the position
    pub settle_delay_ms: u64,
    /// Starting balance of the paper account
    pub paper_balance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cycle_interval_secs: 2,
            error_backoff_secs: 60,
            status_sync_secs: 60,
            settle_delay_ms: 1500,
            paper_balance: 1000.0,
        }
    }
}

/// Trade statistics persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub dir: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            dir: "state".to_string(),
        }
    }
}

/// Per-instrument constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    pub timeframe: String,
    pub leverage: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    /// Entries need ADX at or above this; 0 disables the filter
    pub adx_min_trend: f64,
    pub sl_atr_multiple: f64,
    pub tp_atr_multiple: f64,
    pub trigger_pct: f64,
    pub trail_pct: f64,
    /// Flip into the opposite side after a signal close
    pub allow_reverse: bool,
    /// Flip into the opposite side after a stop-loss / take-profit close
    pub reverse_on_stop: bool,
    /// Bars fetched per cycle
    pub bar_limit: usize,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        SymbolConfig {
            timeframe: "15m".to_string(),
            leverage: 20.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            adx_period: 14,
            adx_min_trend: 0.0,
            sl_atr_multiple: 2.0,
            tp_atr_multiple: 3.0,
            trigger_pct: 0.010,
            trail_pct: 0.006,
            allow_reverse: false,
            reverse_on_stop: false,
            bar_limit: 100,
        }
    }
}

impl SymbolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.macd_fast == 0 || self.macd_slow == 0 || self.macd_signal == 0 {
            bail!("MACD periods must be positive");
        }
        if self.macd_fast >= self.macd_slow {
            bail!(
                "macd_fast ({}) must be below macd_slow ({})",
                self.macd_fast,
                self.macd_slow
            );
        }
        if self.atr_period == 0 || self.adx_period == 0 {
            bail!("ATR and ADX periods must be positive");
        }
        if self.sl_atr_multiple <= 0.0 || self.tp_atr_multiple <= 0.0 {
            bail!("stop and target multiples must be positive");
        }
        if self.trigger_pct < 0.0 || !(0.0..1.0).contains(&self.trail_pct) {
            bail!("trigger_pct must be >= 0 and trail_pct in [0, 1)");
        }
        if self.leverage <= 0.0 {
            bail!("leverage must be positive");
        }
        let needed = self.indicator_params().min_bars();
        if self.bar_limit < needed {
            bail!(
                "bar_limit ({}) is below the {} bars the indicators need",
                self.bar_limit,
                needed
            );
        }
        Ok(())
    }

    pub fn indicator_params(&self) -> IndicatorParams {
        IndicatorParams {
            macd_fast: self.macd_fast,
            macd_slow: self.macd_slow,
            macd_signal: self.macd_signal,
            atr_period: self.atr_period,
            adx_period: self.adx_period,
        }
    }

    pub fn stop_params(&self) -> StopParams {
        StopParams {
            sl_atr_multiple: self.sl_atr_multiple,
            tp_atr_multiple: self.tp_atr_multiple,
            trigger_pct: self.trigger_pct,
            trail_pct: self.trail_pct,
        }
    }

    pub fn detector(&self) -> SignalDetector {
        SignalDetector::new(self.adx_min_trend)
    }
}
