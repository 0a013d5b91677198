//! Live Trading Command
//!
//! Runs the agent against a paper account fed by OKX public market data,
//! or against a real OKX account (demo or production).

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use perp_trader::common::ThrottleConfig;
use perp_trader::okx::{OkxClient, OkxConfig};
use perp_trader::stats::create_stats_store;
use perp_trader::{Config, Engine, PaperVenue, VenueClient};

pub fn run(
    config_path: String,
    paper: bool,
    live: bool,
    interval: Option<u64>,
    state_dir: Option<String>,
) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }

    if live && paper {
        anyhow::bail!("Cannot specify both --paper and --live modes");
    }

    dotenv::dotenv().ok();

    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    if let Some(secs) = interval {
        config.engine.cycle_interval_secs = secs.max(1);
    }
    if let Some(dir) = state_dir {
        config.stats.dir = dir;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config, paper))
}

fn okx_config(config: &Config) -> OkxConfig {
    OkxConfig::default()
        .with_base_url(config.exchange.base_url.clone())
        .with_simulated(config.exchange.simulated)
        .with_max_retries(config.exchange.max_retries)
        .with_throttle(
            ThrottleConfig::default()
                .with_min_interval(Duration::from_millis(config.exchange.min_interval_ms)),
        )
}

async fn run_async(config: Config, paper_mode: bool) -> Result<()> {
    let mode_str = if paper_mode {
        "PAPER"
    } else if config.exchange.simulated {
        "OKX DEMO"
    } else {
        "LIVE"
    };

    info!("════════════════════════════════════════════════════════════");
    info!("  PERPETUAL TREND AGENT - {} MODE", mode_str);
    info!("  Symbols: {}", config.symbols.keys().cloned().collect::<Vec<_>>().join(", "));
    info!("  Cycle interval: {}s", config.engine.cycle_interval_secs);
    info!("  Stats dir: {}", config.stats.dir);
    info!("════════════════════════════════════════════════════════════");

    let store = create_stats_store(&config.stats.dir).context("Failed to open stats store")?;

    if paper_mode {
        let market_data = OkxClient::public(okx_config(&config))
            .context("Failed to build OKX market data client")?;
        let venue = PaperVenue::new(config.engine.paper_balance)
            .with_market_data(Arc::new(market_data));
        return drive(Arc::new(venue), config, store).await;
    }

    let credentials = config.credentials().ok_or_else(|| {
        anyhow!("OKX credentials missing: set OKX_API_KEY, OKX_SECRET_KEY and OKX_PASSPHRASE")
    })?;

    if !config.exchange.simulated {
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 10 seconds to abort...");
        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    let client = OkxClient::new(okx_config(&config), credentials)
        .context("Failed to build OKX client")?;
    drive(Arc::new(client), config, store).await
}

async fn drive<V: VenueClient>(
    venue: Arc<V>,
    config: Config,
    store: perp_trader::stats::StatsStore,
) -> Result<()> {
    let mut engine = Engine::new(venue, config, store)?;
    engine.run().await;
    info!("Trading session ended. {}", engine.stats().summary());
    Ok(())
}
