//! Perpetual trend agent - main entry point
//!
//! This binary provides two subcommands:
//! - live: Run the agent (paper or real)
//! - stats: Print persisted trade statistics

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "perp-trader")]
#[command(about = "Trend-following perpetual futures agent with adaptive protective orders", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading agent
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/okx_perp_15m.json")]
        config: String,

        /// Paper trading mode (simulated account, real market data)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY unless exchange.simulated is set)
        #[arg(long)]
        live: bool,

        /// Cycle interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// Directory for the trade statistics store (overrides config)
        #[arg(long)]
        state_dir: Option<String>,
    },

    /// Show persisted trade statistics
    Stats {
        /// Directory holding the trade statistics store
        #[arg(long, default_value = "state")]
        state_dir: String,

        /// Number of recent trades to list
        #[arg(short, long, default_value = "20")]
        recent: usize,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Live {
            config,
            paper,
            live,
            interval,
            state_dir,
        } => {
            setup_logging(cli.verbose, "live")?;
            commands::live::run(config, paper, live, interval, state_dir)
        }

        // Plain stdout report, no log file
        Commands::Stats { state_dir, recent } => commands::stats::run(state_dir, recent),
    }
}
