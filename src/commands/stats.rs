//! Stats Command
//!
//! Prints the persisted trade statistics and the most recent closes.

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use perp_trader::stats::create_stats_store;

pub fn run(state_dir: String, recent: usize) -> Result<()> {
    let store = create_stats_store(&state_dir)
        .with_context(|| format!("Failed to open stats store in {}", state_dir))?;
    let stats = store.load()?;

    println!("\n{}", "=".repeat(70));
    println!("TRADE STATISTICS ({})", state_dir);
    println!("{}", "=".repeat(70));
    println!("Total trades:     {}", stats.total_trades);
    println!("Wins / losses:    {} / {}", stats.win_trades, stats.loss_trades);
    println!("Win rate:         {:.1}%", stats.win_rate());
    println!("Total PnL:        {} USDT", stats.total_pnl);
    println!("Gross wins:       {} USDT", stats.total_win_pnl);
    println!("Gross losses:     {} USDT", stats.total_loss_pnl);

    let trades = store.recent_trades(recent)?;
    if trades.is_empty() {
        println!("\nNo closed trades yet.");
        return Ok(());
    }

    println!("\n{:<20} {:<18} {:<6} {:>12}", "Time", "Symbol", "Side", "PnL");
    println!("{}", "-".repeat(70));
    for trade in &trades {
        let marker = if trade.pnl > Decimal::ZERO { "+" } else { " " };
        println!(
            "{:<20} {:<18} {:<6} {:>11}{}",
            trade.timestamp,
            trade.symbol,
            trade.side.to_string(),
            trade.pnl,
            marker
        );
    }
    Ok(())
}
