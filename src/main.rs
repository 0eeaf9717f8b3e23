//! cl-sentinel - concentrated liquidity position tracker
//!
//! Run with: cargo run -- <command>
//!
//! Tracks Uniswap V3 style LP positions on the Ramses family forks and
//! Aerodrome for any number of trackers, reports live amounts and gauge
//! rewards, and alerts when a position leaves or re-enters its range.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Report, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chain;
mod config;
mod engine;
mod error;
mod exchanges;
mod ledger;
mod pricing;
mod range;

use chain::{checksummed, SystemClock, TokenMetadataCache};
use config::Config;
use engine::{is_dust, PositionReport, Sentinel, SweepReport};
use error::Error;
use exchanges::{ExchangeRegistry, PoolDerivation};
use ledger::{MemoryStore, PositionStore, SqliteStore, TrackedPosition};
use pricing::PriceClient;

#[derive(Parser)]
#[command(name = "cl-sentinel")]
#[command(about = "Concentrated liquidity position tracker", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a position
    Track {
        /// Position NFT id
        position_id: u64,

        /// Exchange name (nile, pharaoh, nuri, ra, cleo, ramses, aerodrome)
        exchange: String,

        #[arg(short, long)]
        tracker: String,

        /// Display name shown in alerts
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Stop tracking a position
    Untrack {
        position_id: u64,
        exchange: String,
        #[arg(short, long)]
        tracker: String,
    },
    /// Stop tracking every position of a tracker
    UntrackAll {
        #[arg(short, long)]
        tracker: String,
    },
    /// Show live state of a tracker's positions
    List {
        #[arg(short, long)]
        tracker: String,
    },
    /// Sweep all tracked positions on an interval and print range alerts
    Watch,
    /// Print the supported exchanges
    Exchanges,
}

/// Render an engine failure the way a tracker should read it
fn describe_error(err: &Error) -> String {
    match err {
        Error::Burned { position_id, exchange } => {
            format!("Position {} on {} no longer exists (burned)", position_id, exchange)
        }
        Error::DuplicateTracking { position_id, exchange, .. } => {
            format!("Position {} on {} is already tracked", position_id, exchange)
        }
        Error::NotTracked { position_id, exchange, .. } => {
            format!("Position {} on {} is not tracked", position_id, exchange)
        }
        Error::Validation(msg) => msg.clone(),
        Error::Transient(msg) => format!("Request failed, try again later ({})", msg),
    }
}

/// Engine failures surface through `main`'s error report
fn user_error(err: Error) -> Report {
    eyre!("{}", describe_error(&err))
}

fn range_label(in_range: bool) -> console::StyledObject<&'static str> {
    if in_range {
        style("IN RANGE").green().bold()
    } else {
        style("OUT OF RANGE").red().bold()
    }
}

fn print_row(row: &TrackedPosition) {
    println!(
        "{} #{} on {} | {} | ticks [{}, {}) | {}",
        style("•").cyan(),
        row.position_id,
        style(row.exchange).cyan(),
        style(row.pair()).bold(),
        row.tick_lower,
        row.tick_upper,
        range_label(row.in_range)
    );
}

fn print_report(report: &PositionReport) {
    let row = &report.row;
    println!();
    println!(
        "{} #{} on {} ({})",
        style(row.pair()).cyan().bold(),
        row.position_id,
        row.exchange,
        row.display_name
    );

    match &report.status {
        Ok(status) => {
            println!(
                "   Status:  {} (tick {} in [{}, {}))",
                range_label(status.in_range),
                status.current_tick,
                row.tick_lower,
                row.tick_upper
            );
            println!("   Pool:    {}", checksummed(&status.pool));
            println!(
                "   Amounts: {} {} + {} {}",
                status.amounts.display0(),
                row.token0_symbol,
                status.amounts.display1(),
                row.token1_symbol
            );
            if let Some(value) = status.value_usd {
                println!("   Value:   ${:.2}", value);
            }
            match &status.rewards {
                Some(rewards) if !is_dust(rewards) => {
                    let value = rewards.value_usd.map(|v| format!(" (${:.2})", v)).unwrap_or_default();
                    println!("   Rewards: {} {}{}", rewards.display, rewards.symbol, value);
                }
                Some(_) => println!("   Rewards: none pending"),
                None => {}
            }
        }
        Err(e) => println!("   {} {}", style("✗").red(), describe_error(e)),
    }
}

fn print_sweep(report: &SweepReport) {
    for alert in &report.alerts {
        let verb = if alert.in_range { "is back in range" } else { "left its range" };
        println!(
            "{} [{}] {} #{} on {} {} (tick {} vs [{}, {}))",
            style("⚠").yellow(),
            alert.tracker_id,
            alert.pair,
            alert.position_id,
            alert.exchange,
            style(verb).bold(),
            alert.current_tick,
            alert.tick_lower,
            alert.tick_upper
        );
    }
    for (position_id, exchange) in &report.burned {
        println!("{} #{} on {} was burned", style("✗").red(), position_id, exchange);
    }
}

fn print_exchanges(registry: &ExchangeRegistry) {
    println!(
        "{:<10} | {:>7} | {:<13} | {:<6} | {}",
        "Exchange", "Chain", "Pools", "Gauges", "RPC"
    );
    println!("{}", "-".repeat(72));
    for descriptor in registry.iter() {
        let derivation = match descriptor.derivation {
            PoolDerivation::SaltedHash { .. } => "fee tier",
            PoolDerivation::CloneProxy => "tick spacing",
        };
        println!(
            "{:<10} | {:>7} | {:<13} | {:<6} | {}",
            descriptor.exchange,
            descriptor.chain_id,
            derivation,
            if descriptor.has_gauges() { "yes" } else { "no" },
            descriptor.rpc_url
        );
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn PositionStore>> {
    if config.uses_memory_store() {
        warn!("Using the in-memory ledger; tracked positions are lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::open(&config.database_path).await?))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cl_sentinel=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    let registry = config.registry()?;

    if let Commands::Exchanges = cli.command {
        print_exchanges(&registry);
        return Ok(());
    }

    let store = open_store(&config).await?;
    let prices = PriceClient::new(config.http_timeout())?;
    let metadata = Arc::new(TokenMetadataCache::with_policy(config.cache_policy(), Arc::new(SystemClock)));
    let sentinel = Sentinel::connect(registry, metadata, store, Some(prices));

    match cli.command {
        Commands::Track {
            position_id,
            exchange,
            tracker,
            name,
        } => {
            let display_name = name.unwrap_or_else(|| tracker.clone());
            let row = sentinel
                .track(&tracker, &display_name, position_id, &exchange)
                .await
                .map_err(user_error)?;
            println!("{} Now tracking", style("✓").green());
            print_row(&row);
        }

        Commands::Untrack {
            position_id,
            exchange,
            tracker,
        } => {
            let row = sentinel
                .untrack(&tracker, position_id, &exchange)
                .await
                .map_err(user_error)?;
            println!(
                "{} Stopped tracking {} #{} on {}",
                style("✓").green(),
                row.pair(),
                row.position_id,
                row.exchange
            );
        }

        Commands::UntrackAll { tracker } => {
            let removed = sentinel.untrack_all(&tracker).await.map_err(user_error)?;
            println!("{} Stopped tracking {} positions", style("✓").green(), removed);
        }

        Commands::List { tracker } => {
            let reports = sentinel.list_positions(&tracker).await.map_err(user_error)?;
            if reports.is_empty() {
                println!("{}", style(format!("{} is not tracking any positions", tracker)).yellow());
            } else {
                println!(
                    "{}",
                    style(format!("{} tracked positions for {}", reports.len(), tracker)).bold()
                );
                for report in &reports {
                    print_report(report);
                }
            }
        }

        Commands::Watch => {
            config.print_summary();
            info!("Sweeping tracked positions every {}s", config.poll_interval_secs);

            let mut ticker = tokio::time::interval(config.poll_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sentinel.sweep().await {
                            Ok(report) => print_sweep(&report),
                            Err(e) => warn!("Sweep failed: {}", e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Stopping watch");
                        break;
                    }
                }
            }
        }

        Commands::Exchanges => print_exchanges(sentinel.registry()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::Exchange;

    #[test]
    fn test_user_error_reads_like_the_cli_message() {
        let report = user_error(Error::Burned {
            position_id: 71255,
            exchange: Exchange::Nile,
        });
        assert_eq!(report.to_string(), "Position 71255 on nile no longer exists (burned)");

        let report = user_error(Error::validation("tracker id is required"));
        assert_eq!(report.to_string(), "tracker id is required");
    }
}
