//! Trend-Following Spot Trading Bot
//!
//! Scores MA/RSI/MACD trend signals on Bybit spot pairs, enters long with a
//! protective stop and take-profit, and sizes every trade by fixed fractional
//! risk under an aggregate risk ceiling.

mod api;
mod bot;
mod db;
mod error;
mod indicators;
mod models;
mod trading;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{BybitClient, DryRunExchange, Exchange};
use crate::bot::{Bot, SystemClock};
use crate::db::Database;
use crate::trading::{normalize_pair, parse_pairs, PerformanceTracker, TradingConfig};

/// Trend-following trading bot CLI.
#[derive(Parser)]
#[command(name = "trendbot")]
#[command(about = "Trend-following spot trading with MA/RSI/MACD signals", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./trendbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also append logs to this file
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// JSON configuration file; missing keys use defaults. Environment
    /// variables (RISK_PER_TRADE, TRADING_PAIRS, CHECK_INTERVAL, ...) override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bybit API key
    #[arg(long, env = "BYBIT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Bybit API secret
    #[arg(long, env = "BYBIT_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Use the Bybit testnet
    #[arg(long, env = "BYBIT_TESTNET")]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Route orders to a simulator instead of the exchange
        #[arg(long)]
        dry_run: bool,

        /// Seconds between evaluation cycles
        #[arg(short, long)]
        interval: Option<u64>,

        /// Comma-separated trading pairs (BTCUSDT or BTC/USDT)
        #[arg(short, long)]
        pairs: Option<String>,
    },

    /// Analyze one symbol without trading
    Analyze {
        /// Trading pair, e.g. BTCUSDT
        symbol: String,
    },

    /// Show the effective configuration
    Config,

    /// Show open positions and performance statistics
    Status,

    /// Show recent closed trades
    History {
        /// Number of trades to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    // defaults < config file < environment < command line
    let mut config = match &cli.config {
        Some(path) => TradingConfig::from_file(path)?,
        None => TradingConfig::default(),
    };
    config.apply_env()?;

    match cli.command {
        Commands::Run {
            dry_run,
            interval,
            pairs,
        } => {
            if let Some(secs) = interval {
                config.check_interval_secs = secs;
            }
            if let Some(pairs) = pairs {
                config.trading_pairs = parse_pairs(&pairs);
            }
            config.validate()?;

            let client = build_client(&cli.api_key, &cli.api_secret, cli.testnet, &config)?;
            if !client.has_credentials() {
                if dry_run {
                    warn!("No API credentials: balance reads will fail and no entries will be sized");
                } else {
                    bail!("BYBIT_API_KEY and BYBIT_API_SECRET are required for live trading");
                }
            }

            let db = Database::new(&cli.database).await?;

            if dry_run {
                run_bot(config, DryRunExchange::new(client), db, true).await?;
            } else {
                run_bot(config, client, db, false).await?;
            }
        }

        Commands::Analyze { symbol } => {
            config.validate()?;
            let client = build_client(&cli.api_key, &cli.api_secret, cli.testnet, &config)?;
            let bot = Bot::new(config, client, SystemClock);

            let analysis = bot.analyze(&normalize_pair(&symbol)).await?;
            println!("{}", analysis);
            println!(
                "RSI zone:     {:?}",
                bot.analyzer().scorer().rsi_zone(analysis.rsi())
            );
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            match config.validate() {
                Ok(()) => println!("\nConfiguration is valid."),
                Err(e) => println!("\nConfiguration is INVALID: {}", e),
            }
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;
            let positions = db.load_positions().await?;
            let tracker = PerformanceTracker::from_history(db.load_trades().await?);

            println!("\n--- Open Positions ({}) ---", positions.len());
            if !positions.is_empty() {
                println!(
                    "{:<12} {:>14} {:>14} {:>14} {:>14} {:>20}",
                    "SYMBOL", "ENTRY", "STOP", "TARGET", "SIZE", "OPENED"
                );
                for p in &positions {
                    println!(
                        "{:<12} {:>14} {:>14} {:>14} {:>14} {:>20}",
                        p.symbol,
                        p.entry_price,
                        p.stop_loss_price,
                        p.take_profit_price,
                        p.size,
                        p.opened_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }

            println!("\n{}", tracker.statistics());
        }

        Commands::History { limit } => {
            let db = Database::new(&cli.database).await?;
            let trades = db.recent_trades(limit).await?;

            if trades.is_empty() {
                println!("No closed trades yet.");
                return Ok(());
            }

            println!(
                "\n{:<17} {:<12} {:>14} {:>14} {:>12} {:>12} {:>8} {:<12}",
                "CLOSED", "SYMBOL", "ENTRY", "EXIT", "SIZE", "P&L", "RETURN", "REASON"
            );
            println!("{}", "-".repeat(108));
            for t in &trades {
                println!(
                    "{:<17} {:<12} {:>14} {:>14} {:>12} {:>12.2} {:>7.2}% {:<12}",
                    t.timestamp.format("%Y-%m-%d %H:%M"),
                    t.symbol,
                    t.entry_price,
                    t.exit_price,
                    t.size.round_dp(6),
                    t.pnl,
                    t.return_pct(),
                    t.exit_reason.as_str()
                );
            }
        }
    }

    Ok(())
}

/// Console logging, plus an appending log file when one is configured.
/// RUST_LOG takes precedence over --log-level.
fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Arc::new(file)))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

fn build_client(
    api_key: &Option<String>,
    api_secret: &Option<String>,
    testnet: bool,
    config: &TradingConfig,
) -> Result<BybitClient> {
    let client = BybitClient::new(
        testnet,
        Duration::from_secs(config.request_timeout_secs),
        config.max_retries,
    )?;

    Ok(match (api_key, api_secret) {
        (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
            client.with_credentials(key.clone(), secret.clone())
        }
        _ => client,
    })
}

async fn run_bot<E: Exchange>(
    config: TradingConfig,
    exchange: E,
    db: Database,
    dry_run: bool,
) -> Result<()> {
    // Register shutdown handler; the current symbol finishes before the loop exits
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut bot = Bot::new(config, exchange, SystemClock)
        .dry_run(dry_run)
        .with_shutdown_signal(shutdown.clone())
        .with_database(db)
        .await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    bot.run().await
}
