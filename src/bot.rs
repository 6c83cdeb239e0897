//! Bot runner: the polling evaluation loop.
//!
//! Each cycle:
//! - Reconciles stop and take-profit fills reported by the exchange
//! - Fetches history and analyzes every pair (read-only, concurrently)
//! - Applies entry and exit decisions one symbol at a time
//! - Logs a monitoring report for every open position
//!
//! The position book has a single writer: this loop. A stop request is only
//! honoured between symbols so an entry is never left half recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::Exchange;
use crate::db::Database;
use crate::indicators::IndicatorEngine;
use crate::models::{ClosedTrade, Position, Signal, TrendAnalysis};
use crate::trading::{
    PerformanceStats, PerformanceTracker, PositionBook, PositionManager, RiskManager,
    SignalScorer, TradingConfig, TrendAnalyzer,
};

/// Time source and sleeper for the loop.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Outcome counters of one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub analyzed: usize,
    pub failed: usize,
    pub opened: usize,
    pub closed: usize,
    pub external_exits: usize,
    pub skipped: usize,
}

/// Main bot runner.
pub struct Bot<E: Exchange, C: Clock = SystemClock> {
    config: TradingConfig,
    exchange: E,
    clock: C,
    db: Option<Database>,
    analyzer: TrendAnalyzer,
    manager: PositionManager,

    // Runtime state
    book: PositionBook,
    tracker: PerformanceTracker,
    dry_run: bool,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl<E: Exchange, C: Clock> Bot<E, C> {
    pub fn new(config: TradingConfig, exchange: E, clock: C) -> Self {
        let analyzer = TrendAnalyzer::new(
            IndicatorEngine::new(config.indicator_settings()),
            SignalScorer::new(config.signal_rules()),
        );
        let manager = PositionManager::new(
            RiskManager::new(config.risk_limits()),
            config.exit_levels(),
            config.rsi_overbought,
            config.rsi_oversold,
            config.quote_asset.clone(),
        );

        Self {
            config,
            exchange,
            clock,
            db: None,
            analyzer,
            manager,
            book: PositionBook::new(),
            tracker: PerformanceTracker::new(),
            dry_run: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the bot as routing to a simulated exchange (reporting only).
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Share an externally owned stop flag.
    pub fn with_shutdown_signal(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Persist state to `db` and restore open positions and trade history
    /// from it.
    pub async fn with_database(mut self, db: Database) -> Result<Self> {
        let positions = db.load_positions().await?;
        let trades = db.load_trades().await?;

        info!(
            positions = positions.len(),
            trades = trades.len(),
            "Restored state from database"
        );

        self.book = PositionBook::from_positions(positions);
        self.tracker = PerformanceTracker::from_history(trades);
        self.db = Some(db);
        Ok(self)
    }

    pub fn analyzer(&self) -> &TrendAnalyzer {
        &self.analyzer
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Main run loop. Returns once a stop is requested.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            pairs = ?self.config.trading_pairs,
            timeframe = %self.config.timeframe,
            interval = self.config.check_interval_secs,
            dry_run = self.dry_run,
            open_positions = self.book.len(),
            "Starting bot run loop"
        );

        let interval = Duration::from_secs(self.config.check_interval_secs);
        let backoff = Duration::from_secs(self.config.error_backoff_secs);

        while !self.stopping() {
            let delay = match self.run_cycle().await {
                Ok(summary) => {
                    debug!(?summary, "Cycle complete");
                    interval
                }
                Err(e) => {
                    error!(error = %e, "Error in evaluation cycle");
                    backoff
                }
            };

            if self.stopping() {
                break;
            }
            self.clock.sleep(delay).await;
        }

        info!("Bot stopped");
        info!("{}", self.get_stats());
        Ok(())
    }

    /// One pass over every configured pair.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();
        if self.stopping() {
            return Ok(summary);
        }

        // Fills already on the exchange retire positions before any signal
        // can act on them.
        let now = self.clock.now();
        let exits = self
            .manager
            .reconcile_exits(&self.exchange, &mut self.book, &mut self.tracker, now)
            .await;
        summary.external_exits = exits.len();
        for trade in &exits {
            self.persist_close(trade).await;
        }

        let analyses = join_all(
            self.config
                .trading_pairs
                .iter()
                .map(|symbol| self.analyze(symbol)),
        )
        .await;

        for (symbol, result) in self.config.trading_pairs.clone().iter().zip(analyses) {
            if self.stopping() {
                info!("Stop requested, skipping remaining symbols");
                break;
            }

            match result {
                Ok(analysis) => {
                    summary.analyzed += 1;
                    self.decide(&analysis, &mut summary).await;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(symbol = %symbol, error = %e, "Skipping symbol this cycle");
                }
            }
        }

        if self.stopping() {
            return Ok(summary);
        }

        self.monitor_positions().await;

        if summary.analyzed == 0 && summary.failed > 0 {
            anyhow::bail!("no market data for any of {} pairs", summary.failed);
        }
        Ok(summary)
    }

    /// Fetch history and score one symbol. No side effects.
    pub async fn analyze(&self, symbol: &str) -> Result<TrendAnalysis> {
        let bars = self
            .exchange
            .fetch_history(symbol, &self.config.timeframe, self.config.history_limit)
            .await?;
        let analysis = self.analyzer.analyze(symbol, &bars, self.clock.now())?;
        Ok(analysis)
    }

    async fn decide(&mut self, analysis: &TrendAnalysis, summary: &mut CycleSummary) {
        let symbol = analysis.symbol.as_str();
        let now = self.clock.now();

        info!(
            symbol = %symbol,
            price = analysis.current_price,
            trend = %analysis.trend,
            rsi = analysis.rsi(),
            buy = analysis.buy_score,
            sell = analysis.sell_score,
            signal = %analysis.signal,
            "Analyzed"
        );

        match analysis.signal {
            Signal::Buy if !self.book.contains(symbol) => {
                match self
                    .manager
                    .open(&self.exchange, &mut self.book, analysis, now)
                    .await
                {
                    Ok(position) => {
                        summary.opened += 1;
                        self.persist_open(&position).await;
                    }
                    Err(e) if e.is_skip() => {
                        summary.skipped += 1;
                        warn!(symbol = %symbol, reason = %e, "Entry skipped");
                    }
                    Err(e) => error!(symbol = %symbol, error = %e, "Entry failed"),
                }
            }
            Signal::Sell if self.book.contains(symbol) => {
                match self
                    .manager
                    .close(&self.exchange, &mut self.book, analysis, &mut self.tracker, now)
                    .await
                {
                    Ok(trade) => {
                        summary.closed += 1;
                        self.persist_close(&trade).await;
                    }
                    Err(e) if e.is_precondition() => {
                        debug!(symbol = %symbol, reason = %e, "Holding position");
                    }
                    Err(e) => error!(symbol = %symbol, error = %e, "Exit failed"),
                }
            }
            _ => {}
        }
    }

    async fn monitor_positions(&self) {
        let now = self.clock.now();
        for position in self.book.positions() {
            let price = match self.exchange.fetch_ticker(&position.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "Ticker unavailable");
                    continue;
                }
            };

            if let Some(report) = self.manager.monitor(&self.book, &position.symbol, price, now) {
                info!(
                    symbol = %report.symbol,
                    entry = %report.entry_price,
                    price = %report.current_price,
                    pnl = %report.unrealized_pnl.round_dp(2),
                    pnl_pct = %report.unrealized_pnl_pct.round_dp(2),
                    held_mins = report.holding.num_minutes(),
                    "Position"
                );
            }
        }
    }

    async fn persist_open(&self, position: &Position) {
        if let Some(db) = &self.db {
            if let Err(e) = db.save_position(position).await {
                error!(symbol = %position.symbol, error = %e, "Failed to persist position");
            }
        }
    }

    async fn persist_close(&self, trade: &ClosedTrade) {
        if let Some(db) = &self.db {
            if let Err(e) = db.close_position(trade).await {
                error!(symbol = %trade.symbol, error = %e, "Failed to persist closed trade");
            }
        }
    }

    pub fn get_stats(&self) -> BotStats {
        BotStats {
            open_positions: self.book.len(),
            total_risk: self.book.total_risk(),
            cost_basis: self.book.cost_basis(),
            performance: self.tracker.statistics_at(self.clock.now()),
            is_running: !self.stopping(),
            dry_run: self.dry_run,
        }
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub open_positions: usize,
    pub total_risk: Decimal,
    pub cost_basis: Decimal,
    pub performance: PerformanceStats,
    pub is_running: bool,
    pub dry_run: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Open Positions:  {}", self.open_positions)?;
        writeln!(f, "Cost Basis:      {:.2}", self.cost_basis)?;
        writeln!(f, "Risk Committed:  {:.2}", self.total_risk)?;
        writeln!(f, "{}", self.performance)?;
        writeln!(
            f,
            "Status:          {} {}",
            if self.is_running { "Running" } else { "Stopped" },
            if self.dry_run { "(Dry Run)" } else { "" }
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{Call, MockExchange, Op};
    use crate::api::OrderStatus;
    use crate::models::fixtures::{downtrend, uptrend};
    use crate::models::{sample_position, ExitReason, OrderSide};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Clock that never waits and requests a stop after `stop_after` sleeps.
    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
        sleeps: Mutex<Vec<Duration>>,
        stop_after: usize,
        shutdown: Arc<AtomicBool>,
    }

    impl ManualClock {
        fn new(stop_after: usize, shutdown: Arc<AtomicBool>) -> Self {
            Self {
                now: Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
                sleeps: Mutex::new(Vec::new()),
                stop_after,
                shutdown,
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Clock for Arc<ManualClock> {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            let count = {
                let mut sleeps = self.sleeps.lock().unwrap();
                sleeps.push(duration);
                sleeps.len()
            };
            *self.now.lock().unwrap() += chrono::Duration::from_std(duration).unwrap();
            if count >= self.stop_after {
                self.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }

    fn config(pairs: &[&str]) -> TradingConfig {
        TradingConfig {
            trading_pairs: pairs.iter().map(|s| s.to_string()).collect(),
            history_limit: 60,
            ..Default::default()
        }
    }

    fn bot(
        pairs: &[&str],
        exchange: &Arc<MockExchange>,
        stop_after: usize,
    ) -> (Bot<Arc<MockExchange>, Arc<ManualClock>>, Arc<ManualClock>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let clock = Arc::new(ManualClock::new(stop_after, shutdown.clone()));
        let bot = Bot::new(config(pairs), exchange.clone(), clock.clone())
            .with_shutdown_signal(shutdown);
        (bot, clock)
    }

    #[tokio::test]
    async fn test_cycle_opens_on_uptrend() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_history("BTCUSDT", uptrend(60))
                .with_balance("USDT", dec!(10000))
                .with_ticker("BTCUSDT", dec!(117)),
        );
        let (mut bot, _) = bot(&["BTCUSDT"], &exchange, 1);

        let summary = bot.run_cycle().await.unwrap();

        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.opened, 1);
        let position = bot.book.get("BTCUSDT").unwrap();
        assert_eq!(position.entry_price, dec!(116.25));
        assert!(position.stop_loss_price < position.entry_price);
        assert!(position.take_profit_price > position.entry_price);

        // monitoring reads the ticker after decisions
        assert_eq!(
            exchange.calls().last(),
            Some(&Call::Ticker("BTCUSDT".into()))
        );
    }

    #[tokio::test]
    async fn test_second_buy_does_not_double_enter() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_history("BTCUSDT", uptrend(60))
                .with_balance("USDT", dec!(10000))
                .with_ticker("BTCUSDT", dec!(117)),
        );
        let (mut bot, _) = bot(&["BTCUSDT"], &exchange, 1);

        bot.run_cycle().await.unwrap();
        let second = bot.run_cycle().await.unwrap();

        assert_eq!(second.opened, 0);
        let buys = exchange
            .mutating_calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Market { side: OrderSide::Buy, .. }))
            .count();
        assert_eq!(buys, 1);
    }

    #[tokio::test]
    async fn test_cycle_closes_on_downtrend_and_persists() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.save_position(&sample_position("ETHUSDT")).await.unwrap();

        let exchange = Arc::new(
            MockExchange::new()
                .with_history("ETHUSDT", downtrend(60))
                .with_balance("USDT", dec!(10000)),
        );
        let (bot, _) = bot(&["ETHUSDT"], &exchange, 1);
        let mut bot = bot.with_database(db).await.unwrap();
        assert!(bot.book.contains("ETHUSDT"));

        let summary = bot.run_cycle().await.unwrap();

        assert_eq!(summary.closed, 1);
        assert!(bot.book.is_empty());
        assert_eq!(bot.tracker.statistics().total_trades, 1);

        let db = bot.db.as_ref().unwrap();
        assert!(db.load_positions().await.unwrap().is_empty());
        let trades = db.load_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        // (183.75 - 100) * 4
        assert_eq!(trades[0].pnl, dec!(335));
        assert_eq!(trades[0].exit_reason, ExitReason::Signal);
    }

    #[tokio::test]
    async fn test_cycle_reconciles_stop_fill() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.save_position(&sample_position("BTCUSDT")).await.unwrap();

        let exchange = Arc::new(MockExchange::new().with_history("BTCUSDT", uptrend(60)));
        exchange.set_order_status("stop-1", OrderStatus::Filled { avg_price: dec!(95) });
        let (bot, _) = bot(&["BTCUSDT"], &exchange, 1);
        let mut bot = bot.with_database(db).await.unwrap();

        let summary = bot.run_cycle().await.unwrap();

        // the fill retires the position first; the BUY re-entry then has no funds
        assert_eq!(summary.opened, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.external_exits, 1);
        assert!(bot.book.is_empty());
        let trades = bot.db.as_ref().unwrap().load_trades().await.unwrap();
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
        assert!(!exchange
            .mutating_calls()
            .iter()
            .any(|c| matches!(c, Call::Market { .. })));
    }

    #[tokio::test]
    async fn test_filled_stop_wins_over_sell_signal() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.save_position(&sample_position("ETHUSDT")).await.unwrap();

        let exchange = Arc::new(
            MockExchange::new()
                .with_history("ETHUSDT", downtrend(60))
                .with_balance("USDT", dec!(10000)),
        );
        exchange.set_order_status("stop-1", OrderStatus::Filled { avg_price: dec!(95) });
        let (bot, _) = bot(&["ETHUSDT"], &exchange, 1);
        let mut bot = bot.with_database(db).await.unwrap();

        let summary = bot.run_cycle().await.unwrap();

        assert_eq!(summary.external_exits, 1);
        assert_eq!(summary.closed, 0);
        assert!(bot.book.is_empty());

        let stats = bot.tracker.statistics();
        assert_eq!(stats.total_trades, 1);
        // (95 - 100) * 4
        assert_eq!(stats.total_pnl, dec!(-20));

        // only the take-profit leg is cancelled; nothing is sold
        assert_eq!(
            exchange.mutating_calls(),
            vec![Call::Cancel {
                order_id: "limit-1".into(),
                symbol: "ETHUSDT".into()
            }]
        );

        let trades = bot.db.as_ref().unwrap().load_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(trades[0].exit_price, dec!(95));
    }

    #[tokio::test]
    async fn test_stop_mid_cycle_finishes_current_symbol() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let exchange = Arc::new(
            MockExchange::new()
                .with_history("BTCUSDT", uptrend(60))
                .with_history("ETHUSDT", uptrend(60))
                .with_balance("USDT", dec!(10000))
                .tripping(Op::Limit, shutdown.clone()),
        );
        let clock = Arc::new(ManualClock::new(1, shutdown.clone()));
        let mut bot = Bot::new(config(&["BTCUSDT", "ETHUSDT"]), exchange.clone(), clock)
            .with_shutdown_signal(shutdown);

        // the stop is raised while BTCUSDT places its take-profit leg
        let summary = bot.run_cycle().await.unwrap();

        assert_eq!(summary.opened, 1);
        let position = bot.book.get("BTCUSDT").unwrap();
        assert_eq!(position.take_profit_price, position.entry_price * dec!(1.1));
        assert!(!bot.book.contains("ETHUSDT"));

        let mutating = exchange.mutating_calls();
        assert_eq!(mutating.len(), 3);
        assert!(mutating.iter().all(|c| matches!(
            c,
            Call::Market { symbol, .. } | Call::Stop { symbol, .. } | Call::Limit { symbol, .. }
                if symbol == "BTCUSDT"
        )));
        // a stopped cycle skips monitoring
        assert!(!exchange.calls().iter().any(|c| matches!(c, Call::Ticker(_))));
    }

    #[tokio::test]
    async fn test_run_sleeps_interval_until_stopped() {
        let exchange = Arc::new(MockExchange::new().with_history("BTCUSDT", bars_flat(60)));
        let (mut bot, clock) = bot(&["BTCUSDT"], &exchange, 3);

        bot.run().await.unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 3]);
        let fetches = exchange
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::History(_)))
            .count();
        assert_eq!(fetches, 3);
        assert!(!bot.get_stats().is_running);
    }

    #[tokio::test]
    async fn test_run_backs_off_after_failed_cycle() {
        let exchange = Arc::new(MockExchange::new().failing(Op::History));
        let (mut bot, clock) = bot(&["BTCUSDT", "ETHUSDT"], &exchange, 2);

        bot.run().await.unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30); 2]);
        assert!(exchange.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_symbol_does_not_block_others() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_history("BTCUSDT", uptrend(60))
                .with_balance("USDT", dec!(10000)),
        );
        let (mut bot, _) = bot(&["ETHUSDT", "BTCUSDT"], &exchange, 1);

        let summary = bot.run_cycle().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.opened, 1);
    }

    #[tokio::test]
    async fn test_stop_request_skips_decisions() {
        let exchange = Arc::new(
            MockExchange::new()
                .with_history("BTCUSDT", uptrend(60))
                .with_balance("USDT", dec!(10000)),
        );
        let (mut bot, _) = bot(&["BTCUSDT"], &exchange, 1);
        bot.shutdown.store(true, Ordering::SeqCst);

        let summary = bot.run_cycle().await.unwrap_or_default();

        assert_eq!(summary.opened, 0);
        assert!(exchange.mutating_calls().is_empty());
        assert!(bot.book.is_empty());
    }

    fn bars_flat(len: usize) -> Vec<crate::models::PriceBar> {
        crate::models::fixtures::bars_from_closes(&vec![100.0; len])
    }
}
