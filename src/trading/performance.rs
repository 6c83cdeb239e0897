//! Realized performance: closed trade history, win rate and P&L statistics.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::models::ClosedTrade;

/// Read-only snapshot of the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub winning_trades: usize,

    /// Percent of trades with positive P&L (0 with no trades)
    pub win_rate: f64,

    /// Realized P&L of trades closed on the current UTC day
    pub daily_pnl: Decimal,

    pub total_pnl: Decimal,
    pub avg_win: Decimal,

    /// Mean absolute loss of losing trades
    pub avg_loss: Decimal,

    /// Gross profit / gross loss, `None` without losses
    pub profit_factor: Option<f64>,

    /// Largest peak-to-trough fall of cumulative realized P&L
    pub max_drawdown: Decimal,

    pub pnl_std_dev: f64,
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Trades: {} ({} winning, {:.2}% win rate)",
            self.total_trades, self.winning_trades, self.win_rate
        )?;
        writeln!(f, "  Daily P&L: {}", self.daily_pnl.round_dp(2))?;
        writeln!(f, "  Total P&L: {}", self.total_pnl.round_dp(2))?;
        writeln!(
            f,
            "  Avg win / loss: {} / {}",
            self.avg_win.round_dp(2),
            self.avg_loss.round_dp(2)
        )?;
        match self.profit_factor {
            Some(pf) => writeln!(f, "  Profit factor: {:.2}", pf)?,
            None => writeln!(f, "  Profit factor: n/a")?,
        }
        write!(f, "  Max drawdown: {}", self.max_drawdown.round_dp(2))
    }
}

/// Append-only record of closed trades.
#[derive(Debug, Clone, Default)]
pub struct PerformanceTracker {
    history: Vec<ClosedTrade>,
    total_trades: usize,
    winning_trades: usize,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild counters from persisted trades, oldest first.
    pub fn from_history(trades: Vec<ClosedTrade>) -> Self {
        let mut tracker = Self::new();
        for trade in trades {
            tracker.record(trade);
        }
        tracker
    }

    pub fn record(&mut self, trade: ClosedTrade) {
        self.total_trades += 1;
        if trade.is_win() {
            self.winning_trades += 1;
        }
        self.history.push(trade);
    }

    /// Winning share in percent; 0 when nothing has closed yet.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64 * 100.0
    }

    pub fn statistics(&self) -> PerformanceStats {
        self.statistics_at(Utc::now())
    }

    /// Statistics with `daily_pnl` taken over the UTC day containing `now`.
    pub fn statistics_at(&self, now: DateTime<Utc>) -> PerformanceStats {
        let today = now.date_naive();
        let daily_pnl = self
            .history
            .iter()
            .filter(|t| t.timestamp.date_naive() == today)
            .map(|t| t.pnl)
            .sum();

        let pnls: Vec<Decimal> = self.history.iter().map(|t| t.pnl).collect();
        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) =
            pnls.iter().copied().partition(|p| *p > Decimal::ZERO);
        let losses: Vec<Decimal> = losses.into_iter().filter(|l| *l < Decimal::ZERO).collect();

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();

        let avg_win = mean(gross_profit, wins.len());
        let avg_loss = mean(gross_loss, losses.len());

        let profit_factor = if gross_loss > Decimal::ZERO {
            (gross_profit / gross_loss).to_f64()
        } else {
            None
        };

        let pnl_std_dev = if pnls.len() < 2 {
            0.0
        } else {
            pnls.iter()
                .map(|p| p.to_f64().unwrap_or(0.0))
                .collect::<Vec<f64>>()
                .std_dev()
        };

        PerformanceStats {
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            win_rate: self.win_rate(),
            daily_pnl,
            total_pnl: pnls.iter().copied().sum(),
            avg_win,
            avg_loss,
            profit_factor,
            max_drawdown: max_drawdown(&pnls),
            pnl_std_dev,
        }
    }
}

fn mean(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    total / Decimal::from(count)
}

/// Drawdown of the cumulative P&L curve, starting from zero.
fn max_drawdown(pnls: &[Decimal]) -> Decimal {
    let mut equity = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_dd = Decimal::ZERO;

    for pnl in pnls {
        equity += pnl;
        peak = peak.max(equity);
        max_dd = max_dd.max(peak - equity);
    }

    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal, at: DateTime<Utc>) -> ClosedTrade {
        // size 1 from entry 100, so pnl = exit - 100
        ClosedTrade::new(
            "BTCUSDT".to_string(),
            dec!(100),
            dec!(100) + pnl,
            dec!(1),
            at,
            ExitReason::Signal,
        )
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = PerformanceTracker::new();
        assert_eq!(tracker.win_rate(), 0.0);

        let stats = tracker.statistics();
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.daily_pnl, Decimal::ZERO);
        assert_eq!(stats.profit_factor, None);
    }

    #[test]
    fn test_win_rate_two_of_three() {
        let now = Utc::now();
        let mut tracker = PerformanceTracker::new();
        tracker.record(trade(dec!(5), now));
        tracker.record(trade(dec!(-2), now));
        tracker.record(trade(dec!(1), now));

        let stats = tracker.statistics();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!((tracker.win_rate() * 100.0).round() / 100.0, 66.67);
    }

    #[test]
    fn test_break_even_is_not_a_win() {
        let mut tracker = PerformanceTracker::new();
        tracker.record(trade(Decimal::ZERO, Utc::now()));
        assert_eq!(tracker.statistics().winning_trades, 0);
        assert_eq!(tracker.statistics().avg_loss, Decimal::ZERO);
    }

    #[test]
    fn test_daily_pnl_counts_only_current_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap();
        let mut tracker = PerformanceTracker::new();
        tracker.record(trade(dec!(40), now - Duration::days(1)));
        tracker.record(trade(dec!(5), now - Duration::hours(14)));
        tracker.record(trade(dec!(-2), now - Duration::hours(1)));

        let stats = tracker.statistics_at(now);
        assert_eq!(stats.daily_pnl, dec!(3));
        assert_eq!(stats.total_pnl, dec!(43));
    }

    #[test]
    fn test_extended_statistics() {
        let now = Utc::now();
        let tracker = PerformanceTracker::from_history(vec![
            trade(dec!(10), now),
            trade(dec!(-4), now),
            trade(dec!(-6), now),
            trade(dec!(20), now),
        ]);

        let stats = tracker.statistics_at(now);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.avg_win, dec!(15));
        assert_eq!(stats.avg_loss, dec!(5));
        assert_eq!(stats.profit_factor, Some(3.0));
        // equity 10, 6, 0, 20 → peak 10, trough 0
        assert_eq!(stats.max_drawdown, dec!(10));
        assert!(stats.pnl_std_dev > 0.0);
    }

    #[test]
    fn test_drawdown_from_initial_losses() {
        assert_eq!(max_drawdown(&[dec!(-3), dec!(-2), dec!(4)]), dec!(5));
        assert_eq!(max_drawdown(&[]), Decimal::ZERO);
    }
}
