//! Per-cycle analysis results: indicator snapshot, trend label and signal.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trend label derived from the ordering of three moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Uptrend,
    Downtrend,
    Sideways,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Uptrend => "UPTREND",
            Trend::Downtrend => "DOWNTREND",
            Trend::Sideways => "SIDEWAYS",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading decision for one symbol in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where RSI sits relative to the configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RsiZone {
    Overbought,
    Oversold,
    Neutral,
}

/// Direction of MACD relative to its signal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdBias {
    Bullish,
    Bearish,
    Neutral,
}

/// Latest MACD values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdSnapshot {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

impl MacdSnapshot {
    pub fn bias(&self) -> MacdBias {
        if self.macd_line > self.signal_line {
            MacdBias::Bullish
        } else if self.macd_line < self.signal_line {
            MacdBias::Bearish
        } else {
            MacdBias::Neutral
        }
    }
}

/// Point-in-time indicator values for the most recent bar of a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Simple moving averages keyed by period
    pub moving_averages: BTreeMap<usize, f64>,

    pub rsi: f64,

    pub macd: MacdSnapshot,
}

impl IndicatorSnapshot {
    pub fn ma(&self, period: usize) -> Option<f64> {
        self.moving_averages.get(&period).copied()
    }
}

/// Output of one evaluation of one symbol. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub symbol: String,

    /// Close of the most recent bar
    pub current_price: f64,

    pub trend: Trend,

    pub indicators: IndicatorSnapshot,

    /// Number of bullish conditions met (0-4)
    pub buy_score: u8,

    /// Number of bearish conditions met (0-4)
    pub sell_score: u8,

    pub signal: Signal,

    pub analyzed_at: DateTime<Utc>,
}

impl TrendAnalysis {
    pub fn rsi(&self) -> f64 {
        self.indicators.rsi
    }
}

impl fmt::Display for TrendAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.symbol)?;
        writeln!(f, "Price:        {:.4}", self.current_price)?;
        writeln!(f, "Trend:        {}", self.trend)?;
        for (period, value) in &self.indicators.moving_averages {
            writeln!(f, "MA {:<9} {:.4}", period, value)?;
        }
        writeln!(f, "RSI:          {:.2}", self.indicators.rsi)?;
        writeln!(
            f,
            "MACD:         {:.4} / signal {:.4} / hist {:.4} ({:?})",
            self.indicators.macd.macd_line,
            self.indicators.macd.signal_line,
            self.indicators.macd.histogram,
            self.indicators.macd.bias()
        )?;
        writeln!(f, "Buy score:    {}/4", self.buy_score)?;
        writeln!(f, "Sell score:   {}/4", self.sell_score)?;
        write!(f, "Signal:       {}", self.signal)
    }
}
