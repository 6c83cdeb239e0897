//! Order sides and closed-trade records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Market sell on a SELL signal
    Signal,
    /// Protective stop filled on the exchange
    StopLoss,
    /// Take-profit limit filled on the exchange
    TakeProfit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Signal => "signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
        }
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(ExitReason::Signal),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "take_profit" => Ok(ExitReason::TakeProfit),
            other => Err(format!("unknown exit reason: {}", other)),
        }
    }
}

/// Realized round trip. Append-only once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,

    /// (exit_price - entry_price) * size
    pub pnl: Decimal,

    /// When the position was closed
    pub timestamp: DateTime<Utc>,

    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    pub fn new(
        symbol: String,
        entry_price: Decimal,
        exit_price: Decimal,
        size: Decimal,
        timestamp: DateTime<Utc>,
        exit_reason: ExitReason,
    ) -> Self {
        Self {
            pnl: (exit_price - entry_price) * size,
            symbol,
            entry_price,
            exit_price,
            size,
            timestamp,
            exit_reason,
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    /// Return on the entry price in percent.
    pub fn return_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.exit_price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED
    }
}
