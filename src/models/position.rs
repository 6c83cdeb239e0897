//! Open long position with its protective stop and take-profit orders.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A long position opened on a BUY signal.
///
/// Positions are never resized; they only leave the table when closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Trading pair, unique key of the position table
    pub symbol: String,

    /// Price the market entry was recorded at
    pub entry_price: Decimal,

    /// Trigger price of the protective stop (below entry)
    pub stop_loss_price: Decimal,

    /// Price of the resting take-profit limit sell (above entry)
    pub take_profit_price: Decimal,

    /// Quantity in base asset
    pub size: Decimal,

    pub opened_at: DateTime<Utc>,

    pub entry_order_id: String,
    pub stop_order_id: String,
    pub limit_order_id: String,
}

impl Position {
    /// Amount lost if the stop fills at its trigger price.
    pub fn risk_amount(&self) -> Decimal {
        (self.entry_price - self.stop_loss_price).abs() * self.size
    }

    /// Capital committed at entry.
    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * self.size
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        (current_price - self.entry_price) * self.size
    }

    /// Unrealized return in percent. Zero when the entry price is zero.
    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED
    }

    pub fn holding_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }
}

#[cfg(test)]
pub(crate) fn sample_position(symbol: &str) -> Position {
    use rust_decimal_macros::dec;

    Position {
        symbol: symbol.to_string(),
        entry_price: dec!(100),
        stop_loss_price: dec!(95),
        take_profit_price: dec!(110),
        size: dec!(4),
        opened_at: Utc::now() - Duration::hours(3),
        entry_order_id: "entry-1".to_string(),
        stop_order_id: "stop-1".to_string(),
        limit_order_id: "limit-1".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_pnl() {
        let pos = sample_position("BTCUSDT");

        assert_eq!(pos.risk_amount(), dec!(20));
        assert_eq!(pos.cost_basis(), dec!(400));
        assert_eq!(pos.unrealized_pnl(dec!(105)), dec!(20));
        assert_eq!(pos.unrealized_pnl_pct(dec!(105)), dec!(5));
        assert_eq!(pos.unrealized_pnl_pct(dec!(90)), dec!(-10));
    }

    #[test]
    fn test_zero_entry_pct() {
        let mut pos = sample_position("BTCUSDT");
        pos.entry_price = Decimal::ZERO;
        assert_eq!(pos.unrealized_pnl_pct(dec!(5)), Decimal::ZERO);
    }

    #[test]
    fn test_holding_duration() {
        let pos = sample_position("ETHUSDT");
        let held = pos.holding_duration(pos.opened_at + Duration::minutes(90));
        assert_eq!(held.num_minutes(), 90);
    }
}
