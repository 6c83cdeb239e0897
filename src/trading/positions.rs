//! Position lifecycle: entry with protective orders, signal exits, external
//! stop/target fills and read-only monitoring.
//!
//! The manager holds no state of its own. The position table is a
//! [`PositionBook`] owned by the caller and passed in on every operation, so a
//! single writer mutates it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::api::{Exchange, OrderStatus};
use crate::error::{PositionError, SizingError};
use crate::models::{ClosedTrade, ExitReason, OrderSide, Position, Signal, TrendAnalysis};

use super::{PerformanceTracker, RiskManager};

/// Decimal places kept on prices and sizes derived from indicator floats.
const PRICE_DP: u32 = 8;

/// Protective exit distances as fractions of the entry price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLevels {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for ExitLevels {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(0.05),
            take_profit_pct: dec!(0.10),
        }
    }
}

impl ExitLevels {
    pub fn stop_price(&self, entry: Decimal) -> Decimal {
        entry * (Decimal::ONE - self.stop_loss_pct)
    }

    pub fn take_profit_price(&self, entry: Decimal) -> Decimal {
        entry * (Decimal::ONE + self.take_profit_pct)
    }
}

/// Open positions keyed by symbol. At most one per symbol.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted positions; a later duplicate symbol replaces an
    /// earlier one.
    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        Self {
            positions: positions
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions sorted by symbol.
    pub fn positions(&self) -> Vec<&Position> {
        let mut all: Vec<_> = self.positions.values().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Risk amount committed by each open position.
    pub fn risks(&self) -> Vec<Decimal> {
        self.positions.values().map(Position::risk_amount).collect()
    }

    pub fn total_risk(&self) -> Decimal {
        self.risks().into_iter().sum()
    }

    pub fn cost_basis(&self) -> Decimal {
        self.positions.values().map(Position::cost_basis).sum()
    }

    fn insert(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }
}

/// Point-in-time view of an open position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    pub symbol: String,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    #[serde(skip)]
    pub holding: Duration,
}

/// Applies entry and exit rules and routes the resulting orders.
#[derive(Debug, Clone)]
pub struct PositionManager {
    risk: RiskManager,
    exits: ExitLevels,
    rsi_overbought: f64,
    rsi_oversold: f64,
    quote_asset: String,
}

impl PositionManager {
    pub fn new(
        risk: RiskManager,
        exits: ExitLevels,
        rsi_overbought: f64,
        rsi_oversold: f64,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            risk,
            exits,
            rsi_overbought,
            rsi_oversold,
            quote_asset: quote_asset.into(),
        }
    }

    /// Enter a long position on a BUY analysis.
    ///
    /// Preconditions are checked before the exchange is touched. After the
    /// market buy fills, a failed stop or limit submission aborts without
    /// recording the position and without cancelling what was already placed.
    pub async fn open<E: Exchange + ?Sized>(
        &self,
        exchange: &E,
        book: &mut PositionBook,
        analysis: &TrendAnalysis,
        now: DateTime<Utc>,
    ) -> Result<Position, PositionError> {
        let symbol = analysis.symbol.as_str();

        if book.contains(symbol) {
            return Err(PositionError::AlreadyOpen(symbol.to_string()));
        }
        if analysis.signal != Signal::Buy {
            return Err(PositionError::NotBuySignal);
        }
        if analysis.rsi() >= self.rsi_overbought {
            return Err(PositionError::Overbought {
                rsi: analysis.rsi(),
                ceiling: self.rsi_overbought,
            });
        }

        let entry_price = to_price(analysis.current_price)?;
        let stop_loss_price = self.exits.stop_price(entry_price).round_dp(PRICE_DP);
        let take_profit_price = self.exits.take_profit_price(entry_price).round_dp(PRICE_DP);

        let balances = exchange.fetch_balance().await?;
        let free = balances
            .get(&self.quote_asset)
            .copied()
            .unwrap_or(Decimal::ZERO);

        let sized = self.risk.position_size(free, entry_price, stop_loss_price)?;
        let size = sized
            .size
            .round_dp_with_strategy(PRICE_DP, RoundingStrategy::ToZero);
        if size <= Decimal::ZERO {
            return Err(SizingError::InsufficientFunds(free).into());
        }
        let equity = free + book.cost_basis();
        self.risk
            .check_new_position(&book.risks(), sized.risk_amount, equity)?;

        let entry_order_id = exchange
            .submit_market_order(symbol, OrderSide::Buy, size)
            .await
            .map_err(|e| {
                error!(symbol = %symbol, size = %size, error = %e, "Market buy rejected");
                e
            })?;

        let stop_order_id = match exchange
            .submit_stop_order(symbol, size, stop_loss_price)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    symbol = %symbol,
                    entry_order = %entry_order_id,
                    error = %e,
                    "Stop order rejected after entry fill; position left unprotected and untracked"
                );
                return Err(e.into());
            }
        };

        let limit_order_id = match exchange
            .submit_limit_order(symbol, OrderSide::Sell, size, take_profit_price)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    symbol = %symbol,
                    entry_order = %entry_order_id,
                    stop_order = %stop_order_id,
                    error = %e,
                    "Take-profit order rejected after entry fill; orders left in place and untracked"
                );
                return Err(e.into());
            }
        };

        let position = Position {
            symbol: symbol.to_string(),
            entry_price,
            stop_loss_price,
            take_profit_price,
            size,
            opened_at: now,
            entry_order_id,
            stop_order_id,
            limit_order_id,
        };

        info!(
            symbol = %symbol,
            entry = %position.entry_price,
            stop = %position.stop_loss_price,
            target = %position.take_profit_price,
            size = %position.size,
            risk = %position.risk_amount(),
            "Opened position"
        );

        book.insert(position.clone());
        Ok(position)
    }

    /// Exit a position on a SELL analysis whose RSI is above the oversold
    /// floor. If the market sell is rejected the position stays open.
    pub async fn close<E: Exchange + ?Sized>(
        &self,
        exchange: &E,
        book: &mut PositionBook,
        analysis: &TrendAnalysis,
        tracker: &mut PerformanceTracker,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, PositionError> {
        let symbol = analysis.symbol.as_str();

        let position = book
            .get(symbol)
            .cloned()
            .ok_or_else(|| PositionError::NotOpen(symbol.to_string()))?;
        if analysis.signal != Signal::Sell || analysis.rsi() <= self.rsi_oversold {
            return Err(PositionError::ExitConditionNotMet {
                rsi: analysis.rsi(),
                floor: self.rsi_oversold,
            });
        }

        let exit_price = to_price(analysis.current_price)?;

        for order_id in [&position.stop_order_id, &position.limit_order_id] {
            if let Err(e) = exchange.cancel_order(order_id, symbol).await {
                warn!(symbol = %symbol, order = %order_id, error = %e, "Cancel failed, closing anyway");
            }
        }

        if let Err(e) = exchange
            .submit_market_order(symbol, OrderSide::Sell, position.size)
            .await
        {
            error!(symbol = %symbol, size = %position.size, error = %e, "Market sell rejected, position stays open");
            return Err(e.into());
        }

        book.remove(symbol);
        let trade = ClosedTrade::new(
            position.symbol,
            position.entry_price,
            exit_price,
            position.size,
            now,
            ExitReason::Signal,
        );

        info!(
            symbol = %symbol,
            entry = %trade.entry_price,
            exit = %trade.exit_price,
            pnl = %trade.pnl,
            "Closed position on sell signal"
        );

        tracker.record(trade.clone());
        Ok(trade)
    }

    /// Detect stop or take-profit fills reported by the exchange and retire
    /// the matching positions. Lookup failures leave a position open.
    pub async fn reconcile_exits<E: Exchange + ?Sized>(
        &self,
        exchange: &E,
        book: &mut PositionBook,
        tracker: &mut PerformanceTracker,
        now: DateTime<Utc>,
    ) -> Vec<ClosedTrade> {
        let mut closed = Vec::new();
        let symbols: Vec<String> = book.positions().iter().map(|p| p.symbol.clone()).collect();

        for symbol in symbols {
            let Some(position) = book.get(&symbol).cloned() else {
                continue;
            };

            let fill = match self.detect_fill(exchange, &position).await {
                Ok(fill) => fill,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Order status unavailable");
                    continue;
                }
            };
            let Some((reason, fill_price, sibling)) = fill else {
                continue;
            };

            if let Err(e) = exchange.cancel_order(sibling, &symbol).await {
                warn!(symbol = %symbol, order = %sibling, error = %e, "Sibling cancel failed");
            }

            book.remove(&symbol);
            let trade = ClosedTrade::new(
                position.symbol.clone(),
                position.entry_price,
                fill_price,
                position.size,
                now,
                reason,
            );

            info!(
                symbol = %symbol,
                reason = %reason.as_str(),
                exit = %trade.exit_price,
                pnl = %trade.pnl,
                "Position closed by exchange"
            );

            tracker.record(trade.clone());
            closed.push(trade);
        }

        closed
    }

    async fn detect_fill<'p, E: Exchange + ?Sized>(
        &self,
        exchange: &E,
        position: &'p Position,
    ) -> Result<Option<(ExitReason, Decimal, &'p str)>, PositionError> {
        let stop = exchange
            .fetch_order_status(&position.stop_order_id, &position.symbol)
            .await?;
        if let OrderStatus::Filled { avg_price } = stop {
            let price = if avg_price.is_zero() {
                position.stop_loss_price
            } else {
                avg_price
            };
            return Ok(Some((ExitReason::StopLoss, price, position.limit_order_id.as_str())));
        }

        let limit = exchange
            .fetch_order_status(&position.limit_order_id, &position.symbol)
            .await?;
        if let OrderStatus::Filled { avg_price } = limit {
            let price = if avg_price.is_zero() {
                position.take_profit_price
            } else {
                avg_price
            };
            return Ok(Some((ExitReason::TakeProfit, price, position.stop_order_id.as_str())));
        }

        if stop == OrderStatus::Cancelled && limit == OrderStatus::Cancelled {
            debug!(symbol = %position.symbol, "Both protective orders cancelled externally");
        }

        Ok(None)
    }

    /// Unrealized P&L and holding time. Read-only.
    pub fn monitor(
        &self,
        book: &PositionBook,
        symbol: &str,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<PositionReport> {
        let position = book.get(symbol)?;
        Some(PositionReport {
            symbol: position.symbol.clone(),
            entry_price: position.entry_price,
            current_price,
            unrealized_pnl: position.unrealized_pnl(current_price),
            unrealized_pnl_pct: position.unrealized_pnl_pct(current_price),
            holding: position.holding_duration(now),
        })
    }
}

fn to_price(value: f64) -> Result<Decimal, PositionError> {
    match Decimal::try_from(value) {
        Ok(price) if price > Decimal::ZERO => Ok(price.round_dp(PRICE_DP)),
        _ => Err(PositionError::InvalidPrice(value)),
    }
}
