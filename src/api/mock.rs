//! Scripted in-memory exchange for tests. Records every call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::models::{OrderSide, PriceBar};

use super::{Exchange, OrderStatus};

/// Operation kinds that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    History,
    Balance,
    Ticker,
    MarketBuy,
    MarketSell,
    Stop,
    Limit,
    Cancel,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    History(String),
    Balance,
    Ticker(String),
    Market { symbol: String, side: OrderSide, size: Decimal },
    Stop { symbol: String, size: Decimal, stop_price: Decimal },
    Limit { symbol: String, side: OrderSide, size: Decimal, price: Decimal },
    Cancel { order_id: String, symbol: String },
    Status(String),
}

impl Call {
    /// True for calls that change exchange state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Market { .. } | Call::Stop { .. } | Call::Limit { .. } | Call::Cancel { .. }
        )
    }
}

#[derive(Default)]
struct State {
    histories: HashMap<String, Vec<PriceBar>>,
    balances: HashMap<String, Decimal>,
    tickers: HashMap<String, Decimal>,
    statuses: HashMap<String, OrderStatus>,
    failing: HashSet<Op>,
    trip: Option<(Op, Arc<AtomicBool>)>,
    calls: Vec<Call>,
    next_id: u64,
}

#[derive(Default)]
pub struct MockExchange {
    state: Mutex<State>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.state.lock().unwrap().histories.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_balance(self, asset: &str, amount: Decimal) -> Self {
        self.state.lock().unwrap().balances.insert(asset.to_string(), amount);
        self
    }

    pub fn with_ticker(self, symbol: &str, price: Decimal) -> Self {
        self.set_ticker(symbol, price);
        self
    }

    pub fn failing(self, op: Op) -> Self {
        self.set_failing(op, true);
        self
    }

    /// Raise `flag` whenever `op` is called.
    pub fn tripping(self, op: Op, flag: Arc<AtomicBool>) -> Self {
        self.state.lock().unwrap().trip = Some((op, flag));
        self
    }

    pub fn set_ticker(&self, symbol: &str, price: Decimal) {
        self.state.lock().unwrap().tickers.insert(symbol.to_string(), price);
    }

    pub fn set_failing(&self, op: Op, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(order_id.to_string(), status);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    fn record(&self, call: Call, op: Op) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some((trip_op, flag)) = &state.trip {
            if *trip_op == op {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if state.failing.contains(&op) {
            return Err(match op {
                Op::History | Op::Balance | Op::Ticker | Op::Status => {
                    ExchangeError::DataUnavailable(format!("{:?} failed", op))
                }
                _ => ExchangeError::OrderRejected(format!("{:?} failed", op)),
            });
        }
        Ok(())
    }

    fn next_order_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn fetch_history(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError> {
        self.record(Call::History(symbol.to_string()), Op::History)?;
        let state = self.state.lock().unwrap();
        let bars = state
            .histories
            .get(symbol)
            .ok_or_else(|| ExchangeError::DataUnavailable(format!("no history for {}", symbol)))?;
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.record(Call::Balance, Op::Balance)?;
        Ok(self.state.lock().unwrap().balances.clone())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.record(Call::Ticker(symbol.to_string()), Op::Ticker)?;
        self.state
            .lock()
            .unwrap()
            .tickers
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::DataUnavailable(format!("no ticker for {}", symbol)))
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<String, ExchangeError> {
        let op = match side {
            OrderSide::Buy => Op::MarketBuy,
            OrderSide::Sell => Op::MarketSell,
        };
        self.record(
            Call::Market {
                symbol: symbol.to_string(),
                side,
                size,
            },
            op,
        )?;
        Ok(self.next_order_id("market"))
    }

    async fn submit_stop_order(
        &self,
        symbol: &str,
        size: Decimal,
        stop_price: Decimal,
    ) -> Result<String, ExchangeError> {
        self.record(
            Call::Stop {
                symbol: symbol.to_string(),
                size,
                stop_price,
            },
            Op::Stop,
        )?;
        Ok(self.next_order_id("stop"))
    }

    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, ExchangeError> {
        self.record(
            Call::Limit {
                symbol: symbol.to_string(),
                side,
                size,
                price,
            },
            Op::Limit,
        )?;
        Ok(self.next_order_id("limit"))
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        self.record(
            Call::Cancel {
                order_id: order_id.to_string(),
                symbol: symbol.to_string(),
            },
            Op::Cancel,
        )
    }

    async fn fetch_order_status(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        self.record(Call::Status(order_id.to_string()), Op::Status)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(order_id)
            .copied()
            .unwrap_or(OrderStatus::Open))
    }
}
