//! Paper routing: real market data, simulated order acknowledgements.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::models::{OrderSide, PriceBar};

use super::{Exchange, OrderStatus};

/// Wraps an exchange, forwarding reads and answering writes locally.
///
/// Orders are never sent. Every submission gets a fresh `dry-` id and every
/// resting order stays `Open`, so protective legs never report a fill.
pub struct DryRunExchange<E> {
    inner: E,
}

impl<E: Exchange> DryRunExchange<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

fn dry_id() -> String {
    format!("dry-{}", Uuid::new_v4())
}

#[async_trait]
impl<E: Exchange> Exchange for DryRunExchange<E> {
    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError> {
        self.inner.fetch_history(symbol, timeframe, limit).await
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.inner.fetch_balance().await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.inner.fetch_ticker(symbol).await
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<String, ExchangeError> {
        let id = dry_id();
        info!(symbol = %symbol, side = %side, size = %size, order_id = %id, "[DRY RUN] Market order");
        Ok(id)
    }

    async fn submit_stop_order(
        &self,
        symbol: &str,
        size: Decimal,
        stop_price: Decimal,
    ) -> Result<String, ExchangeError> {
        let id = dry_id();
        info!(symbol = %symbol, size = %size, stop = %stop_price, order_id = %id, "[DRY RUN] Stop order");
        Ok(id)
    }

    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, ExchangeError> {
        let id = dry_id();
        info!(symbol = %symbol, side = %side, size = %size, price = %price, order_id = %id, "[DRY RUN] Limit order");
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        info!(symbol = %symbol, order_id = %order_id, "[DRY RUN] Cancel");
        Ok(())
    }

    async fn fetch_order_status(
        &self,
        _order_id: &str,
        _symbol: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        Ok(OrderStatus::Open)
    }
}
