//! Capability interface the trading core needs from an exchange.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::models::{OrderSide, PriceBar};

/// State of a resting order as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Still resting or untriggered
    Open,
    /// Completely filled at the given average price
    Filled { avg_price: Decimal },
    /// Cancelled, rejected or expired
    Cancelled,
}

/// Market data and order routing used by the evaluation loop.
///
/// Fetches fail with [`ExchangeError::DataUnavailable`], submissions and
/// cancellations with [`ExchangeError::OrderRejected`].
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Candles for `symbol`, oldest-first, at most `limit` long.
    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError>;

    /// Free amount per asset.
    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Last traded price.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<String, ExchangeError>;

    /// Sell stop that triggers a market sell at `stop_price`.
    async fn submit_stop_order(
        &self,
        symbol: &str,
        size: Decimal,
        stop_price: Decimal,
    ) -> Result<String, ExchangeError>;

    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError>;

    async fn fetch_order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderStatus, ExchangeError>;
}

#[async_trait]
impl<E: Exchange + ?Sized> Exchange for std::sync::Arc<E> {
    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError> {
        (**self).fetch_history(symbol, timeframe, limit).await
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        (**self).fetch_balance().await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        (**self).fetch_ticker(symbol).await
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<String, ExchangeError> {
        (**self).submit_market_order(symbol, side, size).await
    }

    async fn submit_stop_order(
        &self,
        symbol: &str,
        size: Decimal,
        stop_price: Decimal,
    ) -> Result<String, ExchangeError> {
        (**self).submit_stop_order(symbol, size, stop_price).await
    }

    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, ExchangeError> {
        (**self).submit_limit_order(symbol, side, size, price).await
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        (**self).cancel_order(order_id, symbol).await
    }

    async fn fetch_order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        (**self).fetch_order_status(order_id, symbol).await
    }
}
