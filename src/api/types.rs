//! Bybit v5 REST request and response types.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::PriceBar;

use super::OrderStatus;

/// Envelope of every v5 response. `result` is `{}` on errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: T,
}

/// Paged `{ "list": [...] }` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

impl<T> Default for ListResult<T> {
    fn default() -> Self {
        Self { list: Vec::new() }
    }
}

/// Kline row: `[startTime, open, high, low, close, volume, turnover]`.
pub type KlineRow = Vec<String>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerEntry {
    pub symbol: String,
    #[serde(default)]
    pub last_price: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub coin: Vec<WalletCoin>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCoin {
    pub coin: String,
    #[serde(default)]
    pub wallet_balance: String,
    #[serde(default)]
    pub locked: String,
}

impl WalletCoin {
    /// Wallet balance minus the amount locked in open orders.
    pub fn free(&self) -> Decimal {
        (parse_decimal(&self.wallet_balance) - parse_decimal(&self.locked)).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEntry {
    pub order_id: String,
    pub order_status: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub cum_exec_qty: String,
}

impl OrderEntry {
    pub fn status(&self) -> OrderStatus {
        match self.order_status.as_str() {
            "Filled" => OrderStatus::Filled {
                avg_price: parse_decimal(&self.avg_price),
            },
            "Cancelled" | "Rejected" | "PartiallyFilledCanceled" | "Deactivated" => {
                OrderStatus::Cancelled
            }
            // New, PartiallyFilled, Untriggered, Triggered, Active
            _ => OrderStatus::Open,
        }
    }
}

/// Body of `POST /v5/order/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub category: &'static str,
    pub symbol: String,
    pub side: &'static str,
    pub order_type: &'static str,
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_filter: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<&'static str>,
    pub order_link_id: String,
}

/// Body of `POST /v5/order/cancel`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub category: &'static str,
    pub symbol: String,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_filter: Option<&'static str>,
}

/// Bybit interval code for a timeframe such as `1h` or `1d`.
pub fn bybit_interval(timeframe: &str) -> Option<&'static str> {
    let code = match timeframe {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        "1M" => "M",
        _ => return None,
    };
    Some(code)
}

pub fn parse_kline(row: &KlineRow) -> Option<PriceBar> {
    if row.len() < 6 {
        return None;
    }
    let start_ms: i64 = row[0].parse().ok()?;
    Some(PriceBar::new(
        Utc.timestamp_millis_opt(start_ms).single()?,
        row[1].parse().ok()?,
        row[2].parse().ok()?,
        row[3].parse().ok()?,
        row[4].parse().ok()?,
        row[5].parse().ok()?,
    ))
}

/// Lenient decimal parse; Bybit sends `""` for unset numeric fields.
pub fn parse_decimal(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or(Decimal::ZERO)
}
