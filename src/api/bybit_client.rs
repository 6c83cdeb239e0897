//! Bybit v5 spot REST client.
//!
//! Handles:
//! - Market data (klines, tickers) without authentication
//! - Wallet balance and order routing signed with HMAC-SHA256
//! - Retries with exponential backoff for read-only calls

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::models::{OrderSide, PriceBar};

use super::types::*;
use super::{Exchange, OrderStatus};

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: u64 = 5000;
const MAX_KLINES: usize = 1000;

/// retCode for "order does not exist"
const ORDER_NOT_FOUND: i64 = 110001;

type HmacSha256 = Hmac<Sha256>;

/// Failure of a single HTTP round trip, before it is classified for callers.
#[derive(Debug, Error)]
enum RequestError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http {0}: {1}")]
    Status(StatusCode, String),

    #[error("api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("{0}")]
    Auth(String),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RequestError {
    fn is_transient(&self) -> bool {
        match self {
            RequestError::Transport(e) => e.is_timeout() || e.is_connect(),
            RequestError::Status(status, _) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            // timestamp outside recv window, rate limit, internal error
            RequestError::Api { code, .. } => matches!(code, 10002 | 10006 | 10016),
            RequestError::Auth(_) | RequestError::Encode(_) => false,
        }
    }
}

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

/// Client for Bybit spot trading.
pub struct BybitClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    max_retries: u32,
}

impl BybitClient {
    /// Create a client with a per-request timeout and a retry budget for reads.
    pub fn new(testnet: bool, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            credentials: None,
            max_retries,
        })
    }

    /// Enable private endpoints.
    pub fn with_credentials(mut self, api_key: String, api_secret: String) -> Self {
        self.credentials = Some(Credentials {
            api_key,
            api_secret,
        });
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn auth_headers(&self, payload: &str) -> Result<HeaderMap, RequestError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| RequestError::Auth("API credentials not configured".to_string()))?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(
            &creds.api_secret,
            &timestamp,
            &creds.api_key,
            RECV_WINDOW,
            payload,
        )
        .map_err(RequestError::Auth)?;

        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| RequestError::Auth(e.to_string()))
        };

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-bapi-api-key"), header(&creds.api_key)?);
        headers.insert(HeaderName::from_static("x-bapi-timestamp"), header(&timestamp)?);
        headers.insert(HeaderName::from_static("x-bapi-sign"), header(&signature)?);
        headers.insert(
            HeaderName::from_static("x-bapi-recv-window"),
            header(&RECV_WINDOW.to_string())?,
        );
        Ok(headers)
    }

    async fn get_once<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        signed: bool,
    ) -> Result<T, RequestError>
    where
        T: DeserializeOwned + Default,
    {
        let query_string = encode_query(query);
        let url = if query_string.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query_string)
        };

        debug!(url = %url, "GET");

        let mut request = self.client.get(&url);
        if signed {
            request = request.headers(self.auth_headers(&query_string)?);
        }

        decode(request.send().await?).await
    }

    async fn post_once<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize,
        T: DeserializeOwned + Default,
    {
        let payload = serde_json::to_string(body)?;
        let headers = self.auth_headers(&payload)?;
        let url = format!("{}{}", self.base_url, path);

        debug!(url = %url, body = %payload, "POST");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        decode(response).await
    }

    /// Run a read with exponential backoff on transient failures, at most
    /// `max_retries` extra attempts.
    async fn read<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        let max_retries = self.max_retries;
        let mut attempt = 0u32;

        backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_transient() && current <= max_retries => {
                        warn!(what = %what, attempt = current, error = %e, "Retrying request");
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
        .map_err(|e| ExchangeError::DataUnavailable(format!("{}: {}", what, e)))
    }

    async fn create_order(&self, request: OrderRequest) -> Result<String, ExchangeError> {
        let created: OrderCreated = self
            .post_once("/v5/order/create", &request)
            .await
            .map_err(|e| {
                ExchangeError::OrderRejected(format!(
                    "{} {} {}: {}",
                    request.side, request.order_type, request.symbol, e
                ))
            })?;

        debug!(
            symbol = %request.symbol,
            order_id = %created.order_id,
            link_id = %created.order_link_id,
            "Order accepted"
        );
        Ok(created.order_id)
    }

    async fn find_order(
        &self,
        path: &str,
        order_id: &str,
        symbol: &str,
    ) -> Result<Option<OrderEntry>, ExchangeError> {
        let query = [
            ("category", "spot".to_string()),
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let result: ListResult<OrderEntry> = self
            .read("order status", || self.get_once(path, &query, true))
            .await?;
        Ok(result.list.into_iter().find(|o| o.order_id == order_id))
    }
}

async fn decode<T>(response: reqwest::Response) -> Result<T, RequestError>
where
    T: DeserializeOwned + Default,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RequestError::Status(status, body));
    }

    let body: ApiResponse<T> = response.json().await?;
    if body.ret_code != 0 {
        return Err(RequestError::Api {
            code: body.ret_code,
            msg: body.ret_msg,
        });
    }
    Ok(body.result)
}

fn encode_query(query: &[(&str, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, hex encoded.
///
/// `payload` is the query string for GET and the JSON body for POST.
fn sign(
    secret: &str,
    timestamp: &str,
    api_key: &str,
    recv_window: u64,
    payload: &str,
) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.to_string().as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

fn link_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl Exchange for BybitClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError> {
        let interval = bybit_interval(timeframe).ok_or_else(|| {
            ExchangeError::DataUnavailable(format!("unsupported timeframe {}", timeframe))
        })?;
        let query = [
            ("category", "spot".to_string()),
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.min(MAX_KLINES).to_string()),
        ];

        let result: ListResult<KlineRow> = self
            .read("klines", || self.get_once("/v5/market/kline", &query, false))
            .await?;

        // Newest first on the wire
        let mut bars: Vec<PriceBar> = result.list.iter().filter_map(parse_kline).collect();
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let query = [("accountType", "UNIFIED".to_string())];
        let result: ListResult<WalletAccount> = self
            .read("wallet balance", || {
                self.get_once("/v5/account/wallet-balance", &query, true)
            })
            .await?;

        Ok(result
            .list
            .iter()
            .flat_map(|account| account.coin.iter())
            .map(|coin| (coin.coin.clone(), coin.free()))
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let query = [
            ("category", "spot".to_string()),
            ("symbol", symbol.to_string()),
        ];
        let result: ListResult<TickerEntry> = self
            .read("ticker", || self.get_once("/v5/market/tickers", &query, false))
            .await?;

        let ticker = result
            .list
            .into_iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| ExchangeError::DataUnavailable(format!("no ticker for {}", symbol)))?;

        let price = parse_decimal(&ticker.last_price);
        if price <= Decimal::ZERO {
            return Err(ExchangeError::DataUnavailable(format!(
                "invalid last price '{}' for {}",
                ticker.last_price, symbol
            )));
        }
        Ok(price)
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<String, ExchangeError> {
        self.create_order(OrderRequest {
            category: "spot",
            symbol: symbol.to_string(),
            side: side_str(side),
            order_type: "Market",
            qty: size.normalize().to_string(),
            price: None,
            trigger_price: None,
            order_filter: None,
            // Spot market buys default to quote quantity
            market_unit: Some("baseCoin"),
            time_in_force: None,
            order_link_id: link_id(),
        })
        .await
    }

    async fn submit_stop_order(
        &self,
        symbol: &str,
        size: Decimal,
        stop_price: Decimal,
    ) -> Result<String, ExchangeError> {
        self.create_order(OrderRequest {
            category: "spot",
            symbol: symbol.to_string(),
            side: "Sell",
            order_type: "Market",
            qty: size.normalize().to_string(),
            price: None,
            trigger_price: Some(stop_price.normalize().to_string()),
            order_filter: Some("tpslOrder"),
            market_unit: Some("baseCoin"),
            time_in_force: None,
            order_link_id: link_id(),
        })
        .await
    }

    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, ExchangeError> {
        self.create_order(OrderRequest {
            category: "spot",
            symbol: symbol.to_string(),
            side: side_str(side),
            order_type: "Limit",
            qty: size.normalize().to_string(),
            price: Some(price.normalize().to_string()),
            trigger_price: None,
            order_filter: None,
            market_unit: None,
            time_in_force: Some("GTC"),
            order_link_id: link_id(),
        })
        .await
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let mut request = CancelRequest {
            category: "spot",
            symbol: symbol.to_string(),
            order_id: order_id.to_string(),
            order_filter: None,
        };

        let first: Result<OrderCreated, RequestError> =
            self.post_once("/v5/order/cancel", &request).await;

        let result = match first {
            // Conditional orders live under their own filter
            Err(RequestError::Api { code, .. }) if code == ORDER_NOT_FOUND => {
                request.order_filter = Some("tpslOrder");
                self.post_once::<_, OrderCreated>("/v5/order/cancel", &request)
                    .await
            }
            other => other,
        };

        result
            .map(|_| ())
            .map_err(|e| ExchangeError::OrderRejected(format!("cancel {}: {}", order_id, e)))
    }

    async fn fetch_order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        if let Some(entry) = self.find_order("/v5/order/realtime", order_id, symbol).await? {
            return Ok(entry.status());
        }
        if let Some(entry) = self.find_order("/v5/order/history", order_id, symbol).await? {
            return Ok(entry.status());
        }
        Err(ExchangeError::DataUnavailable(format!(
            "order {} not found",
            order_id
        )))
    }
}
