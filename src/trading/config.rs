//! Trading configuration.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSettings;

use super::{ExitLevels, RiskLimits, SignalRules};

/// Flat set of named options for indicators, signals, sizing and the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Pairs evaluated every cycle (e.g. "BTCUSDT")
    pub trading_pairs: Vec<String>,

    /// Asset whose free balance funds new entries
    pub quote_asset: String,

    /// Candle timeframe (1m, 5m, 15m, 1h, 4h, 1d, ...)
    pub timeframe: String,

    /// Number of candles fetched per evaluation
    pub history_limit: usize,

    /// Delay between evaluation cycles (seconds)
    pub check_interval_secs: u64,

    /// Delay after a failed cycle (seconds)
    pub error_backoff_secs: u64,

    // === Indicators ===
    pub ma_short: usize,
    pub ma_medium: usize,
    pub ma_long: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    // === Signal rules ===
    /// RSI at or above this blocks entries and fails the buy condition
    pub rsi_overbought: f64,

    /// RSI must be above this for the sell condition and signal exits
    pub rsi_oversold: f64,

    /// Conditions (out of 4) required for BUY or SELL
    pub signal_threshold: u8,

    // === Risk ===
    /// Fraction of free balance risked per trade (0.0 to 1.0)
    pub risk_per_trade: Decimal,

    /// Stop distance below entry (0.0 to 1.0)
    pub stop_loss_pct: Decimal,

    /// Take-profit distance above entry (0.0 to 1.0)
    pub take_profit_pct: Decimal,

    /// Maximum number of concurrently open positions
    pub max_open_positions: usize,

    /// Ceiling on committed risk as a fraction of equity (0.0 to 1.0)
    pub max_total_risk: Decimal,

    // === Exchange ===
    /// Timeout for a single exchange request (seconds)
    pub request_timeout_secs: u64,

    /// Retries for read-only exchange requests
    pub max_retries: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            trading_pairs: ["BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "SOLUSDT", "XRPUSDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quote_asset: "USDT".to_string(),
            timeframe: "1h".to_string(),
            history_limit: 100,
            check_interval_secs: 60,
            error_backoff_secs: 30,

            ma_short: 7,
            ma_medium: 25,
            ma_long: 50,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,

            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            signal_threshold: 3,

            risk_per_trade: dec!(0.02),   // 2% of free balance
            stop_loss_pct: dec!(0.05),    // 5% below entry
            take_profit_pct: dec!(0.10),  // 10% above entry
            max_open_positions: 5,
            max_total_risk: dec!(0.10),   // 10% of equity

            request_timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl TradingConfig {
    /// Load from a JSON file; missing keys fall back to defaults.
    ///
    /// Not validated here: environment and CLI overrides are layered on top
    /// before [`TradingConfig::validate`] runs.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay settings from process environment variables (after `.env` is
    /// loaded).
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay settings from `lookup`. Unset or blank keys keep the current
    /// value; a value that fails to parse is an error naming the key.
    ///
    /// Keys: TRADING_PAIRS, QUOTE_ASSET, TIMEFRAME, HISTORICAL_PERIODS,
    /// CHECK_INTERVAL, ERROR_BACKOFF, MA_SHORT_PERIOD, MA_MEDIUM_PERIOD,
    /// MA_LONG_PERIOD, RSI_PERIOD, RSI_OVERBOUGHT, RSI_OVERSOLD, MACD_FAST,
    /// MACD_SLOW, MACD_SIGNAL, SIGNAL_THRESHOLD, RISK_PER_TRADE,
    /// STOP_LOSS_PCT, TAKE_PROFIT_PCT, MAX_OPEN_POSITIONS, MAX_TOTAL_RISK,
    /// REQUEST_TIMEOUT, MAX_RETRIES.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(pairs) = get("TRADING_PAIRS") {
            self.trading_pairs = parse_pairs(&pairs);
        }
        if let Some(asset) = get("QUOTE_ASSET") {
            self.quote_asset = asset.to_uppercase();
        }
        if let Some(timeframe) = get("TIMEFRAME") {
            self.timeframe = timeframe;
        }

        overlay(get("HISTORICAL_PERIODS"), "HISTORICAL_PERIODS", &mut self.history_limit)?;
        overlay(get("CHECK_INTERVAL"), "CHECK_INTERVAL", &mut self.check_interval_secs)?;
        overlay(get("ERROR_BACKOFF"), "ERROR_BACKOFF", &mut self.error_backoff_secs)?;

        overlay(get("MA_SHORT_PERIOD"), "MA_SHORT_PERIOD", &mut self.ma_short)?;
        overlay(get("MA_MEDIUM_PERIOD"), "MA_MEDIUM_PERIOD", &mut self.ma_medium)?;
        overlay(get("MA_LONG_PERIOD"), "MA_LONG_PERIOD", &mut self.ma_long)?;
        overlay(get("RSI_PERIOD"), "RSI_PERIOD", &mut self.rsi_period)?;
        overlay(get("RSI_OVERBOUGHT"), "RSI_OVERBOUGHT", &mut self.rsi_overbought)?;
        overlay(get("RSI_OVERSOLD"), "RSI_OVERSOLD", &mut self.rsi_oversold)?;
        overlay(get("MACD_FAST"), "MACD_FAST", &mut self.macd_fast)?;
        overlay(get("MACD_SLOW"), "MACD_SLOW", &mut self.macd_slow)?;
        overlay(get("MACD_SIGNAL"), "MACD_SIGNAL", &mut self.macd_signal)?;
        overlay(get("SIGNAL_THRESHOLD"), "SIGNAL_THRESHOLD", &mut self.signal_threshold)?;

        overlay(get("RISK_PER_TRADE"), "RISK_PER_TRADE", &mut self.risk_per_trade)?;
        overlay(get("STOP_LOSS_PCT"), "STOP_LOSS_PCT", &mut self.stop_loss_pct)?;
        overlay(get("TAKE_PROFIT_PCT"), "TAKE_PROFIT_PCT", &mut self.take_profit_pct)?;
        overlay(get("MAX_OPEN_POSITIONS"), "MAX_OPEN_POSITIONS", &mut self.max_open_positions)?;
        overlay(get("MAX_TOTAL_RISK"), "MAX_TOTAL_RISK", &mut self.max_total_risk)?;

        overlay(get("REQUEST_TIMEOUT"), "REQUEST_TIMEOUT", &mut self.request_timeout_secs)?;
        overlay(get("MAX_RETRIES"), "MAX_RETRIES", &mut self.max_retries)?;

        Ok(())
    }

    /// Reject settings that would break the indicator or risk invariants.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.trading_pairs.is_empty(), "At least one trading pair is required");
        ensure!(
            self.ma_short > 0 && self.ma_short < self.ma_medium && self.ma_medium < self.ma_long,
            "MA periods must satisfy 0 < short < medium < long ({} / {} / {})",
            self.ma_short,
            self.ma_medium,
            self.ma_long
        );
        ensure!(self.rsi_period > 0, "RSI period must be positive");
        ensure!(
            self.macd_fast > 0 && self.macd_fast < self.macd_slow && self.macd_signal > 0,
            "MACD periods must satisfy 0 < fast < slow and signal > 0"
        );
        ensure!(
            self.rsi_oversold < self.rsi_overbought,
            "RSI oversold bound must be below overbought bound"
        );
        ensure!(
            (1..=4).contains(&self.signal_threshold),
            "Signal threshold must be between 1 and 4"
        );
        for (name, value) in [
            ("risk_per_trade", self.risk_per_trade),
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("max_total_risk", self.max_total_risk),
        ] {
            ensure!(
                value > Decimal::ZERO && value < Decimal::ONE,
                "{} must be between 0 and 1 (got {})",
                name,
                value
            );
        }
        ensure!(self.max_open_positions > 0, "max_open_positions must be positive");
        ensure!(
            self.history_limit >= self.indicator_settings().required_lookback(),
            "history_limit {} is shorter than the longest indicator lookback {}",
            self.history_limit,
            self.indicator_settings().required_lookback()
        );
        ensure!(self.check_interval_secs > 0, "check_interval_secs must be positive");
        Ok(())
    }

    pub fn indicator_settings(&self) -> IndicatorSettings {
        IndicatorSettings {
            ma_periods: vec![self.ma_short, self.ma_medium, self.ma_long],
            rsi_period: self.rsi_period,
            macd_fast: self.macd_fast,
            macd_slow: self.macd_slow,
            macd_signal: self.macd_signal,
        }
    }

    pub fn signal_rules(&self) -> SignalRules {
        SignalRules {
            ma_short: self.ma_short,
            ma_medium: self.ma_medium,
            ma_long: self.ma_long,
            rsi_overbought: self.rsi_overbought,
            rsi_oversold: self.rsi_oversold,
            buy_threshold: self.signal_threshold,
            sell_threshold: self.signal_threshold,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            risk_per_trade: self.risk_per_trade,
            max_total_risk: self.max_total_risk,
            max_open_positions: self.max_open_positions,
        }
    }

    pub fn exit_levels(&self) -> ExitLevels {
        ExitLevels {
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
        }
    }
}

/// Exchange symbol for a pair written as "BTC/USDT", "btcusdt" or "BTC-USDT".
pub fn normalize_pair(pair: &str) -> String {
    pair.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Comma-separated pair list; blank entries are dropped.
pub fn parse_pairs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_pair)
        .filter(|p| !p.is_empty())
        .collect()
}

fn overlay<T>(value: Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = value {
        *target = raw
            .parse()
            .map_err(|e| anyhow!("Invalid {} '{}': {}", key, raw, e))?;
    }
    Ok(())
}
