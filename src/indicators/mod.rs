//! Technical indicators computed from price history.

mod calculator;

pub use calculator::{ema_series, macd, moving_average, rsi, IndicatorEngine, IndicatorSettings};
