//! Error kinds for the trading core.
//!
//! Exchange failures are split into data fetch failures (the symbol's cycle is
//! skipped) and order rejections (entry fails closed, exit leaves the position
//! open). Lifecycle errors carry enough detail for the caller to tell a benign
//! skip from a real failure.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failure reported by the exchange collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// History, balance, ticker or order status could not be fetched.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// An order submission or cancellation was refused.
    #[error("order rejected: {0}")]
    OrderRejected(String),
}

/// Failure computing an indicator from a price window.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("indicator period must be at least 1")]
    InvalidPeriod,

    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },
}

/// Position sizing could not produce a positive size.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SizingError {
    #[error("entry price equals stop price")]
    ZeroRiskUnit,

    #[error("insufficient funds: free balance {0}")]
    InsufficientFunds(Decimal),
}

/// Failure of an open/close operation on the position table.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PositionError {
    #[error("position already open for {0}")]
    AlreadyOpen(String),

    #[error("no open position for {0}")]
    NotOpen(String),

    #[error("entry requires a BUY signal")]
    NotBuySignal,

    #[error("RSI {rsi:.2} is at or above the overbought ceiling {ceiling}")]
    Overbought { rsi: f64, ceiling: f64 },

    #[error("exit requires a SELL signal with RSI above {floor} (RSI {rsi:.2})")]
    ExitConditionNotMet { rsi: f64, floor: f64 },

    #[error("open position limit reached: {open} >= {max}")]
    TooManyPositions { open: usize, max: usize },

    #[error("risk limit exceeded: {current} + {proposed} > {ceiling}")]
    RiskLimitExceeded {
        current: Decimal,
        proposed: Decimal,
        ceiling: Decimal,
    },

    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error("invalid price {0}")]
    InvalidPrice(f64),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl PositionError {
    /// Skips are expected outcomes of the entry rules and log at warn level.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            PositionError::Sizing(_)
                | PositionError::TooManyPositions { .. }
                | PositionError::RiskLimitExceeded { .. }
                | PositionError::Overbought { .. }
        )
    }

    /// Precondition failures happen before any exchange call is made.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PositionError::AlreadyOpen(_)
                | PositionError::NotOpen(_)
                | PositionError::NotBuySignal
                | PositionError::Overbought { .. }
                | PositionError::ExitConditionNotMet { .. }
        )
    }
}
