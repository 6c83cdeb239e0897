//! Trend classification and buy/sell scoring.
//!
//! Four bullish and four bearish conditions are counted independently:
//! - Trend: UPTREND / DOWNTREND from the strict ordering of short, medium and
//!   long moving averages
//! - Price above / below the short moving average
//! - RSI below the overbought bound / above the oversold bound
//! - MACD line above / below its signal line
//!
//! BUY is checked before SELL, so at most one of them can be emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IndicatorError;
use crate::indicators::IndicatorEngine;
use crate::models::{
    IndicatorSnapshot, MacdSnapshot, PriceBar, RsiZone, Signal, Trend, TrendAnalysis,
};

/// Thresholds for trend and signal decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRules {
    pub ma_short: usize,
    pub ma_medium: usize,
    pub ma_long: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub buy_threshold: u8,
    pub sell_threshold: u8,
}

impl Default for SignalRules {
    fn default() -> Self {
        Self {
            ma_short: 7,
            ma_medium: 25,
            ma_long: 50,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            buy_threshold: 3,
            sell_threshold: 3,
        }
    }
}

/// Moving averages used for trend classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaTriple {
    pub short: f64,
    pub medium: f64,
    pub long: f64,
}

/// Scores for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub trend: Trend,
    pub buy_score: u8,
    pub sell_score: u8,
    pub signal: Signal,
}

/// Classify the trend from strictly ordered moving averages.
pub fn classify_trend(ma: MaTriple) -> Trend {
    if ma.short > ma.medium && ma.medium > ma.long {
        Trend::Uptrend
    } else if ma.short < ma.medium && ma.medium < ma.long {
        Trend::Downtrend
    } else {
        Trend::Sideways
    }
}

fn count(conditions: &[bool]) -> u8 {
    conditions.iter().filter(|&&c| c).count() as u8
}

/// Deterministic scorer for trend, buy/sell scores and the final signal.
#[derive(Debug, Clone)]
pub struct SignalScorer {
    rules: SignalRules,
}

impl SignalScorer {
    pub fn new(rules: SignalRules) -> Self {
        Self { rules }
    }

    pub fn score(&self, current_price: f64, ma: MaTriple, rsi: f64, macd: &MacdSnapshot) -> Score {
        let trend = classify_trend(ma);

        let buy_score = count(&[
            trend == Trend::Uptrend,
            current_price > ma.short,
            rsi < self.rules.rsi_overbought,
            macd.macd_line > macd.signal_line,
        ]);

        let sell_score = count(&[
            trend == Trend::Downtrend,
            current_price < ma.short,
            rsi > self.rules.rsi_oversold,
            macd.macd_line < macd.signal_line,
        ]);

        let signal = if buy_score >= self.rules.buy_threshold {
            Signal::Buy
        } else if sell_score >= self.rules.sell_threshold {
            Signal::Sell
        } else {
            Signal::Hold
        };

        Score {
            trend,
            buy_score,
            sell_score,
            signal,
        }
    }

    pub fn rsi_zone(&self, rsi: f64) -> RsiZone {
        if rsi > self.rules.rsi_overbought {
            RsiZone::Overbought
        } else if rsi < self.rules.rsi_oversold {
            RsiZone::Oversold
        } else {
            RsiZone::Neutral
        }
    }

    fn ma_triple(&self, snapshot: &IndicatorSnapshot) -> Option<MaTriple> {
        Some(MaTriple {
            short: snapshot.ma(self.rules.ma_short)?,
            medium: snapshot.ma(self.rules.ma_medium)?,
            long: snapshot.ma(self.rules.ma_long)?,
        })
    }
}

/// Indicator engine and scorer combined into a per-symbol analysis.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    engine: IndicatorEngine,
    scorer: SignalScorer,
}

impl TrendAnalyzer {
    pub fn new(engine: IndicatorEngine, scorer: SignalScorer) -> Self {
        Self { engine, scorer }
    }

    pub fn scorer(&self) -> &SignalScorer {
        &self.scorer
    }

    /// Analyze the latest bar of `bars`. The current price is the last close.
    pub fn analyze(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        now: DateTime<Utc>,
    ) -> Result<TrendAnalysis, IndicatorError> {
        let last = bars.last().ok_or(IndicatorError::InsufficientData {
            required: self.engine.required_bars(),
            available: 0,
        })?;
        let indicators = self.engine.snapshot(bars)?;

        // The engine computes every configured MA period, the rules name three of them.
        let ma = self
            .scorer
            .ma_triple(&indicators)
            .ok_or(IndicatorError::InvalidPeriod)?;
        let score = self.scorer.score(last.close, ma, indicators.rsi, &indicators.macd);

        debug!(
            symbol = %symbol,
            price = last.close,
            trend = %score.trend,
            rsi = indicators.rsi,
            buy = score.buy_score,
            sell = score.sell_score,
            signal = %score.signal,
            "Analysis complete"
        );

        Ok(TrendAnalysis {
            symbol: symbol.to_string(),
            current_price: last.close,
            trend: score.trend,
            indicators,
            buy_score: score.buy_score,
            sell_score: score.sell_score,
            signal: score.signal,
            analyzed_at: now,
        })
    }
}
