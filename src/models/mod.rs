//! Data models for price bars, analyses, positions, and closed trades.

mod analysis;
mod bar;
mod position;
mod trade;

pub use analysis::{IndicatorSnapshot, MacdBias, MacdSnapshot, RsiZone, Signal, Trend, TrendAnalysis};
pub use bar::{closes, PriceBar};
pub use position::Position;
pub use trade::{ClosedTrade, ExitReason, OrderSide};

#[cfg(test)]
pub(crate) use bar::fixtures;
#[cfg(test)]
pub(crate) use position::sample_position;
