//! Trading logic: signal scoring, risk limits, position lifecycle, performance.

mod config;
mod performance;
mod positions;
mod risk;
mod signal;

pub use config::{normalize_pair, parse_pairs, TradingConfig};
pub use performance::{PerformanceStats, PerformanceTracker};
pub use positions::{ExitLevels, PositionBook, PositionManager, PositionReport};
pub use risk::{RiskLimits, RiskManager, SizedEntry};
pub use signal::{classify_trend, MaTriple, Score, SignalRules, SignalScorer, TrendAnalyzer};
