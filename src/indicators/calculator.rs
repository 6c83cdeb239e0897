//! Moving averages, RSI and MACD over an oldest-first price window.
//!
//! Every function reports only the value for the most recent bar and is a pure
//! function of its input. RSI averages gains and losses with a simple rolling
//! mean; MACD uses exponential averages seeded from the first close.

use statrs::statistics::Statistics;

use crate::error::IndicatorError;
use crate::models::{closes, IndicatorSnapshot, MacdSnapshot, PriceBar};

/// Periods the engine evaluates on every snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSettings {
    pub ma_periods: Vec<usize>,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl IndicatorSettings {
    /// Shortest window for which every configured indicator is defined.
    pub fn required_lookback(&self) -> usize {
        let longest_ma = self.ma_periods.iter().copied().max().unwrap_or(0);
        longest_ma.max(self.rsi_period + 1).max(self.macd_slow)
    }
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            ma_periods: vec![7, 25, 50],
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

/// Calculator for per-cycle indicator snapshots.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    settings: IndicatorSettings,
}

impl IndicatorEngine {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self { settings }
    }

    /// Shortest window for which [`snapshot`](Self::snapshot) succeeds.
    pub fn required_bars(&self) -> usize {
        self.settings.required_lookback()
    }

    /// Compute every configured indicator for the latest bar.
    pub fn snapshot(&self, bars: &[PriceBar]) -> Result<IndicatorSnapshot, IndicatorError> {
        let moving_averages = self
            .settings
            .ma_periods
            .iter()
            .map(|&period| moving_average(bars, period).map(|ma| (period, ma)))
            .collect::<Result<_, _>>()?;

        Ok(IndicatorSnapshot {
            moving_averages,
            rsi: rsi(bars, self.settings.rsi_period)?,
            macd: macd(
                bars,
                self.settings.macd_fast,
                self.settings.macd_slow,
                self.settings.macd_signal,
            )?,
        })
    }
}

fn ensure_len(bars: &[PriceBar], required: usize) -> Result<(), IndicatorError> {
    if bars.len() < required {
        return Err(IndicatorError::InsufficientData {
            required,
            available: bars.len(),
        });
    }
    Ok(())
}

/// Arithmetic mean of the last `period` closes.
pub fn moving_average(bars: &[PriceBar], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod);
    }
    ensure_len(bars, period)?;

    let window = &bars[bars.len() - period..];
    Ok(window.iter().map(|b| b.close).mean())
}

/// Relative Strength Index over the last `period` price changes.
///
/// RSI = 100 - 100 / (1 + avg_gain / avg_loss), with both averages taken as a
/// simple mean over the window. A window without losses saturates at 100.
pub fn rsi(bars: &[PriceBar], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod);
    }
    ensure_len(bars, period + 1)?;

    let window = &bars[bars.len() - period - 1..];
    let (gains, losses) = window
        .windows(2)
        .map(|pair| pair[1].close - pair[0].close)
        .fold((0.0, 0.0), |(g, l), delta| {
            (g + delta.max(0.0), l + (-delta).max(0.0))
        });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Ok(100.0);
    }

    let rs = avg_gain / avg_loss;
    Ok(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line, signal line and histogram for the latest bar.
///
/// Needs at least `slow` bars.
pub fn macd(
    bars: &[PriceBar],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<MacdSnapshot, IndicatorError> {
    if fast == 0 || slow == 0 || signal == 0 {
        return Err(IndicatorError::InvalidPeriod);
    }
    ensure_len(bars, slow.max(fast))?;

    let values = closes(bars);
    let ema_fast = ema_series(&values, fast);
    let ema_slow = ema_series(&values, slow);

    let macd_series: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_series = ema_series(&macd_series, signal);

    // Both series have the same non-zero length as `values`.
    let macd_line = macd_series[macd_series.len() - 1];
    let signal_line = signal_series[signal_series.len() - 1];

    Ok(MacdSnapshot {
        macd_line,
        signal_line,
        histogram: macd_line - signal_line,
    })
}

/// Exponential moving average with alpha = 2 / (span + 1), seeded from the
/// first value.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = None;

    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{bars_from_closes, uptrend};

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_moving_average() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_close(moving_average(&bars, 3).unwrap(), 4.0);
        assert_close(moving_average(&bars, 5).unwrap(), 3.0);
    }

    #[test]
    fn test_moving_average_insufficient_data() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        assert_eq!(
            moving_average(&bars, 7),
            Err(IndicatorError::InsufficientData {
                required: 7,
                available: 3
            })
        );
        assert_eq!(moving_average(&bars, 0), Err(IndicatorError::InvalidPeriod));
    }

    #[test]
    fn test_rsi_balanced_moves() {
        // +1, -1, +1, -1 over four changes
        let bars = bars_from_closes(&[1.0, 2.0, 1.0, 2.0, 1.0]);
        assert_close(rsi(&bars, 4).unwrap(), 50.0);
    }

    #[test]
    fn test_rsi_uses_simple_mean_of_window_only() {
        // Early crash is outside the 3-change window: +1, +1, -1 → RS = 2
        let bars = bars_from_closes(&[50.0, 10.0, 11.0, 12.0, 11.0]);
        assert_close(rsi(&bars, 3).unwrap(), 100.0 - 100.0 / 3.0);
    }

    #[test]
    fn test_rsi_saturates_without_losses() {
        let rising = bars_from_closes(&[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(rsi(&rising, 3).unwrap(), 100.0);

        let flat = bars_from_closes(&[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(rsi(&flat, 3).unwrap(), 100.0);
    }

    #[test]
    fn test_rsi_zero_without_gains() {
        let falling = bars_from_closes(&[13.0, 12.0, 11.0, 10.0]);
        assert_eq!(rsi(&falling, 3).unwrap(), 0.0);
    }

    #[test]
    fn test_rsi_bounded() {
        // Deterministic pseudo-random walk
        let mut seed: u64 = 42;
        let mut price = 100.0;
        let mut series = Vec::new();
        for _ in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((seed >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            price = (price + step * 4.0).max(1.0);
            series.push(price);
        }
        let bars = bars_from_closes(&series);

        for end in 15..=bars.len() {
            let value = rsi(&bars[..end], 14).unwrap();
            assert!((0.0..=100.0).contains(&value), "rsi out of range: {}", value);
        }
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let bars = bars_from_closes(&[1.0; 14]);
        assert!(matches!(
            rsi(&bars, 14),
            Err(IndicatorError::InsufficientData { required: 15, .. })
        ));
    }

    #[test]
    fn test_ema_seeded_from_first_value() {
        // span 3 → alpha 0.5
        let ema = ema_series(&[1.0, 2.0, 3.0], 3);
        assert_eq!(ema, vec![1.0, 1.5, 2.25]);
        assert!(ema_series(&[], 3).is_empty());
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let bars = bars_from_closes(&[50.0; 40]);
        let m = macd(&bars, 12, 26, 9).unwrap();
        assert_close(m.macd_line, 0.0);
        assert_close(m.signal_line, 0.0);
        assert_close(m.histogram, 0.0);
    }

    #[test]
    fn test_macd_rising_series() {
        let series: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let m = macd(&bars_from_closes(&series), 12, 26, 9).unwrap();
        assert!(m.macd_line > 0.0);
        assert!(m.macd_line > m.signal_line);
        assert_close(m.histogram, m.macd_line - m.signal_line);
    }

    #[test]
    fn test_macd_insufficient_data() {
        let bars = bars_from_closes(&[1.0; 20]);
        assert!(matches!(
            macd(&bars, 12, 26, 9),
            Err(IndicatorError::InsufficientData { required: 26, .. })
        ));
    }

    #[test]
    fn test_snapshot() {
        let engine = IndicatorEngine::new(IndicatorSettings::default());
        assert_eq!(engine.required_bars(), 50);

        let bars = uptrend(60);
        let snap = engine.snapshot(&bars).unwrap();
        assert_eq!(snap.moving_averages.len(), 3);
        assert!(snap.ma(7).unwrap() > snap.ma(25).unwrap());
        assert!(snap.ma(25).unwrap() > snap.ma(50).unwrap());

        assert!(engine.snapshot(&bars[..49]).is_err());
    }
}
