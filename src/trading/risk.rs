//! Fixed fractional position sizing and the aggregate risk gate.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PositionError, SizingError};

/// Per-trade and portfolio-level risk settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Fraction of free balance risked on one trade
    pub risk_per_trade: Decimal,

    /// Ceiling on committed risk as a fraction of equity
    pub max_total_risk: Decimal,

    /// Maximum number of concurrently open positions
    pub max_open_positions: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            risk_per_trade: dec!(0.02),
            max_total_risk: dec!(0.10),
            max_open_positions: 5,
        }
    }
}

/// Size and risk of a proposed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedEntry {
    /// Quantity in base asset
    pub size: Decimal,

    /// Amount lost if the stop fills (balance * risk_per_trade)
    pub risk_amount: Decimal,
}

/// Calculator for position sizes and the committed-risk ceiling.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Fixed fractional sizing.
    ///
    /// risk_amount = balance * risk_per_trade
    /// size        = risk_amount / |entry - stop|
    pub fn position_size(
        &self,
        free_balance: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
    ) -> Result<SizedEntry, SizingError> {
        let risk_per_unit = (entry_price - stop_price).abs();
        if risk_per_unit.is_zero() {
            return Err(SizingError::ZeroRiskUnit);
        }

        let risk_amount = free_balance * self.limits.risk_per_trade;
        if risk_amount <= Decimal::ZERO {
            return Err(SizingError::InsufficientFunds(free_balance));
        }

        let size = risk_amount / risk_per_unit;
        debug!(
            balance = %free_balance,
            risk_amount = %risk_amount,
            risk_per_unit = %risk_per_unit,
            size = %size,
            "Position sized"
        );

        Ok(SizedEntry { size, risk_amount })
    }

    /// Admit a new position only if the position count stays under its cap and
    /// existing risk plus the new risk stays within `max_total_risk * equity`.
    pub fn check_new_position(
        &self,
        open_risks: &[Decimal],
        new_risk: Decimal,
        equity: Decimal,
    ) -> Result<(), PositionError> {
        if open_risks.len() >= self.limits.max_open_positions {
            return Err(PositionError::TooManyPositions {
                open: open_risks.len(),
                max: self.limits.max_open_positions,
            });
        }

        let current: Decimal = open_risks.iter().copied().sum();
        let ceiling = equity * self.limits.max_total_risk;
        if current + new_risk > ceiling {
            return Err(PositionError::RiskLimitExceeded {
                current,
                proposed: new_risk,
                ceiling,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default())
    }

    #[test]
    fn test_fixed_fraction_sizing() {
        let sized = manager()
            .position_size(dec!(10000), dec!(100), dec!(95))
            .unwrap();

        // 2% of 10k = 200 at risk, 5 per unit
        assert_eq!(sized.risk_amount, dec!(200));
        assert_eq!(sized.size, dec!(40));
    }

    #[test]
    fn test_size_times_unit_risk_matches_budget() {
        let risk = manager();
        let cases = [
            (dec!(1234.56), dec!(101.37), dec!(96.3015)),
            (dec!(50), dec!(0.4521), dec!(0.429495)),
            (dec!(987654.321), dec!(64000), dec!(60800)),
            (dec!(700), dec!(3), dec!(7)),
        ];

        for (balance, entry, stop) in cases {
            let sized = risk.position_size(balance, entry, stop).unwrap();
            let realized = sized.size * (entry - stop).abs();
            let expected = balance * dec!(0.02);
            assert!(
                (realized - expected).abs() < dec!(0.000001),
                "{} vs {}",
                realized,
                expected
            );
        }
    }

    #[test]
    fn test_zero_risk_unit() {
        assert_eq!(
            manager().position_size(dec!(10000), dec!(100), dec!(100)),
            Err(SizingError::ZeroRiskUnit)
        );
    }

    #[test]
    fn test_empty_balance() {
        assert_eq!(
            manager().position_size(Decimal::ZERO, dec!(100), dec!(95)),
            Err(SizingError::InsufficientFunds(Decimal::ZERO))
        );
    }

    #[test]
    fn test_aggregate_risk_gate() {
        let risk = manager();
        let equity = dec!(10000); // ceiling 1000

        // 400 + 400 + 200 = 1000 is exactly at the ceiling
        assert!(risk
            .check_new_position(&[dec!(400), dec!(400)], dec!(200), equity)
            .is_ok());

        let err = risk
            .check_new_position(&[dec!(400), dec!(400)], dec!(200.01), equity)
            .unwrap_err();
        assert_eq!(
            err,
            PositionError::RiskLimitExceeded {
                current: dec!(800),
                proposed: dec!(200.01),
                ceiling: dec!(1000),
            }
        );

        assert!(risk.check_new_position(&[], dec!(1000), equity).is_ok());
        assert!(risk.check_new_position(&[], dec!(1001), equity).is_err());
    }

    #[test]
    fn test_position_count_cap() {
        let risk = RiskManager::new(RiskLimits {
            max_open_positions: 2,
            ..Default::default()
        });

        let err = risk
            .check_new_position(&[dec!(1), dec!(1)], dec!(1), dec!(10000))
            .unwrap_err();
        assert_eq!(err, PositionError::TooManyPositions { open: 2, max: 2 });
    }
}
