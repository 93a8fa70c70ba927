//! Fractional Kelly stake sizing.
//!
//! Turns a clamped Kelly fraction into a bankroll fraction and a stake
//! using a configurable multiplier and a per-bet cap.

use tracing::debug;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Stake sizing parameters.
#[derive(Debug, Clone)]
pub struct StakeSizer {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub multiplier: f64,
    /// Maximum stake as a fraction of bankroll.
    pub max_fraction: f64,
    pub bankroll: f64,
}

impl Default for StakeSizer {
    fn default() -> Self {
        Self {
            multiplier: 0.25,
            max_fraction: 0.05,
            bankroll: 1000.0,
        }
    }
}

/// A sized stake for one recommendation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stake {
    /// After multiplier and cap.
    pub fraction: f64,
    pub amount: f64,
}

impl StakeSizer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            multiplier: config.kelly_multiplier,
            max_fraction: config.max_stake_fraction,
            bankroll: config.bankroll,
        }
    }

    /// Size a stake from a raw Kelly fraction already clamped to [0, 1].
    pub fn size(&self, kelly_fraction: f64) -> Stake {
        if kelly_fraction <= 0.0 || self.bankroll <= 0.0 {
            return Stake { fraction: 0.0, amount: 0.0 };
        }

        let fraction = (kelly_fraction * self.multiplier).clamp(0.0, self.max_fraction);
        let amount = fraction * self.bankroll;

        debug!(
            raw_kelly = format!("{:.2}%", kelly_fraction * 100.0),
            fraction = format!("{:.2}%", fraction * 100.0),
            amount = format!("{:.2}", amount),
            "Stake sized"
        );

        Stake { fraction, amount }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_kelly_under_cap() {
        let sizer = StakeSizer { multiplier: 0.25, max_fraction: 0.10, bankroll: 1000.0 };
        let stake = sizer.size(0.20);
        assert!((stake.fraction - 0.05).abs() < 1e-12);
        assert!((stake.amount - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_stake_capped_at_max_fraction() {
        let sizer = StakeSizer { multiplier: 1.0, max_fraction: 0.05, bankroll: 1000.0 };
        let stake = sizer.size(0.60);
        assert_eq!(stake.fraction, 0.05);
        assert!((stake.amount - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_stake_without_kelly() {
        let stake = StakeSizer::default().size(0.0);
        assert_eq!(stake, Stake { fraction: 0.0, amount: 0.0 });
    }

    #[test]
    fn test_no_stake_with_empty_bankroll() {
        let sizer = StakeSizer { bankroll: 0.0, ..Default::default() };
        assert_eq!(sizer.size(0.3).amount, 0.0);
        let negative = StakeSizer { bankroll: -50.0, ..Default::default() };
        assert_eq!(negative.size(0.3).amount, 0.0);
    }

    #[test]
    fn test_quarter_is_smaller_than_half() {
        let quarter = StakeSizer { multiplier: 0.25, max_fraction: 0.5, bankroll: 1000.0 };
        let half = StakeSizer { multiplier: 0.5, max_fraction: 0.5, bankroll: 1000.0 };
        assert!(quarter.size(0.3).amount < half.size(0.3).amount);
    }

    #[test]
    fn test_from_config() {
        let sizer = StakeSizer::from_config(&EngineConfig::default());
        assert_eq!(sizer.multiplier, 0.25);
        assert_eq!(sizer.max_fraction, 0.05);
        assert_eq!(sizer.bankroll, 1000.0);
    }
}
