//! Value math for a single (probability, odds) pair.
//!
//! Pure functions, no I/O. Odds are decimal and must exceed 1.0;
//! probabilities must lie in [0, 1].

use crate::types::EngineError;

/// Per-quote metrics at unit stake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueMetrics {
    pub implied_probability: f64,
    pub edge: f64,
    pub expected_value: f64,
    pub kelly_fraction: f64,
}

fn check_odds(decimal_odds: f64) -> Result<(), EngineError> {
    if !decimal_odds.is_finite() || decimal_odds <= 1.0 {
        return Err(EngineError::InvalidOdds { odds: decimal_odds });
    }
    Ok(())
}

fn check_probability(p: f64) -> Result<(), EngineError> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(EngineError::InvalidProbability { value: p });
    }
    Ok(())
}

/// Probability the price implies: `1 / o`.
pub fn implied_probability(decimal_odds: f64) -> Result<f64, EngineError> {
    check_odds(decimal_odds)?;
    Ok(1.0 / decimal_odds)
}

/// Model probability minus implied probability.
pub fn edge(model_probability: f64, implied_probability: f64) -> Result<f64, EngineError> {
    check_probability(model_probability)?;
    check_probability(implied_probability)?;
    Ok(model_probability - implied_probability)
}

/// `p(o − 1)·stake − (1 − p)·stake`.
pub fn expected_value(model_probability: f64, decimal_odds: f64, stake: f64) -> Result<f64, EngineError> {
    check_probability(model_probability)?;
    check_odds(decimal_odds)?;
    Ok(model_probability * (decimal_odds - 1.0) * stake - (1.0 - model_probability) * stake)
}

/// Kelly fraction `(p·o − 1) / (o − 1)`, clamped to [0, 1].
///
/// Negative Kelly means no bet, never a short position.
pub fn kelly_fraction(model_probability: f64, decimal_odds: f64) -> Result<f64, EngineError> {
    check_probability(model_probability)?;
    check_odds(decimal_odds)?;
    let raw = (model_probability * decimal_odds - 1.0) / (decimal_odds - 1.0);
    Ok(raw.clamp(0.0, 1.0))
}

/// All four metrics for one quote.
pub fn analyze(model_probability: f64, decimal_odds: f64) -> Result<ValueMetrics, EngineError> {
    let implied = implied_probability(decimal_odds)?;
    Ok(ValueMetrics {
        implied_probability: implied,
        edge: edge(model_probability, implied)?,
        expected_value: expected_value(model_probability, decimal_odds, 1.0)?,
        kelly_fraction: kelly_fraction(model_probability, decimal_odds)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
