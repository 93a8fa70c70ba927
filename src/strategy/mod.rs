//! Strategy: value math, tier classification, stake sizing, and ranking.

pub mod kelly;
pub mod value;

use std::cmp::Ordering;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::market::MarketBook;
use crate::types::{BetRecommendation, EngineError, MatchKey, OddsQuote, Prediction, RecommendationTier};
use kelly::StakeSizer;
use value::ValueMetrics;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Tier boundaries on edge, plus the confidence gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub min_confidence: f64,
    /// Edge above this is a BUY.
    pub buy_edge: f64,
    /// Edge above this is a STRONG_BUY.
    pub strong_edge: f64,
    /// Edge below this is a SELL.
    pub sell_edge: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl TierThresholds {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            buy_edge: config.edge_threshold,
            strong_edge: config.strong_edge_threshold,
            sell_edge: config.sell_edge_threshold,
        }
    }

    /// Map (confidence, edge) to a tier. The confidence gate wins over
    /// every edge-based tier. Edges in `[sell_edge, 0)` are AVOID.
    pub fn classify(&self, confidence: f64, edge: f64) -> RecommendationTier {
        if confidence < self.min_confidence {
            RecommendationTier::Avoid
        } else if edge > self.strong_edge {
            RecommendationTier::StrongBuy
        } else if edge > self.buy_edge {
            RecommendationTier::Buy
        } else if edge >= 0.0 {
            RecommendationTier::Hold
        } else if edge < self.sell_edge {
            RecommendationTier::Sell
        } else {
            RecommendationTier::Avoid
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Descending by edge, then by expected value.
pub fn compare_recommendations(a: &BetRecommendation, b: &BetRecommendation) -> Ordering {
    b.edge
        .total_cmp(&a.edge)
        .then_with(|| b.expected_value.total_cmp(&a.expected_value))
}

pub fn rank(recommendations: &mut [BetRecommendation]) {
    recommendations.sort_by(compare_recommendations);
}

// ---------------------------------------------------------------------------
// Recommender
// ---------------------------------------------------------------------------

/// A priced quote before it becomes a recommendation.
#[derive(Debug, Clone)]
struct Candidate<'a> {
    quote: &'a OddsQuote,
    metrics: ValueMetrics,
    tier: RecommendationTier,
}

/// Prices every quote in a book against a prediction and keeps one
/// recommendation per outcome.
#[derive(Debug, Clone)]
pub struct Recommender {
    thresholds: TierThresholds,
    sizer: StakeSizer,
}

impl Recommender {
    pub fn new(thresholds: TierThresholds, sizer: StakeSizer) -> Self {
        Self { thresholds, sizer }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(TierThresholds::from_config(config), StakeSizer::from_config(config))
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// One recommendation per outcome that has at least one valid quote,
    /// ranked by edge then expected value.
    ///
    /// Between quotes for the same outcome the best tier wins, then the
    /// highest expected value, then the first bookmaker name.
    pub fn recommend(
        &self,
        key: &MatchKey,
        prediction: &Prediction,
        book: &MarketBook,
    ) -> Result<Vec<BetRecommendation>, EngineError> {
        let mut out = Vec::new();

        for (&outcome, &probability) in &prediction.class_probabilities {
            // Each outcome is gated on its own probability, never above the
            // match-level confidence so the reduced-history haircut holds.
            let confidence = probability.min(prediction.confidence);
            let mut candidates = Vec::new();
            for quote in book.quotes_for(outcome) {
                let metrics = match value::analyze(probability, quote.decimal_odds) {
                    Ok(m) => m,
                    Err(e) if e.is_recoverable() => {
                        debug!(match_key = %key, bookmaker = %quote.bookmaker, error = %e, "Quote skipped");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let tier = self.thresholds.classify(confidence, metrics.edge);
                candidates.push(Candidate { quote, metrics, tier });
            }

            let best = candidates.into_iter().min_by(|a, b| {
                b.tier
                    .rank()
                    .cmp(&a.tier.rank())
                    .then_with(|| b.metrics.expected_value.total_cmp(&a.metrics.expected_value))
                    .then_with(|| a.quote.bookmaker.cmp(&b.quote.bookmaker))
            });

            if let Some(c) = best {
                let stake = self.sizer.size(c.metrics.kelly_fraction);
                out.push(BetRecommendation {
                    match_key: key.clone(),
                    outcome,
                    probability,
                    confidence,
                    bookmaker: c.quote.bookmaker.clone(),
                    decimal_odds: c.quote.decimal_odds,
                    implied_probability: c.metrics.implied_probability,
                    edge: c.metrics.edge,
                    expected_value: c.metrics.expected_value,
                    kelly_fraction: c.metrics.kelly_fraction,
                    stake_fraction: stake.fraction,
                    suggested_stake: stake.amount,
                    tier: c.tier,
                    reduced_history: prediction.reduced_history,
                });
            }
        }

        rank(&mut out);

        if let Some(top) = out.first() {
            info!(
                match_key = %key,
                outcome = %top.outcome,
                tier = %top.tier,
                edge = format!("{:+.1}%", top.edge * 100.0),
                odds = format!("{:.2}", top.decimal_odds),
                bookmaker = %top.bookmaker,
                "Best value"
            );
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
