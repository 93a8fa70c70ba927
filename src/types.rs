//! Shared types for the value-bet engine.
//!
//! These types form the data model passed between the source adapters,
//! the fusion step, feature extraction, prediction, pricing, and the
//! orchestrator. Keeping them in one place lets every stage depend on
//! them without depending on each other.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    /// Static historical table (CSV).
    Historical,
    /// Live odds feed listing upcoming events.
    LiveOdds,
    /// Live fixtures/results API.
    LiveFixtures,
}

impl SourceKind {
    /// Merge precedence when two records were fetched at the same instant.
    /// Higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::LiveFixtures => 3,
            SourceKind::LiveOdds => 2,
            SourceKind::Historical => 1,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Historical => write!(f, "historical"),
            SourceKind::LiveOdds => write!(f, "live-odds"),
            SourceKind::LiveFixtures => write!(f, "live-fixtures"),
        }
    }
}

/// Which source supplied a given field, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

/// Dedup key for match records.
///
/// Field order matters: the derived `Ord` sorts by date first, which is
/// what the fusion output ordering relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub date: NaiveDate,
    pub league: String,
    pub home: String,
    pub away: String,
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {} ({}, {})", self.home, self.away, self.league, self.date)
    }
}

/// One match as reported by one source, or the fused result of several.
///
/// Statistical fields are optional: each source fills what it knows and
/// fusion combines them field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub home_team: String,
    pub away_team: String,
    pub date: NaiveDate,
    pub league: String,
    pub sport: String,

    pub status: Option<MatchStatus>,
    /// API-Sports fixture id.
    pub fixture_id: Option<u64>,
    /// The Odds API event id.
    pub odds_event_id: Option<String>,

    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub home_shots: Option<u32>,
    pub away_shots: Option<u32>,
    pub home_shots_on_target: Option<u32>,
    pub away_shots_on_target: Option<u32>,
    /// Possession, 0–100.
    pub home_possession: Option<f64>,
    pub away_possession: Option<f64>,
    /// Recent form as reported by the source, newest last (e.g. "WDLWW").
    pub home_form: Option<String>,
    pub away_form: Option<String>,

    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
    /// Per-field provenance after fusion. Empty on adapter output.
    #[serde(default)]
    pub provenance: BTreeMap<String, Provenance>,
}

impl MatchRecord {
    /// A record with identity only; every statistical field is unset.
    pub fn new(
        home_team: impl Into<String>,
        away_team: impl Into<String>,
        date: NaiveDate,
        league: impl Into<String>,
        sport: impl Into<String>,
        source: SourceKind,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            home_team: home_team.into(),
            away_team: away_team.into(),
            date,
            league: league.into(),
            sport: sport.into(),
            status: None,
            fixture_id: None,
            odds_event_id: None,
            home_goals: None,
            away_goals: None,
            home_shots: None,
            away_shots: None,
            home_shots_on_target: None,
            away_shots_on_target: None,
            home_possession: None,
            away_possession: None,
            home_form: None,
            away_form: None,
            source,
            fetched_at,
            provenance: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> MatchKey {
        MatchKey {
            date: self.date,
            league: self.league.to_lowercase(),
            home: self.home_team.clone(),
            away: self.away_team.clone(),
        }
    }

    /// Both final scores are known.
    pub fn is_completed(&self) -> bool {
        self.home_goals.is_some() && self.away_goals.is_some()
    }

    /// Full-time result, if the match is completed.
    pub fn result(&self) -> Option<Outcome> {
        match (self.home_goals, self.away_goals) {
            (Some(h), Some(a)) if h > a => Some(Outcome::Home),
            (Some(h), Some(a)) if h < a => Some(Outcome::Away),
            (Some(_), Some(_)) => Some(Outcome::Draw),
            _ => None,
        }
    }

    /// Whether `team` played in this match.
    pub fn involves(&self, team: &str) -> bool {
        self.home_team == team || self.away_team == team
    }
}

impl fmt::Display for MatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.home_goals, self.away_goals) {
            (Some(h), Some(a)) => write!(
                f,
                "{} {h}-{a} {} [{} {}]",
                self.home_team, self.away_team, self.league, self.date
            ),
            _ => write!(
                f,
                "{} vs {} [{} {}]",
                self.home_team, self.away_team, self.league, self.date
            ),
        }
    }
}

/// Trailing-window aggregates for one team, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStatistics {
    pub team: String,
    pub matches_played: usize,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    /// Consecutive wins ending at the most recent match in the window.
    pub win_streak: u32,
    pub shots_on_target: u32,
    /// Mean possession over matches that reported it.
    pub avg_possession: Option<f64>,
    /// Tally against the opponent in the fixture being predicted.
    pub head_to_head: HeadToHead,
}

impl TeamStatistics {
    /// Points per game (3 for a win, 1 for a draw).
    pub fn form(&self) -> f64 {
        if self.matches_played == 0 {
            return 0.0;
        }
        f64::from(self.wins * 3 + self.draws) / self.matches_played as f64
    }

    pub fn goals_for_per_game(&self) -> f64 {
        per_game(self.goals_for, self.matches_played)
    }

    pub fn goals_against_per_game(&self) -> f64 {
        per_game(self.goals_against, self.matches_played)
    }

    /// Goals per shot on target; 0 when no shots on target were recorded.
    pub fn conversion(&self) -> f64 {
        if self.shots_on_target == 0 {
            0.0
        } else {
            f64::from(self.goals_for) / f64::from(self.shots_on_target)
        }
    }
}

fn per_game(total: u32, played: usize) -> f64 {
    if played == 0 {
        0.0
    } else {
        f64::from(total) / played as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadToHead {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl HeadToHead {
    pub fn meetings(&self) -> u32 {
        self.wins + self.draws + self.losses
    }
}

// ---------------------------------------------------------------------------
// Features & predictions
// ---------------------------------------------------------------------------

/// Ordered model inputs. The arity is checked on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>, expected_arity: usize) -> Result<Self, EngineError> {
        if values.len() != expected_arity {
            return Err(EngineError::InvalidFeatureVector {
                expected: expected_arity,
                actual: values.len(),
            });
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::InvalidFeatureValue { index: pos });
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Match outcome classes (1X2 market).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Home => write!(f, "HOME"),
            Outcome::Draw => write!(f, "DRAW"),
            Outcome::Away => write!(f, "AWAY"),
        }
    }
}

/// Class probabilities as returned by a classifier.
pub type ClassProbabilities = BTreeMap<Outcome, f64>;

/// Model output for one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_probabilities: ClassProbabilities,
    /// Most likely outcome.
    pub outcome: Outcome,
    /// Probability of `outcome`.
    pub probability: f64,
    /// 0.0–1.0, lowered when the feature window was short.
    pub confidence: f64,
    pub reduced_history: bool,
}

impl Prediction {
    pub fn probability_of(&self, outcome: Outcome) -> f64 {
        self.class_probabilities.get(&outcome).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// A bookmaker price in its native format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OddsPrice {
    Decimal(f64),
    /// Moneyline, e.g. +150 or -200.
    American(f64),
    Fractional { numerator: f64, denominator: f64 },
}

impl OddsPrice {
    /// Convert to decimal odds. Anything at or below 1.0 is a degenerate
    /// market and is rejected.
    pub fn to_decimal(&self) -> Result<f64, EngineError> {
        let decimal = match *self {
            OddsPrice::Decimal(o) => o,
            OddsPrice::American(a) if a >= 100.0 => 1.0 + a / 100.0,
            OddsPrice::American(a) if a <= -100.0 => 1.0 + 100.0 / a.abs(),
            OddsPrice::American(a) => return Err(EngineError::InvalidOdds { odds: a }),
            OddsPrice::Fractional { numerator, denominator } => {
                if denominator <= 0.0 || numerator < 0.0 {
                    return Err(EngineError::InvalidOdds { odds: numerator });
                }
                1.0 + numerator / denominator
            }
        };
        if !decimal.is_finite() || decimal <= 1.0 {
            return Err(EngineError::InvalidOdds { odds: decimal });
        }
        Ok(decimal)
    }
}

impl fmt::Display for OddsPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OddsPrice::Decimal(o) => write!(f, "{o:.2}"),
            OddsPrice::American(a) if *a > 0.0 => write!(f, "+{a:.0}"),
            OddsPrice::American(a) => write!(f, "{a:.0}"),
            OddsPrice::Fractional { numerator, denominator } => {
                write!(f, "{numerator}/{denominator}")
            }
        }
    }
}

/// A quote as received from an odds feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub bookmaker: String,
    pub outcome: Outcome,
    pub price: OddsPrice,
    pub fetched_at: DateTime<Utc>,
}

/// A normalized quote: decimal odds, always > 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub bookmaker: String,
    pub outcome: Outcome,
    pub decimal_odds: f64,
    pub fetched_at: DateTime<Utc>,
}

impl TryFrom<&RawQuote> for OddsQuote {
    type Error = EngineError;

    fn try_from(raw: &RawQuote) -> Result<Self, Self::Error> {
        Ok(OddsQuote {
            bookmaker: raw.bookmaker.clone(),
            outcome: raw.outcome,
            decimal_odds: raw.price.to_decimal()?,
            fetched_at: raw.fetched_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationTier {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    Avoid,
}

impl RecommendationTier {
    /// Ordering used when picking between quotes: higher is better.
    pub fn rank(&self) -> u8 {
        match self {
            RecommendationTier::StrongBuy => 4,
            RecommendationTier::Buy => 3,
            RecommendationTier::Hold => 2,
            RecommendationTier::Sell => 1,
            RecommendationTier::Avoid => 0,
        }
    }
}

impl fmt::Display for RecommendationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationTier::StrongBuy => write!(f, "STRONG_BUY"),
            RecommendationTier::Buy => write!(f, "BUY"),
            RecommendationTier::Hold => write!(f, "HOLD"),
            RecommendationTier::Sell => write!(f, "SELL"),
            RecommendationTier::Avoid => write!(f, "AVOID"),
        }
    }
}

/// One priced and classified (match, outcome) pair. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecommendation {
    pub match_key: MatchKey,
    pub outcome: Outcome,
    pub probability: f64,
    pub confidence: f64,
    pub bookmaker: String,
    pub decimal_odds: f64,
    pub implied_probability: f64,
    pub edge: f64,
    pub expected_value: f64,
    pub kelly_fraction: f64,
    /// Kelly after the fractional multiplier and cap.
    pub stake_fraction: f64,
    pub suggested_stake: f64,
    pub tier: RecommendationTier,
    pub reduced_history: bool,
}

impl fmt::Display for BetRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} -> {} @ {:.2} ({}) | p={:.1}% edge={:+.1}% EV={:+.3}",
            self.tier,
            self.match_key,
            self.outcome,
            self.decimal_odds,
            self.bookmaker,
            self.probability * 100.0,
            self.edge * 100.0,
            self.expected_value,
        )
    }
}

/// Whether pricing was possible for a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Priced { quotes: usize },
    NoMarketData,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Engine error taxonomy.
///
/// Row- and quote-level variants are normally absorbed into counters by
/// the component that sees them; request-level variants abort one
/// pipeline run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Source unavailable ({key}) after {attempts} attempts: {message}")]
    SourceUnavailable {
        key: String,
        attempts: u32,
        message: String,
    },

    #[error("Malformed record from {source_name}: {reason}")]
    MalformedRecord { source_name: String, reason: String },

    #[error("Invalid feature vector: expected {expected} values, got {actual}")]
    InvalidFeatureVector { expected: usize, actual: usize },

    #[error("Invalid feature vector: non-finite value at index {index}")]
    InvalidFeatureValue { index: usize },

    #[error("Invalid odds: {odds} (decimal odds must exceed 1.0)")]
    InvalidOdds { odds: f64 },

    #[error("Invalid probability: {value} (must be within [0, 1])")]
    InvalidProbability { value: f64 },

    #[error("Invalid classifier output: {0}")]
    InvalidClassifierOutput(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("No market data for {event}")]
    NoMarketData { event: String },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Row/quote-level errors that callers count and skip.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedRecord { .. }
                | EngineError::InvalidOdds { .. }
                | EngineError::NoMarketData { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
