//! Source adapters.
//!
//! Defines the `MatchSource` and `OddsSource` traits and the shared
//! normalizers every adapter uses to translate source-specific fields into
//! the canonical schema. Adapters do structural translation only: bad rows
//! are dropped and counted, and only whole-fetch failures (network, auth,
//! unreadable file) are returned as errors.

pub mod fixtures;
pub mod games;
pub mod historical;
pub mod odds_api;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};

use crate::types::{MatchRecord, RawQuote, SourceKind};

/// What to fetch: one league over a date window (inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParams {
    pub league: String,
    pub sport: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl FetchParams {
    /// Cache key component; the adapter name is prefixed by the caller.
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}..{}", self.sport, self.league, self.from, self.to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

/// One adapter's output for one fetch.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub records: Vec<MatchRecord>,
    /// Rows skipped for missing or unparseable identity fields.
    pub dropped: usize,
}

/// Abstraction over anything that yields match records.
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// Stable identifier used in cache keys and logs.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Whether this source has data for `league`.
    fn serves(&self, _league: &str) -> bool {
        true
    }

    /// Fetch and normalize records for the window.
    async fn fetch(&self, params: &FetchParams) -> Result<SourceBatch>;
}

/// Abstraction over bookmaker odds feeds.
#[async_trait]
pub trait OddsSource: Send + Sync {
    fn name(&self) -> &str;

    /// All quotes currently offered for one event.
    async fn fetch_quotes(&self, event_id: &str) -> Result<Vec<RawQuote>>;
}

// ---------------------------------------------------------------------------
// Normalizers
// ---------------------------------------------------------------------------

/// Canonical team-name casing: trimmed, single-spaced, title case.
/// Short all-caps tokens (FC, PSG, AFC) are kept as-is.
pub fn normalize_team_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let is_acronym = word.len() <= 3
                && word.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
            if is_acronym {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Percentage on the 0–100 scale. A trailing `%` marks the value as a
/// percentage outright; otherwise see [`normalize_percentage_value`].
pub fn normalize_percentage(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (number, explicit) = match trimmed.strip_suffix('%') {
        Some(rest) => (rest.trim(), true),
        None => (trimmed, false),
    };
    let value: f64 = number.parse().ok()?;
    if explicit {
        (value.is_finite() && (0.0..=100.0).contains(&value)).then_some(value)
    } else {
        normalize_percentage_value(value)
    }
}

/// Only non-integer values below 1 are read as fractions, so a bare `1`
/// stays 1% rather than 100%. Values outside 0–100 are rejected.
pub fn normalize_percentage_value(value: f64) -> Option<f64> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        None
    } else if value < 1.0 && value.fract() != 0.0 {
        Some(value * 100.0)
    } else {
        Some(value)
    }
}

// Two-digit years first: `%Y` would happily read "23" as year 23.
const DATE_FORMATS: &[&str] = &["%d/%m/%y", "%d/%m/%Y", "%Y-%m-%d"];

/// Parse the date formats seen across sources. Timestamps keep their
/// calendar date in UTC.
pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc().date())
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
