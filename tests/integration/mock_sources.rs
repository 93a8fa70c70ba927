//! Mock sources for integration testing.
//!
//! Deterministic `MatchSource` and `OddsSource` implementations backed by
//! in-memory data. Records, quotes, and failures are controllable from
//! test code, and every fetch is counted.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use valuebet::sources::{FetchParams, MatchSource, OddsSource, SourceBatch};
use valuebet::types::*;

pub fn fetched_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 1).unwrap() + chrono::Duration::days(i64::from(d))
}

/// The fixture every pipeline test predicts.
pub fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 4).unwrap()
}

// ---------------------------------------------------------------------------
// Match source
// ---------------------------------------------------------------------------

/// A mock match source. All state is in-memory.
pub struct MockMatchSource {
    name: String,
    kind: SourceKind,
    records: Arc<Mutex<Vec<MatchRecord>>>,
    /// If set, every fetch returns this error.
    force_error: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicU32>,
    delay: Duration,
    /// Only league this source covers; `None` covers all.
    league: Option<String>,
}

impl MockMatchSource {
    pub fn new(name: &str, kind: SourceKind, records: Vec<MatchRecord>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            records: Arc::new(Mutex::new(records)),
            force_error: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicU32::new(0)),
            delay: Duration::ZERO,
            league: None,
        }
    }

    pub fn serving(mut self, league: &str) -> Self {
        self.league = Some(league.to_string());
        self
    }

    /// Simulated network latency per fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn push(&self, record: MatchRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchSource for MockMatchSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn serves(&self, league: &str) -> bool {
        self.league.as_deref().map_or(true, |l| l == league)
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }

        let records = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.league.eq_ignore_ascii_case(&params.league) && params.contains(r.date))
            .cloned()
            .collect();
        Ok(SourceBatch { records, dropped: 0 })
    }
}

// ---------------------------------------------------------------------------
// Odds source
// ---------------------------------------------------------------------------

pub struct MockOddsSource {
    quotes: Arc<Mutex<HashMap<String, Vec<RawQuote>>>>,
    force_error: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicU32>,
}

impl MockOddsSource {
    pub fn new() -> Self {
        Self {
            quotes: Arc::new(Mutex::new(HashMap::new())),
            force_error: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_quotes(event_id: &str, quotes: Vec<RawQuote>) -> Self {
        let source = Self::new();
        source.quotes.lock().unwrap().insert(event_id.to_string(), quotes);
        source
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OddsSource for MockOddsSource {
    fn name(&self) -> &str {
        "mock-odds"
    }

    async fn fetch_quotes(&self, event_id: &str) -> Result<Vec<RawQuote>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self.quotes.lock().unwrap().get(event_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn result(home: &str, away: &str, date: NaiveDate, goals: (u32, u32)) -> MatchRecord {
    let mut r = MatchRecord::new(
        home, away, date, "premier_league", "soccer",
        SourceKind::Historical, fetched_at(),
    );
    r.status = Some(MatchStatus::Finished);
    r.home_goals = Some(goals.0);
    r.away_goals = Some(goals.1);
    r.home_shots_on_target = Some(goals.0 + 3);
    r.away_shots_on_target = Some(goals.1 + 2);
    r
}

/// Six completed matches each for Arsenal and Chelsea, all in April 2024.
pub fn history() -> Vec<MatchRecord> {
    let opponents = ["Everton", "Fulham", "Brentford", "Wolves", "Burnley", "Luton"];
    let mut records = Vec::new();
    for (i, opp) in opponents.iter().enumerate() {
        let i = i as u32;
        records.push(result("Arsenal", opp, day(i * 2), (2, 0)));
        records.push(result(opp, "Chelsea", day(i * 2 + 1), (1, 1)));
    }
    records
}

/// An upcoming fixture as listed by the odds feed.
pub fn upcoming(home: &str, away: &str, date: NaiveDate, event_id: &str) -> MatchRecord {
    let mut r = MatchRecord::new(
        home, away, date, "premier_league", "soccer",
        SourceKind::LiveOdds, fetched_at(),
    );
    r.status = Some(MatchStatus::Scheduled);
    r.odds_event_id = Some(event_id.to_string());
    r
}

pub fn decimal_quote(bookmaker: &str, outcome: Outcome, odds: f64) -> RawQuote {
    RawQuote {
        bookmaker: bookmaker.to_string(),
        outcome,
        price: OddsPrice::Decimal(odds),
        fetched_at: fetched_at(),
    }
}
