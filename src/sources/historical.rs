//! Historical results from a CSV table.
//!
//! Reads football-data.co.uk style files (`Date, HomeTeam, AwayTeam, FTHG,
//! FTAG, HS, AS, HST, AST`) and snake_case equivalents. Required identity
//! columns are validated when the header is read; statistical columns are
//! optional and simply left unset when absent.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info};

use super::{
    normalize_percentage, normalize_team_name, parse_match_date, FetchParams, MatchSource,
    SourceBatch,
};
use crate::types::{MatchRecord, MatchStatus, SourceKind};

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

const DATE_COLUMNS: &[&str] = &["Date", "date"];
const HOME_COLUMNS: &[&str] = &["HomeTeam", "home_team", "Home"];
const AWAY_COLUMNS: &[&str] = &["AwayTeam", "away_team", "Away"];
const HOME_GOALS_COLUMNS: &[&str] = &["FTHG", "home_score", "HG"];
const AWAY_GOALS_COLUMNS: &[&str] = &["FTAG", "away_score", "AG"];
const HOME_SHOTS_COLUMNS: &[&str] = &["HS", "home_shots"];
const AWAY_SHOTS_COLUMNS: &[&str] = &["AS", "away_shots"];
const HOME_SOT_COLUMNS: &[&str] = &["HST", "home_shots_on_target"];
const AWAY_SOT_COLUMNS: &[&str] = &["AST", "away_shots_on_target"];
const HOME_POSS_COLUMNS: &[&str] = &["HomePossession", "home_possession"];
const AWAY_POSS_COLUMNS: &[&str] = &["AwayPossession", "away_possession"];

/// Header positions resolved once per file.
#[derive(Debug)]
struct ColumnMap {
    date: usize,
    home: usize,
    away: usize,
    home_goals: Option<usize>,
    away_goals: Option<usize>,
    home_shots: Option<usize>,
    away_shots: Option<usize>,
    home_sot: Option<usize>,
    away_sot: Option<usize>,
    home_poss: Option<usize>,
    away_poss: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.iter().any(|a| h.trim() == *a))
        };
        let require = |aliases: &[&str]| {
            find(aliases).with_context(|| format!("Missing required column {}", aliases[0]))
        };

        Ok(Self {
            date: require(DATE_COLUMNS)?,
            home: require(HOME_COLUMNS)?,
            away: require(AWAY_COLUMNS)?,
            home_goals: find(HOME_GOALS_COLUMNS),
            away_goals: find(AWAY_GOALS_COLUMNS),
            home_shots: find(HOME_SHOTS_COLUMNS),
            away_shots: find(AWAY_SHOTS_COLUMNS),
            home_sot: find(HOME_SOT_COLUMNS),
            away_sot: find(AWAY_SOT_COLUMNS),
            home_poss: find(HOME_POSS_COLUMNS),
            away_poss: find(AWAY_POSS_COLUMNS),
        })
    }
}

fn cell<'a>(row: &'a csv::StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| row.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn count(row: &csv::StringRecord, idx: Option<usize>) -> Option<u32> {
    cell(row, idx).and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u32)
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// One CSV file holding one league's results.
pub struct HistoricalCsvSource {
    name: String,
    path: PathBuf,
    league: String,
    sport: String,
}

impl HistoricalCsvSource {
    pub fn new(path: impl Into<PathBuf>, league: &str, sport: &str) -> Self {
        Self {
            name: format!("historical-{league}"),
            path: path.into(),
            league: league.to_string(),
            sport: sport.to_string(),
        }
    }

    /// Parse CSV text into records, keeping rows inside the window.
    pub fn parse(
        &self,
        contents: &str,
        params: &FetchParams,
        fetched_at: DateTime<Utc>,
    ) -> Result<SourceBatch> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes());

        let headers = reader.headers().context("Failed to read CSV header")?.clone();
        let columns = ColumnMap::from_headers(&headers)
            .with_context(|| format!("Invalid historical file {}", self.path.display()))?;

        let mut batch = SourceBatch::default();
        for (line, row) in reader.records().enumerate() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    debug!(source = %self.name, line = line + 2, error = %e, "Unreadable row dropped");
                    batch.dropped += 1;
                    continue;
                }
            };

            let date = cell(&row, Some(columns.date)).and_then(parse_match_date);
            let home = cell(&row, Some(columns.home)).map(normalize_team_name);
            let away = cell(&row, Some(columns.away)).map(normalize_team_name);
            let (Some(date), Some(home), Some(away)) = (date, home, away) else {
                debug!(source = %self.name, line = line + 2, "Row missing identity fields dropped");
                batch.dropped += 1;
                continue;
            };

            if !params.contains(date) {
                continue;
            }

            let mut record = MatchRecord::new(
                home, away, date, &self.league, &self.sport, SourceKind::Historical, fetched_at,
            );
            record.home_goals = count(&row, columns.home_goals);
            record.away_goals = count(&row, columns.away_goals);
            record.home_shots = count(&row, columns.home_shots);
            record.away_shots = count(&row, columns.away_shots);
            record.home_shots_on_target = count(&row, columns.home_sot);
            record.away_shots_on_target = count(&row, columns.away_sot);
            record.home_possession = cell(&row, columns.home_poss).and_then(normalize_percentage);
            record.away_possession = cell(&row, columns.away_poss).and_then(normalize_percentage);
            if record.is_completed() {
                record.status = Some(MatchStatus::Finished);
            }
            batch.records.push(record);
        }

        Ok(batch)
    }
}

#[async_trait]
impl MatchSource for HistoricalCsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Historical
    }

    fn serves(&self, league: &str) -> bool {
        league == self.league
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceBatch> {
        if params.league != self.league {
            bail!("{} serves league {}, not {}", self.name, self.league, params.league);
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let batch = self.parse(&contents, params, Utc::now())?;
        info!(
            source = %self.name,
            records = batch.records.len(),
            dropped = batch.dropped,
            "Historical batch loaded"
        );
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
