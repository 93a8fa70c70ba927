//! Live fixtures and results from API-Football (API-Sports).
//!
//! API: `https://v3.football.api-sports.io/fixtures`
//! Auth: `x-apisports-key` header. Free tier: 100 req/day.
//!
//! One request is made per season touched by the window, since the API
//! requires a season alongside `from`/`to`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{normalize_team_name, parse_match_date, FetchParams, MatchSource, SourceBatch};
use crate::types::{MatchRecord, MatchStatus, SourceKind};

/// Built-in league slug -> API-Sports league id.
const LEAGUE_IDS: &[(&str, u32)] = &[
    ("premier_league", 39),
    ("la_liga", 140),
    ("serie_a", 135),
    ("bundesliga", 78),
    ("ligue_1", 61),
    ("champions_league", 2),
    ("europa_league", 3),
];

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FixturesResponse {
    /// `[]` on success, an object keyed by error kind otherwise.
    #[serde(default)]
    errors: serde_json::Value,
    #[serde(default)]
    response: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiFixture {
    fixture: FixtureInfo,
    teams: Teams,
    #[serde(default)]
    goals: Goals,
}

#[derive(Debug, Deserialize)]
struct FixtureInfo {
    id: Option<u64>,
    date: Option<String>,
    status: Option<FixtureStatus>,
}

#[derive(Debug, Deserialize)]
struct FixtureStatus {
    short: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Teams {
    home: Team,
    away: Team,
}

#[derive(Debug, Deserialize)]
struct Team {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Goals {
    home: Option<u32>,
    away: Option<u32>,
}

pub(super) fn has_errors(errors: &serde_json::Value) -> bool {
    match errors {
        serde_json::Value::Null => false,
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

/// Map API-Sports short status codes.
pub fn map_status(short: &str) -> MatchStatus {
    match short {
        "FT" | "AET" | "PEN" | "AWD" | "WO" => MatchStatus::Finished,
        "NS" | "TBD" | "PST" | "CANC" | "ABD" => MatchStatus::Scheduled,
        _ => MatchStatus::Live,
    }
}

/// European seasons are labelled by the year they start in.
fn season_of(date: NaiveDate) -> i32 {
    if date.month() >= 7 {
        date.year()
    } else {
        date.year() - 1
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct ApiSportsFixtureSource {
    http: Client,
    base_url: String,
    api_key: Secret<String>,
    league_ids: HashMap<String, u32>,
}

impl ApiSportsFixtureSource {
    pub fn new(
        base_url: &str,
        api_key: Secret<String>,
        league_overrides: &HashMap<String, u32>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("valuebet/0.1.0")
            .build()
            .context("Failed to build fixtures HTTP client")?;

        let mut league_ids: HashMap<String, u32> = LEAGUE_IDS
            .iter()
            .map(|(slug, id)| (slug.to_string(), *id))
            .collect();
        league_ids.extend(league_overrides.iter().map(|(k, v)| (k.clone(), *v)));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            league_ids,
        })
    }

    pub fn league_id(&self, league: &str) -> Option<u32> {
        self.league_ids.get(league).copied()
    }

    /// Translate one response page into records.
    pub fn parse(
        body: FixturesResponse,
        params: &FetchParams,
        fetched_at: DateTime<Utc>,
    ) -> Result<SourceBatch> {
        if has_errors(&body.errors) {
            bail!("API-Sports returned errors: {}", body.errors);
        }

        let mut batch = SourceBatch::default();
        for raw in body.response {
            let Ok(item) = serde_json::from_value::<ApiFixture>(raw) else {
                batch.dropped += 1;
                continue;
            };
            let date = item.fixture.date.as_deref().and_then(parse_match_date);
            let home = item.teams.home.name.as_deref().map(normalize_team_name);
            let away = item.teams.away.name.as_deref().map(normalize_team_name);
            let (Some(date), Some(home), Some(away)) = (date, home, away) else {
                batch.dropped += 1;
                continue;
            };
            if home.is_empty() || away.is_empty() {
                batch.dropped += 1;
                continue;
            }

            let mut record = MatchRecord::new(
                home, away, date, &params.league, &params.sport, SourceKind::LiveFixtures, fetched_at,
            );
            record.fixture_id = item.fixture.id;
            record.status = item
                .fixture
                .status
                .and_then(|s| s.short)
                .map(|s| map_status(&s));
            // Goals on a live match are a running score, not a result.
            if record.status != Some(MatchStatus::Live) {
                record.home_goals = item.goals.home;
                record.away_goals = item.goals.away;
            }
            batch.records.push(record);
        }
        Ok(batch)
    }

    async fn fetch_season(&self, league_id: u32, season: i32, params: &FetchParams) -> Result<SourceBatch> {
        let url = format!("{}/fixtures", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("x-apisports-key", self.api_key.expose_secret())
            .query(&[
                ("league", league_id.to_string()),
                ("season", season.to_string()),
                ("from", params.from.to_string()),
                ("to", params.to.to_string()),
            ])
            .send()
            .await
            .context("API-Sports fixtures request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("API-Sports returned {status}: {body}");
        }

        let body: FixturesResponse = resp
            .json()
            .await
            .context("Failed to parse API-Sports fixtures response")?;
        Self::parse(body, params, Utc::now())
    }
}

#[async_trait]
impl MatchSource for ApiSportsFixtureSource {
    fn name(&self) -> &str {
        "api-sports"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LiveFixtures
    }

    fn serves(&self, league: &str) -> bool {
        self.league_ids.contains_key(league)
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceBatch> {
        let league_id = self
            .league_id(&params.league)
            .with_context(|| format!("No API-Sports league id for {}", params.league))?;

        let mut batch = SourceBatch::default();
        for season in season_of(params.from)..=season_of(params.to) {
            debug!(league_id, season, "Fetching API-Sports fixtures");
            let page = self.fetch_season(league_id, season, params).await?;
            batch.records.extend(page.records);
            batch.dropped += page.dropped;
        }

        info!(
            source = "api-sports",
            league = %params.league,
            records = batch.records.len(),
            dropped = batch.dropped,
            "Fixtures batch fetched"
        );
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
