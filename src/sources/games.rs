//! Live games and results from API-Basketball and API-American-Football
//! (API-Sports).
//!
//! API: `https://v1.basketball.api-sports.io/games`,
//! `https://v1.american-football.api-sports.io/games`
//! Auth: `x-apisports-key` header, shared with the football adapter.
//!
//! These endpoints take a league and a season but no date range, so a
//! whole season is fetched and filtered to the window. Final points are
//! stored in the goals fields.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::fixtures::has_errors;
use super::{normalize_team_name, parse_match_date, FetchParams, MatchSource, SourceBatch};
use crate::types::{MatchRecord, MatchStatus, SourceKind};

/// How a league labels its seasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonLabel {
    /// `2023-2024`
    Split,
    /// `2023`
    Single,
}

/// Where a league lives in API-Sports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLeague {
    pub sport: String,
    pub id: u32,
    /// First month of a season; earlier months belong to the previous one.
    pub season_start_month: u32,
    pub label: SeasonLabel,
}

impl GameLeague {
    fn season_year(&self, date: NaiveDate) -> i32 {
        if date.month() >= self.season_start_month {
            date.year()
        } else {
            date.year() - 1
        }
    }

    fn season_param(&self, year: i32) -> String {
        match self.label {
            SeasonLabel::Split => format!("{}-{}", year, year + 1),
            SeasonLabel::Single => year.to_string(),
        }
    }

    /// Season parameters covering every date in the window, oldest first.
    pub fn seasons(&self, params: &FetchParams) -> Vec<String> {
        (self.season_year(params.from)..=self.season_year(params.to))
            .map(|y| self.season_param(y))
            .collect()
    }
}

/// Built-in league slug -> (sport, API-Sports league id, season start month, label).
const LEAGUES: &[(&str, &str, u32, u32, SeasonLabel)] = &[
    ("nba", "basketball", 12, 10, SeasonLabel::Split),
    ("euroleague", "basketball", 151, 10, SeasonLabel::Single),
    ("nfl", "american_football", 1, 3, SeasonLabel::Single),
];

/// Built-in sport -> API base URL.
pub const BASE_URLS: &[(&str, &str)] = &[
    ("basketball", "https://v1.basketball.api-sports.io"),
    ("american_football", "https://v1.american-football.api-sports.io"),
];

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GamesResponse {
    #[serde(default)]
    errors: serde_json::Value,
    #[serde(default)]
    response: Vec<serde_json::Value>,
}

/// Basketball puts id/date/status at the top level; American football
/// nests them under `game` with the date split into parts.
#[derive(Debug, Deserialize)]
struct ApiGame {
    id: Option<u64>,
    date: Option<GameDate>,
    status: Option<GameStatus>,
    game: Option<NestedGame>,
    teams: Teams,
    #[serde(default)]
    scores: Scores,
}

#[derive(Debug, Deserialize)]
struct NestedGame {
    id: Option<u64>,
    date: Option<GameDate>,
    status: Option<GameStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GameDate {
    Text(String),
    Parts { date: Option<String> },
}

impl GameDate {
    fn parse(&self) -> Option<NaiveDate> {
        match self {
            GameDate::Text(raw) => parse_match_date(raw),
            GameDate::Parts { date } => date.as_deref().and_then(parse_match_date),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GameStatus {
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
struct Scores {
    home: Option<Score>,
    away: Option<Score>,
}

#[derive(Debug, Deserialize)]
struct Score {
    #[serde(alias = "points")]
    total: Option<u32>,
}

impl ApiGame {
    fn id(&self) -> Option<u64> {
        self.id.or_else(|| self.game.as_ref().and_then(|g| g.id))
    }

    fn date(&self) -> Option<NaiveDate> {
        self.date
            .as_ref()
            .or_else(|| self.game.as_ref().and_then(|g| g.date.as_ref()))
            .and_then(GameDate::parse)
    }

    fn status(&self) -> Option<&str> {
        self.status
            .as_ref()
            .or_else(|| self.game.as_ref().and_then(|g| g.status.as_ref()))
            .and_then(|s| s.short.as_deref())
    }
}

/// Map basketball and American football short status codes.
pub fn map_game_status(short: &str) -> MatchStatus {
    match short {
        "FT" | "AOT" => MatchStatus::Finished,
        "NS" | "TBD" | "POST" | "PST" | "CANC" | "SUSP" | "AWD" | "ABD" => MatchStatus::Scheduled,
        _ => MatchStatus::Live,
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct ApiSportsGamesSource {
    http: Client,
    api_key: Secret<String>,
    base_urls: HashMap<String, String>,
    leagues: HashMap<String, GameLeague>,
}

impl ApiSportsGamesSource {
    pub fn new(
        api_key: Secret<String>,
        base_url_overrides: &HashMap<String, String>,
        league_id_overrides: &HashMap<String, u32>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("valuebet/0.1.0")
            .build()
            .context("Failed to build games HTTP client")?;

        let mut base_urls: HashMap<String, String> = BASE_URLS
            .iter()
            .map(|(sport, url)| (sport.to_string(), url.to_string()))
            .collect();
        base_urls.extend(base_url_overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        for url in base_urls.values_mut() {
            *url = url.trim_end_matches('/').to_string();
        }

        let mut leagues: HashMap<String, GameLeague> = LEAGUES
            .iter()
            .map(|(slug, sport, id, start, label)| {
                let league = GameLeague {
                    sport: sport.to_string(),
                    id: *id,
                    season_start_month: *start,
                    label: *label,
                };
                (slug.to_string(), league)
            })
            .collect();
        // Overrides re-point known leagues only; the sport comes from the table.
        for (slug, id) in league_id_overrides {
            if let Some(league) = leagues.get_mut(slug) {
                league.id = *id;
            }
        }

        Ok(Self { http, api_key, base_urls, leagues })
    }

    pub fn league(&self, slug: &str) -> Option<&GameLeague> {
        self.leagues.get(slug)
    }

    /// Translate one season's response into records inside the window.
    pub fn parse(body: GamesResponse, params: &FetchParams, fetched_at: DateTime<Utc>) -> Result<SourceBatch> {
        if has_errors(&body.errors) {
            bail!("API-Sports returned errors: {}", body.errors);
        }

        let mut batch = SourceBatch::default();
        for raw in body.response {
            let Ok(item) = serde_json::from_value::<ApiGame>(raw) else {
                batch.dropped += 1;
                continue;
            };
            let home = item.teams.home.name.as_deref().map(normalize_team_name);
            let away = item.teams.away.name.as_deref().map(normalize_team_name);
            let (Some(date), Some(home), Some(away)) = (item.date(), home, away) else {
                batch.dropped += 1;
                continue;
            };
            if home.is_empty() || away.is_empty() {
                batch.dropped += 1;
                continue;
            }
            if !params.contains(date) {
                continue;
            }

            let mut record = MatchRecord::new(
                home, away, date, &params.league, &params.sport, SourceKind::LiveFixtures, fetched_at,
            );
            record.fixture_id = item.id();
            record.status = item.status().map(map_game_status);
            if record.status == Some(MatchStatus::Finished) {
                record.home_goals = item.scores.home.as_ref().and_then(|s| s.total);
                record.away_goals = item.scores.away.as_ref().and_then(|s| s.total);
            }
            batch.records.push(record);
        }
        Ok(batch)
    }

    async fn fetch_season(&self, base_url: &str, league_id: u32, season: &str, params: &FetchParams) -> Result<SourceBatch> {
        let url = format!("{base_url}/games");
        let resp = self
            .http
            .get(&url)
            .header("x-apisports-key", self.api_key.expose_secret())
            .query(&[("league", league_id.to_string()), ("season", season.to_string())])
            .send()
            .await
            .context("API-Sports games request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("API-Sports returned {status}: {body}");
        }

        let body: GamesResponse = resp
            .json()
            .await
            .context("Failed to parse API-Sports games response")?;
        Self::parse(body, params, Utc::now())
    }
}

#[async_trait]
impl MatchSource for ApiSportsGamesSource {
    fn name(&self) -> &str {
        "api-sports-games"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LiveFixtures
    }

    fn serves(&self, league: &str) -> bool {
        self.leagues.contains_key(league)
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceBatch> {
        let league = self
            .league(&params.league)
            .with_context(|| format!("No API-Sports games league for {}", params.league))?;
        if league.sport != params.sport {
            bail!("{} is a {} league, not {}", params.league, league.sport, params.sport);
        }
        let base_url = self
            .base_urls
            .get(&league.sport)
            .with_context(|| format!("No API-Sports base URL for {}", league.sport))?;

        let mut batch = SourceBatch::default();
        for season in league.seasons(params) {
            debug!(league_id = league.id, season = %season, "Fetching API-Sports games");
            let page = self.fetch_season(base_url, league.id, &season, params).await?;
            batch.records.extend(page.records);
            batch.dropped += page.dropped;
        }

        info!(
            source = "api-sports-games",
            league = %params.league,
            sport = %params.sport,
            records = batch.records.len(),
            dropped = batch.dropped,
            "Games batch fetched"
        );
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
