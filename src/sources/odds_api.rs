//! The Odds API (v4) adapter.
//!
//! Serves two roles:
//! - as a `MatchSource`, lists upcoming events so fusion can attach an
//!   odds event id to fixtures;
//! - as an `OddsSource`, returns head-to-head quotes for one event across
//!   every bookmaker in the configured regions.
//!
//! Event ids handed out by this adapter are qualified with the sport key
//! (`soccer_epl:abc123`) because the odds endpoint is scoped by sport.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{normalize_team_name, parse_match_date, FetchParams, MatchSource, OddsSource, SourceBatch};
use crate::types::{MatchRecord, MatchStatus, OddsPrice, Outcome, RawQuote, SourceKind};

/// Built-in league slug -> The Odds API sport key.
const SPORT_KEYS: &[(&str, &str)] = &[
    ("premier_league", "soccer_epl"),
    ("la_liga", "soccer_spain_la_liga"),
    ("serie_a", "soccer_italy_serie_a"),
    ("bundesliga", "soccer_germany_bundesliga"),
    ("ligue_1", "soccer_france_ligue_one"),
    ("champions_league", "soccer_uefa_champs_league"),
    ("europa_league", "soccer_uefa_europa_league"),
    ("nba", "basketball_nba"),
    ("euroleague", "basketball_euroleague"),
    ("nfl", "americanfootball_nfl"),
];

/// Price format requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OddsFormat {
    Decimal,
    American,
}

impl OddsFormat {
    fn as_param(&self) -> &'static str {
        match self {
            OddsFormat::Decimal => "decimal",
            OddsFormat::American => "american",
        }
    }

    fn price(&self, value: f64) -> OddsPrice {
        match self {
            OddsFormat::Decimal => OddsPrice::Decimal(value),
            OddsFormat::American => OddsPrice::American(value),
        }
    }
}

impl std::str::FromStr for OddsFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "decimal" => Ok(OddsFormat::Decimal),
            "american" => Ok(OddsFormat::American),
            other => bail!("Unsupported odds format: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OddsEvent {
    id: String,
    sport_key: String,
    commence_time: Option<String>,
    home_team: Option<String>,
    away_team: Option<String>,
    #[serde(default)]
    bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize)]
struct Bookmaker {
    key: String,
    #[serde(default)]
    markets: Vec<Market>,
}

#[derive(Debug, Deserialize)]
struct Market {
    key: String,
    #[serde(default)]
    outcomes: Vec<MarketOutcome>,
}

#[derive(Debug, Deserialize)]
struct MarketOutcome {
    name: String,
    price: f64,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct OddsApiSource {
    http: Client,
    base_url: String,
    api_key: Secret<String>,
    regions: String,
    format: OddsFormat,
    sport_keys: HashMap<String, String>,
}

impl OddsApiSource {
    pub fn new(
        base_url: &str,
        api_key: Secret<String>,
        regions: &str,
        format: OddsFormat,
        sport_key_overrides: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("valuebet/0.1.0")
            .build()
            .context("Failed to build odds HTTP client")?;

        let mut sport_keys: HashMap<String, String> = SPORT_KEYS
            .iter()
            .map(|(slug, key)| (slug.to_string(), key.to_string()))
            .collect();
        sport_keys.extend(sport_key_overrides.clone());

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            regions: regions.to_string(),
            format,
            sport_keys,
        })
    }

    pub fn sport_key(&self, league: &str) -> Option<&str> {
        self.sport_keys.get(league).map(String::as_str)
    }

    /// Events without both team names or a start time are dropped.
    pub fn parse_events(
        events: Vec<OddsEvent>,
        params: &FetchParams,
        fetched_at: DateTime<Utc>,
    ) -> SourceBatch {
        let mut batch = SourceBatch::default();
        for event in events {
            let date = event.commence_time.as_deref().and_then(parse_match_date);
            let home = event.home_team.as_deref().map(normalize_team_name);
            let away = event.away_team.as_deref().map(normalize_team_name);
            let (Some(date), Some(home), Some(away)) = (date, home, away) else {
                batch.dropped += 1;
                continue;
            };
            if !params.contains(date) {
                continue;
            }
            let mut record = MatchRecord::new(
                home, away, date, &params.league, &params.sport, SourceKind::LiveOdds, fetched_at,
            );
            record.status = Some(MatchStatus::Scheduled);
            record.odds_event_id = Some(format!("{}:{}", event.sport_key, event.id));
            batch.records.push(record);
        }
        batch
    }

    /// Extract h2h quotes. Outcome names are team names or "Draw".
    pub fn parse_quotes(event: &OddsEvent, format: OddsFormat, fetched_at: DateTime<Utc>) -> Vec<RawQuote> {
        let mut quotes = Vec::new();
        for bookmaker in &event.bookmakers {
            for market in bookmaker.markets.iter().filter(|m| m.key == "h2h") {
                for o in &market.outcomes {
                    let outcome = if Some(o.name.as_str()) == event.home_team.as_deref() {
                        Outcome::Home
                    } else if Some(o.name.as_str()) == event.away_team.as_deref() {
                        Outcome::Away
                    } else if o.name.eq_ignore_ascii_case("draw") {
                        Outcome::Draw
                    } else {
                        debug!(bookmaker = %bookmaker.key, name = %o.name, "Unrecognised outcome skipped");
                        continue;
                    };
                    quotes.push(RawQuote {
                        bookmaker: bookmaker.key.clone(),
                        outcome,
                        price: format.price(o.price),
                        fetched_at,
                    });
                }
            }
        }
        quotes
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .query(&[("apiKey", self.api_key.expose_secret().as_str())])
            .query(query)
            .send()
            .await
            .context("Odds API request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Odds API returned {status}: {body}");
        }
        if let Some(remaining) = resp.headers().get("x-requests-remaining") {
            debug!(remaining = ?remaining, "Odds API quota");
        }
        resp.json().await.context("Failed to parse Odds API response")
    }
}

#[async_trait]
impl MatchSource for OddsApiSource {
    fn name(&self) -> &str {
        "odds-api"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LiveOdds
    }

    fn serves(&self, league: &str) -> bool {
        self.sport_keys.contains_key(league)
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceBatch> {
        let sport_key = self
            .sport_key(&params.league)
            .with_context(|| format!("No Odds API sport key for {}", params.league))?;
        let url = format!("{}/v4/sports/{}/events", self.base_url, sport_key);

        let from = params.from.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        let to = params
            .to
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
        let mut query = vec![("dateFormat", "iso".to_string())];
        if let Some(from) = from {
            query.push(("commenceTimeFrom", from.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        if let Some(to) = to {
            query.push(("commenceTimeTo", to.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }

        let events: Vec<OddsEvent> = self.get_json(&url, &query).await?;
        let batch = Self::parse_events(events, params, Utc::now());
        info!(
            source = "odds-api",
            league = %params.league,
            records = batch.records.len(),
            dropped = batch.dropped,
            "Odds events fetched"
        );
        Ok(batch)
    }
}

#[async_trait]
impl OddsSource for OddsApiSource {
    fn name(&self) -> &str {
        "odds-api"
    }

    async fn fetch_quotes(&self, event_id: &str) -> Result<Vec<RawQuote>> {
        let Some((sport_key, id)) = event_id.split_once(':') else {
            bail!("Odds event id must be <sport_key>:<id>, got {event_id}");
        };
        let url = format!(
            "{}/v4/sports/{}/events/{}/odds",
            self.base_url,
            sport_key,
            urlencoding::encode(id)
        );
        let query = [
            ("regions", self.regions.clone()),
            ("markets", "h2h".to_string()),
            ("oddsFormat", self.format.as_param().to_string()),
        ];

        let event: OddsEvent = self.get_json(&url, &query).await?;
        let quotes = Self::parse_quotes(&event, self.format, Utc::now());
        debug!(event_id, bookmakers = event.bookmakers.len(), quotes = quotes.len(), "Quotes fetched");
        Ok(quotes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
