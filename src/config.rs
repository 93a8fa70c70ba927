//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section falls back to defaults, so a partial file is valid.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime.

use anyhow::{bail, Context, Result};
use secrecy::Secret;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub fetch: FetchConfig,
    pub sources: SourcesConfig,
    pub model: ModelConfig,
    pub output: OutputConfig,
}

/// Decision thresholds and sizing.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub min_confidence: f64,
    pub edge_threshold: f64,
    pub strong_edge_threshold: f64,
    pub sell_edge_threshold: f64,
    /// Trailing matches per team used for features.
    pub feature_window: usize,
    /// How far back source fetches reach for history.
    pub lookback_days: i64,
    /// Confidence haircut applied when the feature window was short.
    pub reduced_history_penalty: f64,
    pub kelly_multiplier: f64,
    pub max_stake_fraction: f64,
    pub bankroll: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            edge_threshold: 0.05,
            strong_edge_threshold: 0.15,
            sell_edge_threshold: -0.10,
            feature_window: 5,
            lookback_days: 365,
            reduced_history_penalty: 0.1,
            kelly_multiplier: 0.25,   // Quarter-Kelly
            max_stake_fraction: 0.05, // Max 5% of bankroll per bet
            bankroll: 1000.0,
        }
    }
}

/// Retry, timeout, and cache TTL settings for external sources.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub retry_backoff_multiplier: f64,
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub fixture_cache_ttl_seconds: u64,
    pub odds_cache_ttl_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_multiplier: 1.5,
            base_delay_ms: 500,
            request_timeout_secs: 10,
            fixture_cache_ttl_seconds: 3600,
            odds_cache_ttl_seconds: 1800, // odds move faster than fixtures
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fixture_ttl(&self) -> Duration {
        Duration::from_secs(self.fixture_cache_ttl_seconds)
    }

    pub fn odds_ttl(&self) -> Duration {
        Duration::from_secs(self.odds_cache_ttl_seconds)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub historical: HistoricalConfig,
    pub fixtures: FixturesConfig,
    pub games: GamesConfig,
    pub odds: OddsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoricalConfig {
    pub enabled: bool,
    /// CSV file per league slug.
    pub files: HashMap<String, String>,
    pub sport: String,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            files: HashMap::from([(
                "premier_league".to_string(),
                "data/premier_league.csv".to_string(),
            )]),
            sport: "soccer".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FixturesConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    /// League slug -> API-Sports league id. Merged over the built-in table.
    pub league_ids: HashMap<String, u32>,
}

impl Default for FixturesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://v3.football.api-sports.io".to_string(),
            api_key_env: "API_SPORTS_KEY".to_string(),
            league_ids: HashMap::new(),
        }
    }
}

/// API-Sports basketball and American football games.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GamesConfig {
    pub enabled: bool,
    pub api_key_env: String,
    /// Sport -> API base URL. Merged over the built-in table.
    pub base_urls: HashMap<String, String>,
    /// League slug -> API-Sports league id. Re-points built-in leagues only.
    pub league_ids: HashMap<String, u32>,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: "API_SPORTS_KEY".to_string(),
            base_urls: HashMap::new(),
            league_ids: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OddsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    pub regions: String,
    /// "decimal" or "american".
    pub odds_format: String,
    /// League slug -> The Odds API sport key. Merged over the built-in table.
    pub sport_keys: HashMap<String, String>,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.the-odds-api.com".to_string(),
            api_key_env: "ODDS_API_KEY".to_string(),
            regions: "uk,eu".to_string(),
            odds_format: "decimal".to_string(),
            sport_keys: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// Model used for sports without an entry in `sport_paths`.
    pub path: String,
    /// Sport -> model file. Two-outcome sports need a model without a draw class.
    pub sport_paths: HashMap<String, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/baseline.json".to_string(),
            sport_paths: HashMap::from([
                ("basketball".to_string(), "models/two_way.json".to_string()),
                ("american_football".to_string(), "models/two_way.json".to_string()),
            ]),
        }
    }
}

impl ModelConfig {
    pub fn path_for(&self, sport: &str) -> &str {
        self.sport_paths.get(sport).map_or(self.path.as_str(), String::as_str)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub report_path: String,
    pub top_n: usize,
    /// Sport -> leagues scanned by the binary.
    pub sports: BTreeMap<String, Vec<String>>,
    pub upcoming_days: i64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_path: "valuebet_report.json".to_string(),
            top_n: 10,
            sports: BTreeMap::from([("soccer".to_string(), vec!["premier_league".to_string()])]),
            upcoming_days: 7,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if !(0.0..=1.0).contains(&e.min_confidence) {
            bail!("engine.min_confidence must be within [0, 1], got {}", e.min_confidence);
        }
        if e.strong_edge_threshold < e.edge_threshold {
            bail!("engine.strong_edge_threshold must be >= engine.edge_threshold");
        }
        if e.sell_edge_threshold > 0.0 {
            bail!("engine.sell_edge_threshold must be <= 0");
        }
        if e.feature_window == 0 {
            bail!("engine.feature_window must be at least 1");
        }
        if !(0.0..1.0).contains(&e.reduced_history_penalty) {
            bail!("engine.reduced_history_penalty must be within [0, 1)");
        }
        if !(0.0..=1.0).contains(&e.kelly_multiplier) || !(0.0..=1.0).contains(&e.max_stake_fraction) {
            bail!("engine.kelly_multiplier and engine.max_stake_fraction must be within [0, 1]");
        }

        let f = &self.fetch;
        if f.retry_backoff_multiplier < 1.0 {
            bail!("fetch.retry_backoff_multiplier must be >= 1.0");
        }
        if f.request_timeout_secs == 0 {
            bail!("fetch.request_timeout_secs must be positive");
        }
        if f.odds_cache_ttl_seconds > f.fixture_cache_ttl_seconds {
            bail!("fetch.odds_cache_ttl_seconds must not exceed fetch.fixture_cache_ttl_seconds");
        }

        match self.sources.odds.odds_format.as_str() {
            "decimal" | "american" => {}
            other => bail!("sources.odds.odds_format must be \"decimal\" or \"american\", got {other:?}"),
        }

        if self.output.sports.is_empty() {
            bail!("output.sports must name at least one sport");
        }
        if let Some((sport, _)) = self.output.sports.iter().find(|(_, leagues)| leagues.is_empty()) {
            bail!("output.sports.{sport} must list at least one league");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an API key, wrapped so it is never logged.
    pub fn resolve_secret(env_name: &str) -> Option<Secret<String>> {
        Self::resolve_env(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Secret::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.min_confidence, 0.6);
        assert_eq!(cfg.engine.edge_threshold, 0.05);
        assert_eq!(cfg.fetch.max_retries, 3);
        assert_eq!(cfg.fetch.retry_backoff_multiplier, 1.5);
        assert_eq!(cfg.fetch.fixture_cache_ttl_seconds, 3600);
        assert_eq!(cfg.fetch.odds_cache_ttl_seconds, 1800);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [engine]
            min_confidence = 0.55

            [fetch]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.min_confidence, 0.55);
        assert_eq!(cfg.engine.edge_threshold, 0.05);
        assert_eq!(cfg.fetch.max_retries, 5);
        assert_eq!(cfg.fetch.odds_cache_ttl_seconds, 1800);
        assert_eq!(cfg.sources.fixtures.api_key_env, "API_SPORTS_KEY");
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let err = AppConfig::from_toml("[engine]\nmin_confidence = 1.5\n").unwrap_err();
        assert!(format!("{err:#}").contains("min_confidence"));
    }

    #[test]
    fn test_rejects_odds_ttl_longer_than_fixture_ttl() {
        let toml = "[fetch]\nfixture_cache_ttl_seconds = 60\nodds_cache_ttl_seconds = 120\n";
        assert!(AppConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_unknown_odds_format() {
        let toml = "[sources.odds]\nodds_format = \"hongkong\"\n";
        assert!(AppConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_load_repo_config() {
        // Requires config.toml in the working directory (the crate root under cargo test).
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(cfg.engine.kelly_multiplier > 0.0);
            assert!(cfg.engine.kelly_multiplier <= 1.0);
            assert!(!cfg.output.sports.is_empty());
        }
    }

    #[test]
    fn test_output_sports_pick_their_models() {
        let cfg = AppConfig::from_toml(
            r#"
            [model]
            path = "models/custom.json"

            [output.sports]
            soccer = ["premier_league", "la_liga"]
            basketball = ["nba"]
            american_football = ["nfl"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.output.sports.len(), 3);
        assert_eq!(cfg.output.sports["basketball"], vec!["nba"]);
        assert_eq!(cfg.model.path_for("soccer"), "models/custom.json");
        assert_eq!(cfg.model.path_for("basketball"), "models/two_way.json");
        assert!(cfg.sources.games.enabled);
        assert_eq!(cfg.sources.games.api_key_env, "API_SPORTS_KEY");
    }

    #[test]
    fn test_rejects_sport_without_leagues() {
        let err = AppConfig::from_toml("[output.sports]\nbasketball = []\n").unwrap_err();
        assert!(format!("{err:#}").contains("output.sports.basketball"));
    }

    #[test]
    fn test_missing_secret_is_none() {
        assert!(AppConfig::resolve_secret("VALUEBET_TEST_SURELY_UNSET_VAR").is_none());
    }
}
