//! valuebet: sports data fusion and value-bet decision engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the enabled sources, then for each configured sport loads its
//! model, discovers upcoming matches and analyzes them with Ctrl+C
//! cancellation. One report covers every sport.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use valuebet::cancel::CancelHandle;
use valuebet::config::AppConfig;
use valuebet::engine::{MatchAnalysis, MatchRequest, Orchestrator};
use valuebet::features::FEATURE_NAMES;
use valuebet::prediction::softmax::SoftmaxModel;
use valuebet::sources::fixtures::ApiSportsFixtureSource;
use valuebet::sources::games::ApiSportsGamesSource;
use valuebet::sources::historical::HistoricalCsvSource;
use valuebet::sources::odds_api::{OddsApiSource, OddsFormat};
use valuebet::sources::{MatchSource, OddsSource};
use valuebet::storage::{self, RunReport};
use valuebet::types::{EngineError, MarketStatus};

const BANNER: &str = r#"
            _            _          _
 __   ____ _| |_   _  ___| |__   ___| |_
 \ \ / / _` | | | | |/ _ \ '_ \ / _ \ __|
  \ V / (_| | | |_| |  __/ |_) |  __/ |_
   \_/ \__,_|_|\__,_|\___|_.__/ \___|\__|

  Data Fusion & Value-Bet Decision Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("VALUEBET_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        sports = ?cfg.output.sports,
        min_confidence = cfg.engine.min_confidence,
        bankroll = cfg.engine.bankroll,
        "valuebet starting up"
    );

    // -- Initialise components -------------------------------------------

    let (sources, odds_source) = build_sources(&cfg)?;
    if sources.is_empty() {
        anyhow::bail!("No match sources enabled; enable at least one under [sources]");
    }

    // One orchestrator per sport, each with the model for its outcome set.
    let mut orchestrators: Vec<(&str, &[String], Orchestrator)> = Vec::new();
    for (sport, leagues) in &cfg.output.sports {
        let path = cfg.model.path_for(sport);
        let model = SoftmaxModel::load(path, &FEATURE_NAMES)
            .with_context(|| format!("Failed to load {sport} model from {path}"))?;
        let orchestrator = Orchestrator::new(&cfg, sources.clone(), odds_source.clone(), Arc::new(model));
        orchestrators.push((sport.as_str(), leagues.as_slice(), orchestrator));
    }

    // -- Run -------------------------------------------------------------

    let (handle, cancel) = CancelHandle::new();

    let work = async {
        let today = Utc::now().date_naive();
        let until = today + Duration::days(cfg.output.upcoming_days);

        let mut results: Vec<Result<MatchAnalysis, EngineError>> = Vec::new();
        for (sport, leagues, orchestrator) in &orchestrators {
            let mut requests: Vec<MatchRequest> = Vec::new();
            for league in leagues.iter() {
                match orchestrator.discover(league, sport, today, until, &cancel).await {
                    Ok(found) => requests.extend(found),
                    Err(e) => error!(sport = %sport, league = %league, error = %e, "Discovery failed"),
                }
            }

            if requests.is_empty() {
                warn!(sport = %sport, "No upcoming matches found");
                continue;
            }
            info!(sport = %sport, matches = requests.len(), "Analyzing upcoming matches");
            results.extend(orchestrator.run_many(&requests, &cancel).await);
        }
        results
    };

    tokio::pin!(work);

    // On Ctrl+C, in-flight runs stop at their next stage boundary.
    let results = tokio::select! {
        results = &mut work => results,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, cancelling runs.");
            handle.cancel();
            (&mut work).await
        }
    };

    // -- Report ----------------------------------------------------------

    let failed = results.iter().filter(|r| r.is_err()).count();
    let analyses: Vec<MatchAnalysis> = results.into_iter().filter_map(Result::ok).collect();

    let report = RunReport::build(&cfg.output.sports, analyses, failed, cfg.output.top_n);
    log_report(&report);

    if let Err(e) = storage::save_report(&report, &cfg.output.report_path) {
        error!(error = %e, "Failed to save report");
    }

    info!(
        matches = report.matches_analyzed,
        failed = report.failed_requests,
        path = %cfg.output.report_path,
        "valuebet finished."
    );

    Ok(())
}

/// Build every enabled adapter. Live sources without an API key are
/// skipped with a warning.
fn build_sources(cfg: &AppConfig) -> Result<(Vec<Arc<dyn MatchSource>>, Option<Arc<dyn OddsSource>>)> {
    let mut sources: Vec<Arc<dyn MatchSource>> = Vec::new();
    let mut odds: Option<Arc<dyn OddsSource>> = None;
    let timeout = cfg.fetch.request_timeout();

    let hist = &cfg.sources.historical;
    if hist.enabled {
        for (league, path) in &hist.files {
            info!(league = %league, path = %path, "Historical source enabled");
            sources.push(Arc::new(HistoricalCsvSource::new(path, league, &hist.sport)));
        }
    }

    let fx = &cfg.sources.fixtures;
    if fx.enabled {
        match AppConfig::resolve_secret(&fx.api_key_env) {
            Some(key) => {
                let source = ApiSportsFixtureSource::new(&fx.base_url, key, &fx.league_ids, timeout)?;
                info!(base_url = %fx.base_url, "Fixtures source enabled");
                sources.push(Arc::new(source));
            }
            None => warn!(env = %fx.api_key_env, "No fixtures API key, fixtures source disabled"),
        }
    }

    let games = &cfg.sources.games;
    if games.enabled {
        match AppConfig::resolve_secret(&games.api_key_env) {
            Some(key) => {
                let source = ApiSportsGamesSource::new(key, &games.base_urls, &games.league_ids, timeout)?;
                info!("Basketball and American football games source enabled");
                sources.push(Arc::new(source));
            }
            None => warn!(env = %games.api_key_env, "No games API key, games source disabled"),
        }
    }

    let od = &cfg.sources.odds;
    if od.enabled {
        match AppConfig::resolve_secret(&od.api_key_env) {
            Some(key) => {
                let format: OddsFormat = od.odds_format.parse()?;
                let source = Arc::new(OddsApiSource::new(
                    &od.base_url,
                    key,
                    &od.regions,
                    format,
                    &od.sport_keys,
                    timeout,
                )?);
                info!(base_url = %od.base_url, regions = %od.regions, "Odds source enabled");
                sources.push(source.clone());
                odds = Some(source);
            }
            None => warn!(env = %od.api_key_env, "No odds API key, running prediction-only"),
        }
    }

    Ok((sources, odds))
}

/// Log the ranked top value bets and run summary.
fn log_report(report: &RunReport) {
    for (i, rec) in report.top_value_bets.iter().enumerate() {
        info!(rank = i + 1, "{rec}");
    }

    let unpriced = report
        .analyses
        .iter()
        .filter(|a| a.market == MarketStatus::NoMarketData)
        .count();

    info!(
        run_id = %report.run_id,
        analyzed = report.matches_analyzed,
        unpriced,
        positive_edge = report.positive_edge_count,
        avg_edge = format!("{:+.2}%", report.average_edge * 100.0),
        avg_confidence = format!("{:.1}%", report.average_confidence * 100.0),
        "Run complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("valuebet=info"));

    let json_logging = std::env::var("VALUEBET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
