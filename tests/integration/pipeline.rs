//! End-to-end pipeline tests against mock sources.
//!
//! Time is paused in every async test, so retry backoff and TTL expiry
//! run instantly and deterministically.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use tokio_test::{assert_err, assert_ok};

use valuebet::cancel::{CancelHandle, CancelToken};
use valuebet::config::AppConfig;
use valuebet::engine::pipeline::PipelineStage;
use valuebet::engine::{MatchRequest, Orchestrator};
use valuebet::features::FEATURE_COUNT;
use valuebet::prediction::Classifier;
use valuebet::sources::{MatchSource, OddsSource};
use valuebet::storage::{self, RunReport};
use valuebet::types::*;

use crate::mock_sources::*;

mock! {
    pub Model {}
    impl Classifier for Model {
        fn arity(&self) -> usize;
        fn predict_proba(&self, features: &[f64]) -> anyhow::Result<ClassProbabilities>;
    }
}

const EVENT: &str = "soccer_epl:e1";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.fetch.max_retries = 1;
    cfg.fetch.base_delay_ms = 100;
    cfg
}

fn fixed_model(home: f64, draw: f64, away: f64) -> Arc<dyn Classifier> {
    let mut model = MockModel::new();
    model.expect_arity().return_const(FEATURE_COUNT);
    model
        .expect_predict_proba()
        .returning(move |_| Ok(BTreeMap::from([(Outcome::Home, home), (Outcome::Draw, draw), (Outcome::Away, away)])));
    Arc::new(model)
}

fn quotes() -> Vec<RawQuote> {
    vec![
        decimal_quote("bet365", Outcome::Home, 1.90),
        decimal_quote("pinnacle", Outcome::Home, 2.00),
        decimal_quote("bet365", Outcome::Draw, 3.40),
        decimal_quote("bet365", Outcome::Away, 5.50),
    ]
}

fn request() -> MatchRequest {
    MatchRequest::new("Arsenal", "Chelsea", target_date(), "premier_league", "soccer")
}

struct Harness {
    hist: Arc<MockMatchSource>,
    feed: Arc<MockMatchSource>,
    odds: Arc<MockOddsSource>,
    orchestrator: Orchestrator,
}

fn harness_with(odds: MockOddsSource, model: Arc<dyn Classifier>) -> Harness {
    let hist = Arc::new(MockMatchSource::new("mock-hist", SourceKind::Historical, history()).serving("premier_league"));
    let feed = Arc::new(MockMatchSource::new(
        "mock-feed",
        SourceKind::LiveOdds,
        vec![upcoming("Arsenal", "Chelsea", target_date(), EVENT)],
    ));
    let odds = Arc::new(odds);

    let sources: Vec<Arc<dyn MatchSource>> = vec![hist.clone(), feed.clone()];
    let odds_source: Arc<dyn OddsSource> = odds.clone();
    let orchestrator = Orchestrator::new(&config(), sources, Some(odds_source), model);

    Harness { hist, feed, odds, orchestrator }
}

fn harness() -> Harness {
    harness_with(MockOddsSource::with_quotes(EVENT, quotes()), fixed_model(0.60, 0.25, 0.15))
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_priced_run_ranks_recommendations() {
    let h = harness();
    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);

    assert_eq!(analysis.market, MarketStatus::Priced { quotes: 4 });
    assert!(!analysis.is_degraded());
    assert!(!analysis.prediction.reduced_history);
    assert_eq!(analysis.prediction.outcome, Outcome::Home);
    assert_eq!(analysis.stages.last(), Some(&PipelineStage::Done));
    assert_eq!(analysis.stages.len(), 7);

    let best = analysis.best().unwrap();
    assert_eq!(best.outcome, Outcome::Home);
    assert_eq!(best.bookmaker, "pinnacle");
    assert_eq!(best.tier, RecommendationTier::Buy);
    assert!((best.edge - 0.10).abs() < 1e-9);
    assert!((best.kelly_fraction - 0.20).abs() < 1e-9);

    for pair in analysis.recommendations.windows(2) {
        assert!(pair[0].edge >= pair[1].edge);
    }
    assert_eq!(h.odds.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_known_event_id_fetches_odds_alongside_sources() {
    let h = harness();
    let mut req = request();
    req.odds_event_id = Some(EVENT.to_string());

    let analysis = assert_ok!(h.orchestrator.run(&req, &CancelToken::never()).await);
    assert_eq!(analysis.market, MarketStatus::Priced { quotes: 4 });
    assert_eq!(h.odds.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_report_round_trip_after_run() {
    let h = harness();
    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);

    let report = RunReport::build(
        &BTreeMap::from([("soccer".to_string(), vec!["premier_league".to_string()])]),
        vec![analysis],
        0,
        2,
    );
    assert_eq!(report.top_value_bets.len(), 2);
    assert_eq!(report.positive_edge_count, 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let path = path.to_str().unwrap();
    storage::save_report(&report, path).unwrap();

    let loaded = storage::load_report(path).unwrap().unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.analyses[0].request, request());
}

// ---------------------------------------------------------------------------
// Missing market data
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_zero_quotes_yields_prediction_only() {
    let h = harness_with(MockOddsSource::new(), fixed_model(0.60, 0.25, 0.15));
    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);

    assert_eq!(analysis.market, MarketStatus::NoMarketData);
    assert!(analysis.recommendations.is_empty());
    assert!((analysis.prediction.probability - 0.60).abs() < 1e-12);
    assert_eq!(analysis.stages.last(), Some(&PipelineStage::Done));
    assert!(!analysis.is_degraded());
}

#[tokio::test(start_paused = true)]
async fn test_unlisted_match_skips_odds_lookup() {
    let h = harness();
    let req = MatchRequest::new("Arsenal", "Fulham", target_date(), "premier_league", "soccer");
    let analysis = assert_ok!(h.orchestrator.run(&req, &CancelToken::never()).await);

    assert_eq!(analysis.market, MarketStatus::NoMarketData);
    assert_eq!(h.odds.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_odds_failure_degrades_instead_of_failing() {
    let h = harness();
    h.odds.set_error("odds feed down");

    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert_eq!(analysis.market, MarketStatus::NoMarketData);
    assert_eq!(analysis.degraded_sources, vec!["mock-odds".to_string()]);
    assert_eq!(h.odds.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_quotes_are_counted() {
    let mut q = quotes();
    q.push(decimal_quote("shady", Outcome::Home, 1.0));
    let h = harness_with(MockOddsSource::with_quotes(EVENT, q), fixed_model(0.60, 0.25, 0.15));

    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert_eq!(analysis.rejected_quotes, 1);
    assert_eq!(analysis.market, MarketStatus::Priced { quotes: 4 });
}

// ---------------------------------------------------------------------------
// Source failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_partial_source_failure_is_degraded() {
    let h = harness();
    h.feed.set_error("connection reset");
    let mut req = request();
    req.odds_event_id = Some(EVENT.to_string());

    let analysis = assert_ok!(h.orchestrator.run(&req, &CancelToken::never()).await);
    assert_eq!(analysis.degraded_sources, vec!["mock-feed".to_string()]);
    assert_eq!(analysis.market, MarketStatus::Priced { quotes: 4 });
    assert_eq!(h.feed.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_sources_failing_errors_the_request() {
    let h = harness();
    h.hist.set_error("disk gone");
    h.feed.set_error("connection reset");

    let err = assert_err!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert!(matches!(err, EngineError::SourceUnavailable { attempts: 2, .. }), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_served_after_ttl_when_source_down() {
    let h = harness();
    assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert_eq!(h.hist.calls(), 1);

    tokio::time::advance(Duration::from_secs(3601)).await;
    h.hist.set_error("disk gone");

    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert!(analysis.degraded_sources.contains(&"mock-hist".to_string()));
    assert!(!analysis.prediction.reduced_history);
    assert_eq!(h.orchestrator.match_cache().stats().stale_served, 1);

    // Recovery: once the source is back the next miss refreshes the entry.
    h.hist.clear_error();
    tokio::time::advance(Duration::from_secs(3601)).await;
    let analysis = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert!(!analysis.degraded_sources.contains(&"mock-hist".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_new_records_visible_after_cache_clear() {
    let h = harness();
    let first = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);

    h.hist.push(result("Arsenal", "Burnley", day(20), (0, 3)));
    let cached = assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert_eq!(cached.prediction, first.prediction);
    assert_eq!(h.hist.calls(), 1);

    h.orchestrator.match_cache().clear(None);
    assert_ok!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert_eq!(h.hist.calls(), 2);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_returns_nothing() {
    let h = harness();
    let (handle, token) = CancelHandle::new();
    handle.cancel();

    let err = assert_err!(h.orchestrator.run(&request(), &token).await);
    assert_eq!(err, EngineError::Cancelled { stage: "FETCHING".into() });
    assert_eq!(h.hist.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_discards_run() {
    let h = harness();
    h.hist.set_error("disk gone");
    let (handle, token) = CancelHandle::new();

    let req = request();
    let (result, _) = tokio::join!(h.orchestrator.run(&req, &token), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let err = assert_err!(result);
    assert!(matches!(err, EngineError::Cancelled { .. }), "got {err:?}");
    assert_eq!(h.hist.calls(), 1);
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_failed_request_does_not_affect_others() {
    let h = harness();
    let requests = vec![
        request(),
        MatchRequest::new("Sevilla", "Betis", target_date(), "la_liga", "soccer"),
    ];
    // The feed serves every league; only the historical source is scoped.
    h.feed.set_error("connection reset");

    let results = h.orchestrator.run_many(&requests, &CancelToken::never()).await;
    assert_eq!(results.len(), 2);
    assert_ok!(&results[0]);
    assert!(matches!(results[1], Err(EngineError::SourceUnavailable { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_arity_mismatch_errors_without_calling_model() {
    let mut model = MockModel::new();
    model.expect_arity().return_const(10usize);
    model.expect_predict_proba().times(0);
    let h = harness_with(MockOddsSource::with_quotes(EVENT, quotes()), Arc::new(model));

    let err = assert_err!(h.orchestrator.run(&request(), &CancelToken::never()).await);
    assert_eq!(err, EngineError::InvalidFeatureVector { expected: 10, actual: FEATURE_COUNT });
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_share_one_fetch_per_source() {
    let hist = Arc::new(
        MockMatchSource::new("mock-hist", SourceKind::Historical, history()).with_delay(Duration::from_millis(200)),
    );
    let sources: Vec<Arc<dyn MatchSource>> = vec![hist.clone()];
    let orchestrator = Orchestrator::new(&config(), sources, None, fixed_model(0.5, 0.3, 0.2));

    let requests: Vec<MatchRequest> = ["Everton", "Fulham", "Brentford", "Wolves", "Burnley"]
        .iter()
        .map(|away| MatchRequest::new("Arsenal", *away, target_date(), "premier_league", "soccer"))
        .collect();

    let results = orchestrator.run_many(&requests, &CancelToken::never()).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(hist.calls(), 1);
    assert_eq!(orchestrator.match_cache().stats().hits, 4);
}

#[tokio::test(start_paused = true)]
async fn test_batch_across_dates_fetches_each_source_once() {
    let h = harness();
    let later = target_date() + chrono::Duration::days(3);
    h.feed.push(upcoming("Everton", "Fulham", later, "soccer_epl:e2"));

    let requests = vec![
        request(),
        MatchRequest::new("Everton", "Fulham", later, "premier_league", "soccer"),
    ];
    let results = h.orchestrator.run_many(&requests, &CancelToken::never()).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.hist.calls(), 1);
    assert_eq!(h.feed.calls(), 1);
    assert_eq!(h.orchestrator.match_cache().stats().misses, 2);

    // Each run still sees only its own history window.
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.market, MarketStatus::Priced { quotes: 4 });
    let second = results[1].as_ref().unwrap();
    assert_eq!(second.market, MarketStatus::NoMarketData);
}

#[tokio::test(start_paused = true)]
async fn test_two_way_sport_runs_without_draw() {
    let game = |home: &str, away: &str, date, points: (u32, u32)| {
        let mut r = MatchRecord::new(home, away, date, "nba", "basketball", SourceKind::LiveFixtures, fetched_at());
        r.status = Some(MatchStatus::Finished);
        r.home_goals = Some(points.0);
        r.away_goals = Some(points.1);
        r
    };
    let mut records = Vec::new();
    for (i, opp) in ["Bulls", "Heat", "Hawks", "Magic", "Jazz", "Suns"].iter().enumerate() {
        let i = i as u32;
        records.push(game("Celtics", opp, day(i * 2), (118, 104)));
        records.push(game(opp, "Knicks", day(i * 2 + 1), (110, 107)));
    }
    let mut next = MatchRecord::new(
        "Celtics", "Knicks", target_date(), "nba", "basketball", SourceKind::LiveOdds, fetched_at(),
    );
    next.status = Some(MatchStatus::Scheduled);
    next.odds_event_id = Some("basketball_nba:g1".to_string());
    records.push(next);

    let feed = Arc::new(MockMatchSource::new("mock-games", SourceKind::LiveFixtures, records).serving("nba"));
    let odds = Arc::new(MockOddsSource::with_quotes(
        "basketball_nba:g1",
        vec![
            decimal_quote("draftkings", Outcome::Home, 1.60),
            decimal_quote("draftkings", Outcome::Away, 2.60),
        ],
    ));
    let mut model = MockModel::new();
    model.expect_arity().return_const(FEATURE_COUNT);
    model
        .expect_predict_proba()
        .returning(|_| Ok(BTreeMap::from([(Outcome::Home, 0.70), (Outcome::Away, 0.30)])));

    let sources: Vec<Arc<dyn MatchSource>> = vec![feed.clone()];
    let odds_source: Arc<dyn OddsSource> = odds.clone();
    let orchestrator = Orchestrator::new(&config(), sources, Some(odds_source), Arc::new(model));

    let req = MatchRequest::new("Celtics", "Knicks", target_date(), "nba", "basketball");
    let analysis = assert_ok!(orchestrator.run(&req, &CancelToken::never()).await);

    assert_eq!(analysis.market, MarketStatus::Priced { quotes: 2 });
    assert_eq!(analysis.prediction.outcome, Outcome::Home);
    assert!(!analysis.prediction.class_probabilities.contains_key(&Outcome::Draw));
    assert_eq!(analysis.recommendations.len(), 2);
    assert!(analysis.recommendations.iter().all(|r| r.outcome != Outcome::Draw));

    let best = analysis.best().unwrap();
    assert_eq!(best.outcome, Outcome::Home);
    assert_eq!(best.tier, RecommendationTier::Buy);
    assert!((best.edge - 0.12).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_discover_lists_upcoming_matches_only() {
    let h = harness();
    h.feed.push(upcoming("Everton", "Fulham", target_date() + chrono::Duration::days(1), "soccer_epl:e2"));
    h.hist.push(result("Wolves", "Luton", target_date() - chrono::Duration::days(1), (1, 0)));

    let from = target_date() - chrono::Duration::days(2);
    let to = target_date() + chrono::Duration::days(5);
    let requests = assert_ok!(
        h.orchestrator
            .discover("premier_league", "soccer", from, to, &CancelToken::never())
            .await
    );

    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].home, "Arsenal");
    assert_eq!(requests[0].odds_event_id.as_deref(), Some(EVENT));
    assert_eq!(requests[1].odds_event_id.as_deref(), Some("soccer_epl:e2"));
}

#[tokio::test(start_paused = true)]
async fn test_rank_all_orders_across_matches() {
    let h = harness();
    let analyses: Vec<_> = h
        .orchestrator
        .run_many(&[request()], &CancelToken::never())
        .await
        .into_iter()
        .filter_map(Result::ok)
        .collect();

    let ranked = Orchestrator::rank_all(&analyses);
    assert_eq!(ranked.len(), 3);
    for pair in ranked.windows(2) {
        assert!(pair[0].edge >= pair[1].edge);
    }
}
