//! Orchestrator: fetch → fuse → extract → predict → price → classify.
//!
//! Each request runs through a `PipelineRun`. Match sources are fetched
//! concurrently through the shared cache and joined before fusion. A
//! request fails only on request-level errors; one failing request never
//! affects others running alongside it.

pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{FetchCache, RetryPolicy};
use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::features::FeatureExtractor;
use crate::fusion;
use crate::market::{MarketBook, OddsAggregator};
use crate::prediction::{Classifier, PredictionAdapter};
use crate::sources::{FetchParams, MatchSource, OddsSource, SourceBatch};
use crate::strategy::{self, Recommender};
use crate::types::{
    BetRecommendation, EngineError, MarketStatus, MatchKey, MatchRecord, MatchStatus, Prediction, RawQuote,
};
use pipeline::{PipelineRun, PipelineStage};

// ---------------------------------------------------------------------------
// Requests & results
// ---------------------------------------------------------------------------

/// One match to analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub home: String,
    pub away: String,
    pub date: NaiveDate,
    pub league: String,
    pub sport: String,
    /// Odds feed event id, when already known.
    #[serde(default)]
    pub odds_event_id: Option<String>,
}

impl MatchRequest {
    pub fn new(
        home: impl Into<String>,
        away: impl Into<String>,
        date: NaiveDate,
        league: impl Into<String>,
        sport: impl Into<String>,
    ) -> Self {
        Self {
            home: home.into(),
            away: away.into(),
            date,
            league: league.into(),
            sport: sport.into(),
            odds_event_id: None,
        }
    }

    pub fn from_record(record: &MatchRecord) -> Self {
        Self {
            home: record.home_team.clone(),
            away: record.away_team.clone(),
            date: record.date,
            league: record.league.clone(),
            sport: record.sport.clone(),
            odds_event_id: record.odds_event_id.clone(),
        }
    }

    pub fn key(&self) -> MatchKey {
        MatchKey {
            date: self.date,
            league: self.league.to_lowercase(),
            home: self.home.clone(),
            away: self.away.clone(),
        }
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAnalysis {
    pub run_id: Uuid,
    pub request: MatchRequest,
    pub prediction: Prediction,
    pub market: MarketStatus,
    /// Ranked by edge, then expected value. Empty without market data.
    pub recommendations: Vec<BetRecommendation>,
    /// Sources that failed or were served stale for this run.
    pub degraded_sources: Vec<String>,
    pub dropped_records: usize,
    pub rejected_quotes: usize,
    pub stages: Vec<PipelineStage>,
}

impl MatchAnalysis {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_sources.is_empty()
    }

    pub fn best(&self) -> Option<&BetRecommendation> {
        self.recommendations.first()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    sources: Vec<Arc<dyn MatchSource>>,
    match_cache: Arc<FetchCache<SourceBatch>>,
    match_ttl: Duration,
    odds: Option<OddsAggregator>,
    extractor: FeatureExtractor,
    predictor: PredictionAdapter,
    recommender: Recommender,
    lookback_days: i64,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        sources: Vec<Arc<dyn MatchSource>>,
        odds_source: Option<Arc<dyn OddsSource>>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.fetch);
        let odds = odds_source.map(|source| {
            OddsAggregator::new(source, Arc::new(FetchCache::new(policy.clone())), config.fetch.odds_ttl())
        });

        Self {
            sources,
            match_cache: Arc::new(FetchCache::new(policy)),
            match_ttl: config.fetch.fixture_ttl(),
            odds,
            extractor: FeatureExtractor::new(config.engine.feature_window),
            predictor: PredictionAdapter::new(classifier, config.engine.reduced_history_penalty),
            recommender: Recommender::from_config(&config.engine),
            lookback_days: config.engine.lookback_days,
        }
    }

    pub fn match_cache(&self) -> &FetchCache<SourceBatch> {
        &self.match_cache
    }

    pub fn odds_cache(&self) -> Option<&FetchCache<Vec<RawQuote>>> {
        self.odds.as_ref().map(|o| o.cache())
    }

    /// Analyze one match. Cancellation is honoured between stages and
    /// during fetch backoff; a cancelled run returns no partial result.
    pub async fn run(&self, request: &MatchRequest, cancel: &CancelToken) -> Result<MatchAnalysis, EngineError> {
        let window = self.history_window(request);
        self.run_in_window(request, &window, cancel).await
    }

    /// Run one request against a fetch window that covers its own history
    /// window. Records outside the request's window are ignored.
    async fn run_in_window(
        &self,
        request: &MatchRequest,
        fetch: &FetchParams,
        cancel: &CancelToken,
    ) -> Result<MatchAnalysis, EngineError> {
        let mut run = PipelineRun::new();
        let key = request.key();
        debug!(run_id = %run.id(), match_key = %key, "Pipeline started");

        match self.execute(&mut run, request, &key, fetch, cancel).await {
            Ok(analysis) => Ok(analysis),
            Err(e) => {
                let stage = run.stage();
                run.fail();
                match &e {
                    EngineError::Cancelled { .. } => {
                        warn!(run_id = %run.id(), match_key = %key, stage = %stage, "Pipeline cancelled")
                    }
                    _ => error!(run_id = %run.id(), match_key = %key, stage = %stage, error = %e, "Pipeline failed"),
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        request: &MatchRequest,
        key: &MatchKey,
        fetch: &FetchParams,
        cancel: &CancelToken,
    ) -> Result<MatchAnalysis, EngineError> {
        run.check_cancel(cancel)?;

        // FETCHING: match sources, plus odds when the event id is known.
        let (batches, prefetched) = tokio::join!(
            self.fetch_sources(fetch, cancel),
            self.collect_odds(request.odds_event_id.as_deref(), cancel),
        );
        let (batches, mut degraded, dropped) = batches?;
        let window = self.history_window(request);
        let batches: Vec<Vec<MatchRecord>> = batches
            .into_iter()
            .map(|batch| batch.into_iter().filter(|r| window.contains(r.date)).collect())
            .collect();

        run.advance(cancel)?;
        let fused = fusion::fuse(&batches);

        run.advance(cancel)?;
        let extraction = self.extractor.extract(&fused.records, key)?;

        run.advance(cancel)?;
        let prediction = self.predictor.predict(&extraction.vector, extraction.reduced_history)?;

        run.advance(cancel)?;
        let odds_result = match prefetched {
            Some(result) => Some(result),
            None => {
                let event_id = fused
                    .records
                    .iter()
                    .find(|r| &r.key() == key)
                    .and_then(|r| r.odds_event_id.clone());
                self.collect_odds(event_id.as_deref(), cancel).await
            }
        };
        let book = match odds_result {
            Some(Ok(book)) => {
                if book.degraded {
                    degraded.push(self.odds_name());
                }
                Some(book)
            }
            Some(Err(e @ EngineError::Cancelled { .. })) => return Err(e),
            Some(Err(e)) => {
                warn!(match_key = %key, error = %e, "Odds unavailable, continuing without market data");
                degraded.push(self.odds_name());
                None
            }
            None => None,
        };
        let rejected_quotes = book.as_ref().map_or(0, |b| b.rejected);
        let book = book.filter(|b| !b.is_empty());
        let market = match &book {
            Some(b) => MarketStatus::Priced { quotes: b.quotes.len() },
            None => MarketStatus::NoMarketData,
        };

        run.advance(cancel)?;
        let recommendations = match &book {
            Some(b) => self.recommender.recommend(key, &prediction, b)?,
            None => {
                info!(match_key = %key, outcome = %prediction.outcome, "No market data, prediction only");
                Vec::new()
            }
        };

        run.advance(cancel)?;
        debug!(
            run_id = %run.id(),
            match_key = %key,
            recommendations = recommendations.len(),
            degraded = degraded.len(),
            "Pipeline done"
        );

        Ok(MatchAnalysis {
            run_id: run.id(),
            request: request.clone(),
            prediction,
            market,
            recommendations,
            degraded_sources: degraded,
            dropped_records: dropped,
            rejected_quotes,
            stages: run.trail().to_vec(),
        })
    }

    /// Analyze many matches concurrently. Results keep request order.
    ///
    /// Requests for the same league share one fetch window spanning all of
    /// their history windows, so each source is fetched once per league
    /// however many match dates the batch covers.
    pub async fn run_many(
        &self,
        requests: &[MatchRequest],
        cancel: &CancelToken,
    ) -> Vec<Result<MatchAnalysis, EngineError>> {
        let mut windows: HashMap<(String, String), FetchParams> = HashMap::new();
        for request in requests {
            let own = self.history_window(request);
            windows
                .entry((own.league.to_lowercase(), own.sport.clone()))
                .and_modify(|w| {
                    w.from = w.from.min(own.from);
                    w.to = w.to.max(own.to);
                })
                .or_insert(own);
        }
        info!(count = requests.len(), windows = windows.len(), "Analyzing matches");

        let results = join_all(requests.iter().map(|r| {
            let window = windows
                .get(&(r.league.to_lowercase(), r.sport.clone()))
                .cloned()
                .unwrap_or_else(|| self.history_window(r));
            async move { self.run_in_window(r, &window, cancel).await }
        }))
        .await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        info!(succeeded = ok, failed = results.len() - ok, "Batch complete");
        results
    }

    /// Upcoming matches in `[from, to]`: fused records without a final score.
    pub async fn discover(
        &self,
        league: &str,
        sport: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<Vec<MatchRequest>, EngineError> {
        let params = FetchParams {
            league: league.to_string(),
            sport: sport.to_string(),
            from,
            to,
        };
        let (batches, degraded, _) = self.fetch_sources(&params, cancel).await?;
        let fused = fusion::fuse(&batches);

        let requests: Vec<MatchRequest> = fused
            .records
            .iter()
            .filter(|r| !r.is_completed() && r.status != Some(MatchStatus::Finished))
            .map(MatchRequest::from_record)
            .collect();

        info!(
            league,
            from = %from,
            to = %to,
            matches = requests.len(),
            degraded = ?degraded,
            "Discovered upcoming matches"
        );
        Ok(requests)
    }

    /// Global ranking across analyses: edge desc, then expected value desc.
    pub fn rank_all(analyses: &[MatchAnalysis]) -> Vec<BetRecommendation> {
        let mut all: Vec<BetRecommendation> = analyses
            .iter()
            .flat_map(|a| a.recommendations.iter().cloned())
            .collect();
        strategy::rank(&mut all);
        all
    }

    // -- Fetch helpers ---------------------------------------------------

    /// The lookback window ending on the match date.
    fn history_window(&self, request: &MatchRequest) -> FetchParams {
        FetchParams {
            league: request.league.clone(),
            sport: request.sport.clone(),
            from: request
                .date
                .checked_sub_signed(ChronoDuration::days(self.lookback_days))
                .unwrap_or(NaiveDate::MIN),
            to: request.date,
        }
    }

    /// Fetch every source that serves the league, concurrently, through the
    /// match cache. Fails only when no source produced anything.
    async fn fetch_sources(
        &self,
        params: &FetchParams,
        cancel: &CancelToken,
    ) -> Result<(Vec<Vec<MatchRecord>>, Vec<String>, usize), EngineError> {
        let active: Vec<&Arc<dyn MatchSource>> = self.sources.iter().filter(|s| s.serves(&params.league)).collect();
        if active.is_empty() {
            return Err(EngineError::SourceUnavailable {
                key: params.cache_key(),
                attempts: 0,
                message: format!("no source serves league {}", params.league),
            });
        }

        let results = join_all(active.iter().map(|source| {
            let key = format!("{}:{}", source.name(), params.cache_key());
            async move {
                let fetched = self
                    .match_cache
                    .get_or_fetch_with_cancel(&key, self.match_ttl, cancel, || source.fetch(params))
                    .await;
                (source.name().to_string(), fetched)
            }
        }))
        .await;

        let mut batches = Vec::new();
        let mut degraded = Vec::new();
        let mut dropped = 0;
        let mut last_error = None;

        for (name, result) in results {
            match result {
                Ok(fetched) => {
                    if fetched.is_degraded() {
                        degraded.push(name.clone());
                    }
                    debug!(
                        source = %name,
                        records = fetched.value.records.len(),
                        dropped = fetched.value.dropped,
                        freshness = ?fetched.freshness,
                        "Source batch ready"
                    );
                    dropped += fetched.value.dropped;
                    batches.push(fetched.value.records);
                }
                Err(e @ EngineError::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    warn!(source = %name, error = %e, "Source failed, continuing without it");
                    degraded.push(name);
                    last_error = Some(e);
                }
            }
        }

        if batches.is_empty() {
            return Err(last_error.unwrap_or_else(|| EngineError::SourceUnavailable {
                key: params.cache_key(),
                attempts: 0,
                message: "every source failed".into(),
            }));
        }

        Ok((batches, degraded, dropped))
    }

    async fn collect_odds(
        &self,
        event_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Option<Result<MarketBook, EngineError>> {
        let odds = self.odds.as_ref()?;
        let event_id = event_id?;
        Some(odds.collect_with_cancel(event_id, cancel).await)
    }

    fn odds_name(&self) -> String {
        self.odds.as_ref().map(|o| o.source_name().to_string()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, RecommendationTier};
    use std::collections::BTreeMap;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn rec(home: &str, edge: f64, ev: f64) -> BetRecommendation {
        BetRecommendation {
            match_key: MatchKey { date: date(1), league: "epl".into(), home: home.into(), away: "X".into() },
            outcome: Outcome::Home,
            probability: 0.6,
            confidence: 0.6,
            bookmaker: "b".into(),
            decimal_odds: 2.0,
            implied_probability: 0.5,
            edge,
            expected_value: ev,
            kelly_fraction: 0.2,
            stake_fraction: 0.05,
            suggested_stake: 50.0,
            tier: RecommendationTier::Buy,
            reduced_history: false,
        }
    }

    fn analysis(recs: Vec<BetRecommendation>) -> MatchAnalysis {
        MatchAnalysis {
            run_id: Uuid::new_v4(),
            request: MatchRequest::new("A", "B", date(1), "epl", "soccer"),
            prediction: Prediction {
                class_probabilities: BTreeMap::from([(Outcome::Home, 1.0)]),
                outcome: Outcome::Home,
                probability: 1.0,
                confidence: 1.0,
                reduced_history: false,
            },
            market: MarketStatus::Priced { quotes: recs.len() },
            recommendations: recs,
            degraded_sources: Vec::new(),
            dropped_records: 0,
            rejected_quotes: 0,
            stages: Vec::new(),
        }
    }

    #[test]
    fn test_request_key_lowercases_league() {
        let r = MatchRequest::new("Arsenal", "Chelsea", date(4), "Premier_League", "soccer");
        assert_eq!(r.key().league, "premier_league");
        assert_eq!(r.key().home, "Arsenal");
    }

    #[test]
    fn test_request_from_record_carries_event_id() {
        let mut record = MatchRecord::new(
            "Arsenal", "Chelsea", date(4), "premier_league", "soccer",
            crate::types::SourceKind::LiveOdds, chrono::Utc::now(),
        );
        record.odds_event_id = Some("soccer_epl:abc".into());
        let r = MatchRequest::from_record(&record);
        assert_eq!(r.odds_event_id.as_deref(), Some("soccer_epl:abc"));
        assert_eq!(r.key(), record.key());
    }

    #[test]
    fn test_rank_all_merges_and_orders() {
        let analyses = vec![
            analysis(vec![rec("A", 0.04, 0.1), rec("B", 0.12, 0.2)]),
            analysis(vec![rec("C", 0.12, 0.4)]),
            analysis(vec![]),
        ];
        let ranked = Orchestrator::rank_all(&analyses);
        let homes: Vec<&str> = ranked.iter().map(|r| r.match_key.home.as_str()).collect();
        assert_eq!(homes, vec!["C", "B", "A"]);
    }
}
