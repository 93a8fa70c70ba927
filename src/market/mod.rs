//! Odds aggregation across bookmakers.
//!
//! Quotes are fetched through the shared `FetchCache` with the odds TTL,
//! normalized to decimal odds, and reduced to the best price per outcome.
//! The full accepted quote list is kept on the book for reporting; quotes
//! that fail normalization are counted and excluded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::FetchCache;
use crate::cancel::CancelToken;
use crate::sources::OddsSource;
use crate::types::{EngineError, OddsQuote, Outcome, RawQuote};

/// Normalized quotes for one event.
#[derive(Debug, Clone, Default)]
pub struct MarketBook {
    pub event_id: String,
    /// Every accepted quote, one per (bookmaker, outcome).
    pub quotes: Vec<OddsQuote>,
    /// Highest decimal odds per outcome.
    pub best: BTreeMap<Outcome, OddsQuote>,
    /// Quotes dropped for invalid prices.
    pub rejected: usize,
    /// Served from an expired cache entry.
    pub degraded: bool,
}

impl MarketBook {
    pub fn from_raw(event_id: &str, raw: &[RawQuote], degraded: bool) -> Self {
        let mut by_key: HashMap<(String, Outcome), OddsQuote> = HashMap::new();
        let mut rejected = 0;

        for q in raw {
            match OddsQuote::try_from(q) {
                Ok(quote) => {
                    let key = (quote.bookmaker.clone(), quote.outcome);
                    match by_key.get(&key) {
                        Some(existing) if existing.fetched_at >= quote.fetched_at => {}
                        _ => {
                            by_key.insert(key, quote);
                        }
                    }
                }
                Err(e) => {
                    debug!(event_id, bookmaker = %q.bookmaker, price = %q.price, error = %e, "Quote rejected");
                    rejected += 1;
                }
            }
        }

        let mut quotes: Vec<OddsQuote> = by_key.into_values().collect();
        quotes.sort_by(|a, b| a.outcome.cmp(&b.outcome).then_with(|| a.bookmaker.cmp(&b.bookmaker)));

        let mut best: BTreeMap<Outcome, OddsQuote> = BTreeMap::new();
        for q in &quotes {
            let better = match best.get(&q.outcome) {
                None => true,
                // Sorted by bookmaker, so strict > keeps the first name on ties.
                Some(current) => q.decimal_odds > current.decimal_odds,
            };
            if better {
                best.insert(q.outcome, q.clone());
            }
        }

        Self {
            event_id: event_id.to_string(),
            quotes,
            best,
            rejected,
            degraded,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn quotes_for(&self, outcome: Outcome) -> impl Iterator<Item = &OddsQuote> {
        self.quotes.iter().filter(move |q| q.outcome == outcome)
    }
}

pub struct OddsAggregator {
    source: Arc<dyn OddsSource>,
    cache: Arc<FetchCache<Vec<RawQuote>>>,
    ttl: Duration,
}

impl OddsAggregator {
    pub fn new(source: Arc<dyn OddsSource>, cache: Arc<FetchCache<Vec<RawQuote>>>, ttl: Duration) -> Self {
        Self { source, cache, ttl }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn cache(&self) -> &FetchCache<Vec<RawQuote>> {
        &self.cache
    }

    pub async fn collect(&self, event_id: &str) -> Result<MarketBook, EngineError> {
        self.collect_with_cancel(event_id, &CancelToken::never()).await
    }

    pub async fn collect_with_cancel(&self, event_id: &str, cancel: &CancelToken) -> Result<MarketBook, EngineError> {
        let key = format!("{}:odds:{}", self.source.name(), event_id);
        let fetched = self
            .cache
            .get_or_fetch_with_cancel(&key, self.ttl, cancel, || self.source.fetch_quotes(event_id))
            .await?;

        let book = MarketBook::from_raw(event_id, &fetched.value, fetched.is_degraded());
        if book.rejected > 0 {
            warn!(event_id, rejected = book.rejected, accepted = book.quotes.len(), "Invalid quotes excluded");
        }
        debug!(
            event_id,
            quotes = book.quotes.len(),
            outcomes = book.best.len(),
            degraded = book.degraded,
            "Market book built"
        );
        Ok(book)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
