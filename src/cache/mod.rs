//! TTL fetch cache with retry, backoff, and stale fallback.
//!
//! `FetchCache` wraps any fallible async fetch. Live entries are served
//! without calling the source. Misses go through a bounded retry loop with
//! exponential backoff and a per-attempt timeout. When every attempt fails
//! and an expired entry exists, that entry is served with a degraded flag
//! instead of an error.
//!
//! Concurrent callers for the same key are coalesced: one performs the
//! fetch while the rest wait on a per-key async lock and then take its
//! outcome, failures and stale fallbacks included. Different keys never
//! wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::FetchConfig;
use crate::types::EngineError;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded retry schedule for one cache fill.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Budget for a single attempt; expiry counts as a failed attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &FetchConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: cfg.retry_backoff_multiplier,
            attempt_timeout: cfg.request_timeout(),
        }
    }

    /// Delay after failed attempt number `attempt` (0-based):
    /// `base_delay × multiplier^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        Duration::from_nanos(nanos.round() as u64)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fetched by this call.
    Fresh,
    /// Served from a live entry (including one filled by a concurrent caller).
    Cached,
    /// Every attempt failed; served from an expired entry.
    Stale,
}

#[derive(Debug, Clone)]
pub struct Fetched<V> {
    pub value: V,
    pub freshness: Freshness,
}

impl<V> Fetched<V> {
    pub fn is_degraded(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Individual fetch attempts, retries included.
    pub fetch_attempts: u64,
    pub stale_served: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetch_attempts: AtomicU64,
    stale_served: AtomicU64,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry<V> {
    payload: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// Per-key lock. The holder that fills the key leaves its outcome here for
/// callers still queued behind it.
type Gate<V> = Arc<tokio::sync::Mutex<Option<Result<Fetched<V>, EngineError>>>>;

pub struct FetchCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    gates: Mutex<HashMap<String, Gate<V>>>,
    policy: RetryPolicy,
    counters: Counters,
}

impl<V: Clone + Send + Sync> FetchCache<V> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            policy,
            counters: Counters::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Return the live entry for `key`, or fill it via `fetch_fn`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch_fn: F,
    ) -> Result<Fetched<V>, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.get_or_fetch_with_cancel(key, ttl, &CancelToken::never(), fetch_fn)
            .await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), but gives up between
    /// attempts once `cancel` fires.
    pub async fn get_or_fetch_with_cancel<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancelToken,
        fetch_fn: F,
    ) -> Result<Fetched<V>, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if let Some(value) = self.live(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit");
            return Ok(Fetched { value, freshness: Freshness::Cached });
        }

        let gate = self.gate(key);
        let mut slot = gate.lock().await;

        // Another caller may have filled the entry while we waited.
        let result = if let Some(value) = self.live(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit after waiting on in-flight fetch");
            Ok(Fetched { value, freshness: Freshness::Cached })
        } else if let Some(shared) = slot.as_ref() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, ok = shared.is_ok(), "Taking outcome of in-flight fetch");
            shared.clone().map(|fetched| match fetched.freshness {
                Freshness::Stale => fetched,
                _ => Fetched { freshness: Freshness::Cached, ..fetched },
            })
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache miss");
            let outcome = self.fill(key, ttl, cancel, fetch_fn).await;
            // A cancelled leader hands the fetch to the next waiter instead.
            if !matches!(outcome, Err(EngineError::Cancelled { .. })) {
                *slot = Some(outcome.clone());
            }
            outcome
        };

        drop(slot);
        self.release_gate(key, &gate);
        result
    }

    async fn fill<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancelToken,
        mut fetch_fn: F,
    ) -> Result<Fetched<V>, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let mut last_error = String::from("no attempt made");
        let mut attempts = 0;

        for attempt in 0..self.policy.max_attempts() {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                debug!(key, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(EngineError::Cancelled { stage: format!("fetch {key}") });
                    }
                }
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled { stage: format!("fetch {key}") });
            }

            attempts += 1;
            self.counters.fetch_attempts.fetch_add(1, Ordering::Relaxed);

            match tokio::time::timeout(self.policy.attempt_timeout, fetch_fn()).await {
                Ok(Ok(value)) => {
                    self.store(key, value.clone(), ttl);
                    if attempt > 0 {
                        info!(key, attempts, "Fetch succeeded after retry");
                    }
                    return Ok(Fetched { value, freshness: Freshness::Fresh });
                }
                Ok(Err(e)) => {
                    last_error = format!("{e:#}");
                    warn!(key, attempt = attempts, error = %last_error, "Fetch attempt failed");
                }
                Err(_) => {
                    last_error = format!(
                        "timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    );
                    warn!(key, attempt = attempts, "Fetch attempt timed out");
                }
            }
        }

        if let Some(value) = self.stale(key) {
            self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
            warn!(key, attempts, error = %last_error, "All attempts failed, serving stale entry");
            return Ok(Fetched { value, freshness: Freshness::Stale });
        }

        Err(EngineError::SourceUnavailable {
            key: key.to_string(),
            attempts,
            message: last_error,
        })
    }

    /// Evict one entry, or everything when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        let mut entries = self.entries();
        match key {
            Some(k) => {
                entries.remove(k);
                debug!(key = k, "Cache entry cleared");
            }
            None => {
                let n = entries.len();
                entries.clear();
                info!(evicted = n, "Cache cleared");
            }
        }
    }

    /// Drop expired entries. They are otherwise kept as stale fallbacks.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetch_attempts: self.counters.fetch_attempts.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
        }
    }

    // -- internals --

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // The map stays consistent even if a holder panicked.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<String, Gate<V>>> {
        self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.payload.clone())
    }

    fn stale(&self, key: &str) -> Option<V> {
        self.entries().get(key).map(|entry| entry.payload.clone())
    }

    fn store(&self, key: &str, payload: V, ttl: Duration) {
        self.entries().insert(
            key.to_string(),
            CacheEntry { payload, inserted_at: Instant::now(), ttl },
        );
    }

    fn gate(&self, key: &str) -> Gate<V> {
        self.gates().entry(key.to_string()).or_default().clone()
    }

    /// Forget the per-key lock once no other caller holds a handle to it.
    fn release_gate(&self, key: &str, gate: &Gate<V>) {
        let mut gates = self.gates();
        // One reference in the map, one held by the caller.
        if Arc::strong_count(gate) <= 2 {
            gates.remove(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
