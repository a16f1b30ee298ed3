//! Rate-limited, TTL-cached access to upstream data feeds.
//!
//! [`RateLimitedCache::fetch_through`] is the only way the rest of the crate
//! talks to an upstream source:
//!
//! 1. a fresh cache entry is served without touching the feed;
//! 2. otherwise one request is reserved against the source's
//!    [`RateBudget`]; an exhausted monthly quota is a hard
//!    [`UpstreamError::QuotaExhausted`];
//! 3. the feed is called and the result written through to the cache;
//! 4. if the call fails, a stale cache entry is served instead when one
//!    exists.
//!
//! The reservation is made before the request, in one atomic step on the
//! ledger, so overlapping runs can never push usage past the quota.

pub mod budget;
pub mod cache;
pub mod feed;

pub use budget::{BudgetDecision, BudgetLimits, BudgetStatus, RateBudget};
pub use cache::{CacheClass, CacheEntry, CacheStore, Lookup, MemoryStore, TtlCache, TtlPolicy};
pub use feed::{FileFeed, HttpJsonFeed, UpstreamFeed};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("monthly quota exhausted for {feed}: {used}/{quota} requests used")]
    QuotaExhausted { feed: String, used: u32, quota: u32 },

    #[error("upstream fetch failed: {0:#}")]
    Fetch(anyhow::Error),

    #[error("cache storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("failed to decode upstream document: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persistent rate-budget state, one [`RateBudget`] per source.
pub trait BudgetLedger: Send + Sync {
    /// Current budget (rolled over to `today`, limits refreshed).
    fn snapshot(&self, source: &str, limits: BudgetLimits, today: NaiveDate) -> Result<RateBudget>;

    /// Atomically check and, when allowed, record `n` requests.
    fn try_consume(
        &self,
        source: &str,
        limits: BudgetLimits,
        n: u32,
        today: NaiveDate,
    ) -> Result<BudgetDecision>;
}

/// In-process ledger for tests and one-shot runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    budgets: Arc<Mutex<HashMap<String, RateBudget>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_budget<T>(
        &self,
        source: &str,
        limits: BudgetLimits,
        today: NaiveDate,
        f: impl FnOnce(&mut RateBudget) -> T,
    ) -> Result<T> {
        let mut budgets = self
            .budgets
            .lock()
            .map_err(|_| anyhow::anyhow!("budget ledger lock poisoned"))?;
        let budget = budgets
            .entry(source.to_string())
            .or_insert_with(|| RateBudget::new(source, limits, today));
        budget.limits = limits;
        budget.roll_over(today);
        Ok(f(budget))
    }
}

impl BudgetLedger for MemoryLedger {
    fn snapshot(&self, source: &str, limits: BudgetLimits, today: NaiveDate) -> Result<RateBudget> {
        self.with_budget(source, limits, today, |b| b.clone())
    }

    fn try_consume(
        &self,
        source: &str,
        limits: BudgetLimits,
        n: u32,
        today: NaiveDate,
    ) -> Result<BudgetDecision> {
        self.with_budget(source, limits, today, |b| b.try_consume(n, today))
    }
}

/// Where a fetched value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Cache,
    Upstream,
    /// Upstream failed; an expired cache entry was served
    StaleCache,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    pub value: serde_json::Value,
    pub source: FetchSource,
    pub stored_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimitedCache {
    cache: TtlCache,
    ledger: Arc<dyn BudgetLedger>,
    limits: BudgetLimits,
}

impl RateLimitedCache {
    pub fn new(cache: TtlCache, ledger: Arc<dyn BudgetLedger>, limits: BudgetLimits) -> Self {
        Self {
            cache,
            ledger,
            limits,
        }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn budget_status(&self, source: &str, today: NaiveDate) -> Result<BudgetStatus> {
        Ok(self
            .ledger
            .snapshot(source, self.limits, today)?
            .status(today))
    }

    pub async fn fetch_through(
        &self,
        feed: &dyn UpstreamFeed,
        class: CacheClass,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<FetchOutcome, UpstreamError> {
        let stale = match self
            .cache
            .lookup(class, key, now)
            .map_err(UpstreamError::Storage)?
        {
            Lookup::Hit(entry) => {
                return Ok(FetchOutcome {
                    value: entry.value,
                    source: FetchSource::Cache,
                    stored_at: entry.stored_at,
                })
            }
            Lookup::Stale(entry) => Some(entry),
            Lookup::Miss => None,
        };

        let today = now.date_naive();
        let decision = self
            .ledger
            .try_consume(feed.name(), self.limits, 1, today)
            .map_err(UpstreamError::Storage)?;
        match decision {
            BudgetDecision::QuotaExhausted { used, quota } => {
                warn!("{}: monthly quota exhausted ({}/{})", feed.name(), used, quota);
                return Err(UpstreamError::QuotaExhausted {
                    feed: feed.name().to_string(),
                    used,
                    quota,
                });
            }
            BudgetDecision::DailyBudgetLow { .. } => {
                warn!("{}: {}", feed.name(), decision);
            }
            BudgetDecision::Allowed => {}
        }

        match feed.fetch(key).await {
            Ok(value) => {
                let entry = self
                    .cache
                    .put(class, key, value, now)
                    .map_err(UpstreamError::Storage)?;
                debug!("{}: stored {}/{}", feed.name(), class, key);
                Ok(FetchOutcome {
                    value: entry.value,
                    source: FetchSource::Upstream,
                    stored_at: entry.stored_at,
                })
            }
            Err(e) => match stale {
                Some(entry) => {
                    warn!(
                        "{}: fetch of {} failed ({:#}); serving cache from {}",
                        feed.name(),
                        key,
                        e,
                        entry.stored_at
                    );
                    Ok(FetchOutcome {
                        value: entry.value,
                        source: FetchSource::StaleCache,
                        stored_at: entry.stored_at,
                    })
                }
                None => Err(UpstreamError::Fetch(e)),
            },
        }
    }

    /// Fetch and decode into `T`.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        feed: &dyn UpstreamFeed,
        class: CacheClass,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(T, FetchSource), UpstreamError> {
        let outcome = self.fetch_through(feed, class, key, now).await?;
        Ok((serde_json::from_value(outcome.value)?, outcome.source))
    }
}
