//! TTL cache over an injected key/value store.
//!
//! Entries are keyed by (class, key). Each class has its own staleness
//! tolerance; a read is a hit only if the entry exists and is younger than
//! the class TTL. Stale entries are still returned as [`Lookup::Stale`] so a
//! caller can fall back to them when a refetch fails.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Logical resource classes with independent TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    DailyPicks,
    LearningInsights,
    GameResults,
    TeamStats,
    LiveOdds,
    BetStats,
}

impl CacheClass {
    pub const ALL: [CacheClass; 6] = [
        CacheClass::DailyPicks,
        CacheClass::LearningInsights,
        CacheClass::GameResults,
        CacheClass::TeamStats,
        CacheClass::LiveOdds,
        CacheClass::BetStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::DailyPicks => "daily_picks",
            CacheClass::LearningInsights => "learning_insights",
            CacheClass::GameResults => "game_results",
            CacheClass::TeamStats => "team_stats",
            CacheClass::LiveOdds => "live_odds",
            CacheClass::BetStats => "bet_stats",
        }
    }

    pub fn default_ttl_secs(&self) -> i64 {
        match self {
            CacheClass::DailyPicks => 24 * 3600,
            CacheClass::LearningInsights => 6 * 3600,
            CacheClass::GameResults => 3600,
            CacheClass::TeamStats => 24 * 3600,
            CacheClass::LiveOdds => 3 * 3600,
            CacheClass::BetStats => 5 * 60,
        }
    }
}

impl fmt::Display for CacheClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase().replace('-', "_");
        CacheClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown cache class: {s}"))
    }
}

/// Per-class TTL overrides in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub overrides: BTreeMap<CacheClass, i64>,
}

impl TtlPolicy {
    pub fn ttl(&self, class: CacheClass) -> Duration {
        let secs = self
            .overrides
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_ttl_secs());
        Duration::seconds(secs.max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub class: CacheClass,
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

/// Key/value persistence behind the cache.
pub trait CacheStore: Send + Sync {
    fn get(&self, class: CacheClass, key: &str) -> Result<Option<CacheEntry>>;
    /// Insert or replace.
    fn put(&self, entry: &CacheEntry) -> Result<()>;
    /// Remove every entry of `class`, or everything when `None`. Returns the
    /// number of entries removed.
    fn clear(&self, class: Option<CacheClass>) -> Result<usize>;
    fn list(&self) -> Result<Vec<CacheEntry>>;
}

/// In-process store, mainly for tests and one-shot runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<(CacheClass, String), CacheEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(CacheClass, String), CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache lock poisoned"))
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, class: CacheClass, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.lock()?.get(&(class, key.to_string())).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.lock()?
            .insert((entry.class, entry.key.clone()), entry.clone());
        Ok(())
    }

    fn clear(&self, class: Option<CacheClass>) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|(c, _), _| class.is_some_and(|target| *c != target));
        Ok(before - entries.len())
    }

    fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut all: Vec<CacheEntry> = self.lock()?.values().cloned().collect();
        all.sort_by(|a, b| (a.class, &a.key).cmp(&(b.class, &b.key)));
        Ok(all)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(CacheEntry),
    /// Present but older than the class TTL
    Stale(CacheEntry),
    Miss,
}

/// Age and validity of one stored entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryStatus {
    pub class: CacheClass,
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub age_secs: i64,
    pub ttl_secs: i64,
    pub fresh: bool,
}

#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn CacheStore>,
    policy: TtlPolicy,
}

impl TtlCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: TtlPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let age = now - entry.stored_at;
        age < self.policy.ttl(entry.class)
    }

    pub fn lookup(&self, class: CacheClass, key: &str, now: DateTime<Utc>) -> Result<Lookup> {
        let lookup = match self.store.get(class, key)? {
            Some(entry) if self.is_fresh(&entry, now) => Lookup::Hit(entry),
            Some(entry) => Lookup::Stale(entry),
            None => Lookup::Miss,
        };
        debug!(
            "Cache {}/{}: {}",
            class,
            key,
            match &lookup {
                Lookup::Hit(_) => "hit",
                Lookup::Stale(_) => "stale",
                Lookup::Miss => "miss",
            }
        );
        Ok(lookup)
    }

    /// Fresh value or `None`.
    pub fn get_fresh(&self, class: CacheClass, key: &str, now: DateTime<Utc>) -> Result<Option<serde_json::Value>> {
        Ok(match self.lookup(class, key, now)? {
            Lookup::Hit(entry) => Some(entry.value),
            Lookup::Stale(_) | Lookup::Miss => None,
        })
    }

    pub fn put(&self, class: CacheClass, key: &str, value: serde_json::Value, now: DateTime<Utc>) -> Result<CacheEntry> {
        let entry = CacheEntry {
            class,
            key: key.to_string(),
            value,
            stored_at: now,
        };
        self.store.put(&entry)?;
        Ok(entry)
    }

    pub fn clear(&self, class: Option<CacheClass>) -> Result<usize> {
        self.store.clear(class)
    }

    pub fn status(&self, now: DateTime<Utc>) -> Result<Vec<EntryStatus>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|e| EntryStatus {
                age_secs: (now - e.stored_at).num_seconds(),
                ttl_secs: self.policy.ttl(e.class).num_seconds(),
                fresh: self.is_fresh(&e, now),
                class: e.class,
                key: e.key,
                stored_at: e.stored_at,
            })
            .collect())
    }
}
