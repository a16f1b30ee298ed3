use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bot::{PredictorParams, RankingFilters, ResolverPolicy, ScoreTiers, WeightParams};
use crate::db::models::{BetResult, League};
use crate::upstream::{BudgetLimits, CacheClass, TtlPolicy};

/// Adaptive wager ranking with learned bet-type weights
#[derive(Parser, Debug, Clone)]
#[command(name = "larlbot", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "larlbot.db", global = true)]
    pub database_path: String,

    /// JSON file overriding heuristic constants (see `Tuning`)
    #[arg(long, env = "TUNING_FILE", global = true)]
    pub tuning_file: Option<PathBuf>,

    /// Monthly request quota of the rate-limited data feeds
    #[arg(long, env = "ODDS_MONTHLY_QUOTA", default_value = "20000", global = true)]
    pub odds_monthly_quota: u32,

    /// Advisory daily request budget (warning only)
    #[arg(long, env = "ODDS_DAILY_BUDGET", default_value = "666", global = true)]
    pub odds_daily_budget: u32,

    /// Upstream HTTP timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10", global = true)]
    pub http_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Score, resolve and rank a batch of candidate bets
    Rank {
        /// JSON array of game candidates
        candidates: PathBuf,

        /// JSON array of per-game notes (injuries, neutral site)
        #[arg(long)]
        notes: Option<PathBuf>,

        /// Append the ranked bets to the history as PENDING
        #[arg(long, default_value = "false")]
        record: bool,

        /// Override the tuning's top_n
        #[arg(long)]
        top_n: Option<usize>,
    },

    /// Recompute adaptive weights from the resolved bet history
    RefreshWeights,

    /// Set the result of a recorded bet (WIN, LOSS, PUSH, PENDING)
    MarkResult { id: i64, result: BetResult },

    /// Store a team-stat table in the cache for one league
    ImportStats { league: League, file: PathBuf },

    /// Fetch a league's team-stat table through the rate-limited cache.
    /// The document requested is `<feed>/<league>` (`<league>.json` for a
    /// directory feed).
    FetchStats {
        league: League,

        /// Base URL (http/https) or a directory of JSON documents
        #[arg(long, env = "STATS_FEED")]
        feed: String,

        /// API key appended to HTTP feed requests
        #[arg(long, env = "STATS_API_KEY")]
        api_key: Option<String>,
    },

    /// Show the request budget of an upstream source
    Budget {
        #[arg(default_value = "stats")]
        source: String,
    },

    /// List cached entries with their age and validity
    CacheStatus {
        /// Drop every entry of this class first
        #[arg(long)]
        clear: Option<CacheClass>,

        /// Drop the whole cache first
        #[arg(long, default_value = "false", conflicts_with = "clear")]
        clear_all: bool,
    },
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.database_path.trim().is_empty() {
            anyhow::bail!("database_path must not be empty");
        }
        if self.odds_monthly_quota == 0 {
            anyhow::bail!("odds_monthly_quota must be positive");
        }
        if self.odds_daily_budget == 0 || self.odds_daily_budget > self.odds_monthly_quota {
            anyhow::bail!("odds_daily_budget must be between 1 and odds_monthly_quota");
        }
        if !(1..=300).contains(&self.http_timeout_secs) {
            anyhow::bail!("http_timeout_secs must be between 1 and 300");
        }
        if let Command::Rank { top_n: Some(0), .. } = self.command {
            anyhow::bail!("--top-n must be positive");
        }
        Ok(())
    }

    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            monthly_quota: self.odds_monthly_quota,
            daily_budget: self.odds_daily_budget,
        }
    }
}

/// Every heuristic constant of the ranking pipeline. Missing fields keep
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub predictors: PredictorParams,
    pub tiers: ScoreTiers,
    pub weights: WeightParams,
    pub resolver: ResolverPolicy,
    pub filters: RankingFilters,
    pub cache: TtlPolicy,
}

impl Tuning {
    /// Defaults, or the overrides in `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let tuning = match path {
            None => Self::default(),
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read tuning file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid tuning file {}", path.display()))?
            }
        };
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if w.prior_alpha <= 0.0 || w.prior_beta <= 0.0 {
            anyhow::bail!("weights.prior_alpha and weights.prior_beta must be positive");
        }
        if w.slope < 0.0 {
            anyhow::bail!("weights.slope must not be negative (weights rise with win rate)");
        }
        if !(0.0 < w.min_weight && w.min_weight <= w.max_weight) {
            anyhow::bail!("weights must satisfy 0 < min_weight <= max_weight");
        }
        if w.full_stability_samples < w.min_samples {
            anyhow::bail!("weights.full_stability_samples must be >= weights.min_samples");
        }
        if self.filters.top_n == 0 {
            anyhow::bail!("filters.top_n must be positive");
        }
        if self.filters.min_edge < 0.0 {
            anyhow::bail!("filters.min_edge must not be negative");
        }
        if self
            .filters
            .min_confidence
            .values()
            .any(|c| !(0.0..=100.0).contains(c))
        {
            anyhow::bail!("filters.min_confidence values must be between 0 and 100");
        }
        if self.cache.overrides.values().any(|ttl| *ttl <= 0) {
            anyhow::bail!("cache TTL overrides must be positive");
        }
        if self.predictors.moneyline.probability_floor >= 0.5 {
            anyhow::bail!("predictors.moneyline.probability_floor must be below 0.5");
        }
        Ok(())
    }
}
