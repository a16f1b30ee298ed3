use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use larlbot::bot::{parse_candidates, GameNote, GameNotes, RankingEngine};
use larlbot::config::{Command, Config, Tuning};
use larlbot::db::models::{BetResult, GameCandidate, League};
use larlbot::db::{Database, MarkOutcome};
use larlbot::stats::{StatProvider, StatTable};
use larlbot::upstream::{
    BudgetLedger, CacheClass, FileFeed, HttpJsonFeed, Lookup, RateLimitedCache, TtlCache,
    UpstreamFeed,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);
    config.validate()?;

    let tuning = Tuning::load(config.tuning_file.as_deref())?;
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let cache = TtlCache::new(Arc::new(db.clone()), tuning.cache.clone());
    let now = Utc::now();

    match &config.command {
        Command::Rank {
            candidates,
            notes,
            record,
            top_n,
        } => {
            let (candidates, rejected) =
                parse_candidates(read_json::<Vec<serde_json::Value>>(candidates)?);
            let notes = match notes {
                Some(path) => GameNotes::new(read_json::<Vec<GameNote>>(path)?),
                None => GameNotes::default(),
            };
            let stats = load_stats(&cache, &candidates, now)?;

            // Refreshed once up front so tuning changes apply; fixed for the run
            let weights = db.refresh_weights(&tuning.weights, now)?;

            let mut filters = tuning.filters.clone();
            if let Some(n) = top_n {
                filters.top_n = *n;
            }
            let engine = RankingEngine::new(
                &stats,
                &weights,
                &tuning.predictors,
                tuning.tiers,
                tuning.resolver,
                filters,
            );
            let mut outcome = engine.run(&candidates, &notes);
            outcome.rejected = rejected;

            db.insert_resolution_log(&outcome.log, now)?;
            cache.put(
                CacheClass::DailyPicks,
                &now.date_naive().to_string(),
                serde_json::to_value(&outcome.ranked)?,
                now,
            )?;
            if *record {
                db.record_recommendations(&outcome.ranked, now)?;
            }
            print_json(&outcome)
        }

        Command::RefreshWeights => {
            let weights = db.refresh_weights(&tuning.weights, now)?;
            print_json(&weights.entries().collect::<Vec<_>>())
        }

        Command::MarkResult { id, result } => {
            let outcome = db.mark_bet_result(*id, *result, now)?;
            match outcome {
                MarkOutcome::NotFound => anyhow::bail!("No bet with id {id}"),
                MarkOutcome::Updated if *result != BetResult::Pending => {
                    db.refresh_weights(&tuning.weights, now)?;
                }
                _ => {}
            }
            print_json(&json!({ "id": id, "result": result, "outcome": outcome }))
        }

        Command::ImportStats { league, file } => {
            let value: serde_json::Value = read_json(file)?;
            let table = StatTable::from_json(&value)?;
            cache.put(CacheClass::TeamStats, league.as_str(), value, now)?;
            info!("Imported {} {} team records", table.teams.len(), league);
            print_json(&json!({ "league": league, "teams": table.teams.len() }))
        }

        Command::FetchStats {
            league,
            feed,
            api_key,
        } => {
            let feed: Box<dyn UpstreamFeed> =
                if feed.starts_with("http://") || feed.starts_with("https://") {
                    Box::new(HttpJsonFeed::new(
                        "stats",
                        feed,
                        api_key.as_deref(),
                        config.http_timeout_secs,
                    )?)
                } else {
                    Box::new(FileFeed::new("stats", feed))
                };
            let upstream = RateLimitedCache::new(cache, Arc::new(db.clone()), config.budget_limits());
            let outcome = upstream
                .fetch_through(feed.as_ref(), CacheClass::TeamStats, league.as_str(), now)
                .await?;
            let table = StatTable::from_json(&outcome.value)?;
            print_json(&json!({
                "league": league,
                "source": outcome.source,
                "stored_at": outcome.stored_at,
                "teams": table.teams.len(),
            }))
        }

        Command::Budget { source } => {
            let today = now.date_naive();
            let status = db.snapshot(source, config.budget_limits(), today)?.status(today);
            print_json(&status)
        }

        Command::CacheStatus { clear, clear_all } => {
            if *clear_all || clear.is_some() {
                let removed = cache.clear(*clear)?;
                info!("Cleared {} cache entries", removed);
            }
            print_json(&cache.status(now)?)
        }
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the stat provider from cached tables for every league in the
/// batch. Stale tables are still used; a missing or unreadable table
/// leaves that league on defaults.
fn load_stats(cache: &TtlCache, candidates: &[GameCandidate], now: DateTime<Utc>) -> Result<StatProvider> {
    let leagues: BTreeSet<League> = candidates.iter().map(|c| c.league).collect();
    let mut stats = StatProvider::new();
    for league in leagues {
        let entry = match cache.lookup(CacheClass::TeamStats, league.as_str(), now)? {
            Lookup::Hit(entry) => entry,
            Lookup::Stale(entry) => {
                warn!("{} team stats are stale (stored {}); using them anyway", league, entry.stored_at);
                entry
            }
            Lookup::Miss => {
                warn!("No team stats cached for {}; every team uses league defaults", league);
                continue;
            }
        };
        match StatTable::from_json(&entry.value) {
            Ok(table) => stats.load(league, &table),
            Err(e) => warn!("Ignoring cached {} team stats: {:#}", league, e),
        }
    }
    Ok(stats)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
