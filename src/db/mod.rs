use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::bot::performance::compute_win_rates;
use crate::bot::weights::{AdaptiveWeights, WeightParams};
use crate::upstream::{
    BudgetDecision, BudgetLedger, BudgetLimits, CacheClass, CacheEntry, CacheStore, RateBudget,
};

pub mod models;
use models::*;

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Result of [`Database::mark_bet_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    Updated,
    Unchanged,
    NotFound,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn =
            Connection::open(path).with_context(|| format!("Failed to open database {path}"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Bet history ──────────────────────────────────────────────────────────

    /// Append recommendations as PENDING bets. A bet already recorded for
    /// the same game, bet type and side is left alone. Returns the number of
    /// new rows.
    pub fn record_recommendations(&self, bets: &[ScoredBet], now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO bet_history (
                    game, league, bet_type, side, pick, market_line,
                    confidence, edge, score, result, recorded_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            )?;
            for bet in bets {
                inserted += stmt.execute(params![
                    bet.game.to_string(),
                    bet.candidate.league.as_str(),
                    bet.bet_type().as_str(),
                    bet.side().as_str(),
                    bet.pick_label(),
                    bet.picked_line(),
                    bet.prediction.confidence,
                    bet.prediction.edge,
                    bet.score,
                    BetResult::Pending.as_str(),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        info!("Recorded {} new recommendations", inserted);
        Ok(inserted)
    }

    /// Set a bet's result. Re-marking with the same value is a no-op.
    pub fn mark_bet_result(&self, id: i64, result: BetResult, now: DateTime<Utc>) -> Result<MarkOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row("SELECT result FROM bet_history WHERE id=?1", params![id], |r| r.get(0))
            .optional()?;
        let outcome = match current {
            None => MarkOutcome::NotFound,
            Some(current) if BetResult::from_str(&current)? == result => MarkOutcome::Unchanged,
            Some(_) => {
                let resolved_at = (result != BetResult::Pending).then_some(now);
                tx.execute(
                    "UPDATE bet_history SET result=?1, resolved_at=?2 WHERE id=?3",
                    params![result.as_str(), resolved_at, id],
                )?;
                MarkOutcome::Updated
            }
        };
        tx.commit()?;
        debug!("mark_bet_result({}, {}): {:?}", id, result, outcome);
        Ok(outcome)
    }

    /// All recorded bets, newest first.
    pub fn list_bets(&self, limit: i64) -> Result<Vec<BetRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, game, league, bet_type, side, pick, market_line,
                    confidence, edge, score, result, recorded_at, resolved_at
             FROM bet_history ORDER BY recorded_at DESC, id DESC LIMIT ?1",
        )?;
        let bets = stmt
            .query_map(params![limit], map_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bets)
    }

    /// Bets with a WIN or LOSS result.
    pub fn list_resolved_bets(&self) -> Result<Vec<BetRecord>> {
        let conn = self.conn()?;
        list_resolved(&conn)
    }

    // ── Adaptive weights ─────────────────────────────────────────────────────

    pub fn load_weights(&self) -> Result<AdaptiveWeights> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT bet_type, weight, win_rate, samples, stability, disabled, updated_at
             FROM adaptive_weights",
        )?;
        let weights = stmt
            .query_map([], map_weight)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(AdaptiveWeights::from_entries(weights))
    }

    /// Recompute every weight from the full resolved history and persist the
    /// snapshot, all inside one write transaction.
    pub fn refresh_weights(&self, params: &WeightParams, now: DateTime<Utc>) -> Result<AdaptiveWeights> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let history = list_resolved(&tx)?;
        let weights = AdaptiveWeights::refresh(&compute_win_rates(&history), params, now);
        save_weights(&tx, &weights)?;
        tx.commit()?;
        Ok(weights)
    }

    // ── Resolution log ───────────────────────────────────────────────────────

    pub fn insert_resolution_log(&self, entries: &[ResolutionEntry], now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO resolution_log (
                    logged_at, game, bet_type, side, action, reason, detail, replacement
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            for e in entries {
                stmt.execute(params![
                    now,
                    e.game,
                    e.bet_type.as_str(),
                    e.side.map(|s| s.as_str()),
                    e.action.as_str(),
                    e.reason.as_str(),
                    e.detail,
                    e.replacement,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_resolution_log(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM resolution_log", [], |r| r.get(0))?)
    }
}

// ── Cache store ────────────────────────────────────────────────────────────────

impl CacheStore for Database {
    fn get(&self, class: CacheClass, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT value, stored_at FROM cache_entries WHERE class=?1 AND key=?2",
                params![class.as_str(), key],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, DateTime<Utc>>(1)?)),
            )
            .optional()?;
        row.map(|(value, stored_at)| -> Result<CacheEntry> {
            Ok(CacheEntry {
                class,
                key: key.to_string(),
                value: serde_json::from_str(&value)
                    .with_context(|| format!("Corrupt cache entry {class}/{key}"))?,
                stored_at,
            })
        })
        .transpose()
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cache_entries (class, key, value, stored_at)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(class, key) DO UPDATE SET
                value=excluded.value,
                stored_at=excluded.stored_at",
            params![
                entry.class.as_str(),
                entry.key,
                serde_json::to_string(&entry.value)?,
                entry.stored_at,
            ],
        )?;
        Ok(())
    }

    fn clear(&self, class: Option<CacheClass>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = match class {
            Some(c) => conn.execute("DELETE FROM cache_entries WHERE class=?1", params![c.as_str()])?,
            None => conn.execute("DELETE FROM cache_entries", [])?,
        };
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT class, key, value, stored_at FROM cache_entries ORDER BY class, key")?;
        let entries = stmt
            .query_map([], |row| {
                let value: String = row.get(2)?;
                Ok(CacheEntry {
                    class: parse_col(row, 0)?,
                    key: row.get(1)?,
                    value: serde_json::from_str(&value).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
                    })?,
                    stored_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

// ── Rate budgets ───────────────────────────────────────────────────────────────

impl BudgetLedger for Database {
    fn snapshot(&self, source: &str, limits: BudgetLimits, today: NaiveDate) -> Result<RateBudget> {
        let conn = self.conn()?;
        let mut budget = load_budget(&conn, source, limits, today)?;
        budget.roll_over(today);
        Ok(budget)
    }

    fn try_consume(
        &self,
        source: &str,
        limits: BudgetLimits,
        n: u32,
        today: NaiveDate,
    ) -> Result<BudgetDecision> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut budget = load_budget(&tx, source, limits, today)?;
        let decision = budget.try_consume(n, today);
        save_budget(&tx, &budget)?;
        tx.commit()?;
        Ok(decision)
    }
}

fn load_budget(
    conn: &Connection,
    source: &str,
    limits: BudgetLimits,
    today: NaiveDate,
) -> Result<RateBudget> {
    let row: Option<(u32, NaiveDate)> = conn
        .query_row(
            "SELECT used, period_start FROM rate_budgets WHERE source=?1",
            params![source],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((used, period_start)) = row else {
        return Ok(RateBudget::new(source, limits, today));
    };

    let mut stmt = conn.prepare(
        "SELECT day, requests FROM rate_budget_daily WHERE source=?1 AND day >= ?2",
    )?;
    let daily_usage = stmt
        .query_map(params![source, period_start], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<NaiveDate, u32>>>()?;

    Ok(RateBudget {
        source: source.to_string(),
        limits,
        used,
        daily_usage,
        period_start,
    })
}

fn save_budget(conn: &Connection, budget: &RateBudget) -> Result<()> {
    conn.execute(
        "INSERT INTO rate_budgets (source, monthly_quota, daily_budget, used, period_start)
         VALUES (?1,?2,?3,?4,?5)
         ON CONFLICT(source) DO UPDATE SET
            monthly_quota=excluded.monthly_quota,
            daily_budget=excluded.daily_budget,
            used=excluded.used,
            period_start=excluded.period_start",
        params![
            budget.source,
            budget.limits.monthly_quota,
            budget.limits.daily_budget,
            budget.used,
            budget.period_start,
        ],
    )?;
    conn.execute(
        "DELETE FROM rate_budget_daily WHERE source=?1 AND day < ?2",
        params![budget.source, budget.period_start],
    )?;
    for (day, requests) in &budget.daily_usage {
        conn.execute(
            "INSERT INTO rate_budget_daily (source, day, requests) VALUES (?1,?2,?3)
             ON CONFLICT(source, day) DO UPDATE SET requests=excluded.requests",
            params![budget.source, day, requests],
        )?;
    }
    Ok(())
}

fn list_resolved(conn: &Connection) -> Result<Vec<BetRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, game, league, bet_type, side, pick, market_line,
                confidence, edge, score, result, recorded_at, resolved_at
         FROM bet_history WHERE result IN ('WIN','LOSS')",
    )?;
    let bets = stmt
        .query_map([], map_bet)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bets)
}

fn save_weights(conn: &Connection, weights: &AdaptiveWeights) -> Result<()> {
    for w in weights.entries() {
        conn.execute(
            "INSERT INTO adaptive_weights (
                bet_type, weight, win_rate, samples, stability, disabled, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(bet_type) DO UPDATE SET
                weight=excluded.weight,
                win_rate=excluded.win_rate,
                samples=excluded.samples,
                stability=excluded.stability,
                disabled=excluded.disabled,
                updated_at=excluded.updated_at",
            params![
                w.bet_type.as_str(),
                w.weight,
                w.win_rate,
                w.samples,
                w.stability,
                w.disabled,
                w.updated_at,
            ],
        )?;
    }
    Ok(())
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn parse_col<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn map_bet(row: &rusqlite::Row) -> rusqlite::Result<BetRecord> {
    Ok(BetRecord {
        id: row.get(0)?,
        game: row.get(1)?,
        league: parse_col(row, 2)?,
        bet_type: parse_col(row, 3)?,
        side: parse_col(row, 4)?,
        pick: row.get(5)?,
        market_line: row.get(6)?,
        confidence: row.get(7)?,
        edge: row.get(8)?,
        score: row.get(9)?,
        result: parse_col(row, 10)?,
        recorded_at: row.get(11)?,
        resolved_at: row.get(12)?,
    })
}

fn map_weight(row: &rusqlite::Row) -> rusqlite::Result<AdaptiveWeight> {
    Ok(AdaptiveWeight {
        bet_type: parse_col(row, 0)?,
        weight: row.get(1)?,
        win_rate: row.get(2)?,
        samples: row.get(3)?,
        stability: row.get(4)?,
        disabled: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    class       TEXT    NOT NULL,
    key         TEXT    NOT NULL,
    value       TEXT    NOT NULL,
    stored_at   TEXT    NOT NULL,
    PRIMARY KEY (class, key)
);

CREATE TABLE IF NOT EXISTS bet_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    game        TEXT    NOT NULL,
    league      TEXT    NOT NULL,
    bet_type    TEXT    NOT NULL,
    side        TEXT    NOT NULL,
    pick        TEXT    NOT NULL,
    market_line REAL,
    confidence  REAL    NOT NULL,
    edge        REAL    NOT NULL,
    score       REAL    NOT NULL,
    result      TEXT    NOT NULL DEFAULT 'PENDING',
    recorded_at TEXT    NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS adaptive_weights (
    bet_type    TEXT    PRIMARY KEY,
    weight      REAL    NOT NULL,
    win_rate    REAL    NOT NULL,
    samples     INTEGER NOT NULL,
    stability   REAL    NOT NULL,
    disabled    INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_budgets (
    source        TEXT    PRIMARY KEY,
    monthly_quota INTEGER NOT NULL,
    daily_budget  INTEGER NOT NULL,
    used          INTEGER NOT NULL DEFAULT 0,
    period_start  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_budget_daily (
    source      TEXT    NOT NULL,
    day         TEXT    NOT NULL,
    requests    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source, day),
    FOREIGN KEY (source) REFERENCES rate_budgets(source)
);

CREATE TABLE IF NOT EXISTS resolution_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    logged_at   TEXT    NOT NULL,
    game        TEXT    NOT NULL,
    bet_type    TEXT    NOT NULL,
    side        TEXT,
    action      TEXT    NOT NULL,
    reason      TEXT    NOT NULL,
    detail      TEXT    NOT NULL,
    replacement TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_bet_history_pick ON bet_history(game, bet_type, side);
CREATE INDEX IF NOT EXISTS idx_bet_history_result ON bet_history(result);
CREATE INDEX IF NOT EXISTS idx_resolution_log_game ON resolution_log(game);
"#;
