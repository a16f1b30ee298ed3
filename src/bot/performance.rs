//! Win-rate aggregation over the resolved bet history.
//!
//! Always a full recomputation from the record set: duplicate ids collapse,
//! input order is irrelevant, and only WIN/LOSS results count. An empty
//! history yields the neutral 50% rate for every bet type.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::models::{BetRecord, BetResult, BetType, PerformanceRecord};

/// Win rate reported for a bet type (or bucket) with no decided bets.
pub const NEUTRAL_WIN_RATE: f64 = 0.5;

/// Confidence buckets as (label, lower bound inclusive, upper bound exclusive).
pub const CONFIDENCE_BUCKETS: [(&str, f64, f64); 5] = [
    ("50-60", 50.0, 60.0),
    ("60-70", 60.0, 70.0),
    ("70-80", 70.0, 80.0),
    ("80-90", 80.0, 90.0),
    ("90+", 90.0, f64::INFINITY),
];

impl PerformanceRecord {
    pub fn empty() -> Self {
        Self {
            total: 0,
            wins: 0,
            losses: 0,
            win_rate: NEUTRAL_WIN_RATE,
        }
    }

    fn add(&mut self, result: BetResult) {
        match result {
            BetResult::Win => self.wins += 1,
            BetResult::Loss => self.losses += 1,
            BetResult::Pending | BetResult::Push => return,
        }
        self.total = self.wins + self.losses;
        self.win_rate = self.wins as f64 / self.total as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinRates {
    pub by_type: BTreeMap<BetType, PerformanceRecord>,
    pub by_confidence: BTreeMap<&'static str, PerformanceRecord>,
    pub overall: PerformanceRecord,
}

impl WinRates {
    pub fn get(&self, bet_type: BetType) -> PerformanceRecord {
        self.by_type
            .get(&bet_type)
            .copied()
            .unwrap_or_else(PerformanceRecord::empty)
    }
}

fn bucket_for(confidence: f64) -> Option<&'static str> {
    CONFIDENCE_BUCKETS
        .iter()
        .find(|(_, lo, hi)| confidence >= *lo && confidence < *hi)
        .map(|(label, _, _)| *label)
}

/// Aggregate win rates by bet type, by confidence bucket and overall.
///
/// Records without an id are keyed by their content so that the same
/// unsaved record passed twice still counts once.
pub fn compute_win_rates<'a, I>(bets: I) -> WinRates
where
    I: IntoIterator<Item = &'a BetRecord>,
{
    let mut unique: BTreeMap<String, &BetRecord> = BTreeMap::new();
    for bet in bets {
        if !bet.result.is_decided() {
            continue;
        }
        let key = match bet.id {
            Some(id) => format!("id:{id}"),
            None => format!("{}|{}|{}|{}", bet.game, bet.bet_type, bet.side, bet.recorded_at),
        };
        unique.insert(key, bet);
    }

    let mut by_type: BTreeMap<BetType, PerformanceRecord> = BetType::ALL
        .iter()
        .map(|t| (*t, PerformanceRecord::empty()))
        .collect();
    let mut by_confidence: BTreeMap<&'static str, PerformanceRecord> = CONFIDENCE_BUCKETS
        .iter()
        .map(|(label, _, _)| (*label, PerformanceRecord::empty()))
        .collect();
    let mut overall = PerformanceRecord::empty();

    for bet in unique.values() {
        if let Some(rec) = by_type.get_mut(&bet.bet_type) {
            rec.add(bet.result);
        }
        if let Some(rec) = bucket_for(bet.confidence).and_then(|b| by_confidence.get_mut(b)) {
            rec.add(bet.result);
        }
        overall.add(bet.result);
    }

    WinRates {
        by_type,
        by_confidence,
        overall,
    }
}
