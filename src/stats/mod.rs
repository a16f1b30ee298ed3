//! Stat provider: per-team records keyed by free-text team name.
//!
//! Lookups never fail. An unknown team yields the league-average record from
//! [`LeagueProfile::default_record`]; individual missing fields are filled
//! from the same profile. The caller always sees a complete
//! [`TeamStatRecord`], while [`TeamStats`] keeps track of how much of it was
//! defaulted so the predictors can widen their uncertainty.

pub mod profile;
pub mod teams;

pub use profile::LeagueProfile;
pub use teams::{team_key, TeamIndex, TeamMatch};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::db::models::{League, TeamStatRecord};

/// Number of fields in a [`TeamStatRecord`] that can be defaulted.
pub const STAT_FIELDS: u8 = 7;

/// One team's stats as the collector wrote them. Field names accept the
/// collector's short aliases (`ppg`, `opp_ppg`, `poss`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTeamStats {
    #[serde(default, alias = "ppg")]
    pub points_for: Option<f64>,
    #[serde(default, alias = "opp_ppg")]
    pub points_against: Option<f64>,
    #[serde(default, alias = "poss")]
    pub pace: Option<f64>,
    #[serde(default, alias = "home_ppg")]
    pub home_points_for: Option<f64>,
    #[serde(default, alias = "away_ppg")]
    pub away_points_for: Option<f64>,
    #[serde(default, alias = "recent_margin")]
    pub recent_margins: Option<Vec<f64>>,
    #[serde(default, alias = "recent_ppg")]
    pub recent_points_for: Option<Vec<f64>>,
}

/// A league's stat table, team name → raw stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatTable {
    pub teams: BTreeMap<String, RawTeamStats>,
}

impl StatTable {
    /// Parse a stat table. Accepts `{"teams": {...}}` or a flat map; entries
    /// that fail to parse are skipped with a warning.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let map = value
            .get("teams")
            .unwrap_or(value)
            .as_object()
            .context("stat table must be a JSON object of teams")?;

        let mut teams = BTreeMap::new();
        for (name, entry) in map {
            match serde_json::from_value::<RawTeamStats>(entry.clone()) {
                Ok(raw) => {
                    teams.insert(name.clone(), raw);
                }
                Err(e) => warn!("Skipping unparseable stats for {}: {}", name, e),
            }
        }
        Ok(StatTable { teams })
    }
}

/// Whether a record came from the stat store or is the league default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatSource {
    Cached,
    LeagueDefault,
}

/// The result of a stat lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStats {
    pub record: TeamStatRecord,
    pub source: StatSource,
    /// How many of the record's fields were filled from the league profile
    pub defaulted_fields: u8,
    pub matched: TeamMatch,
}

impl TeamStats {
    pub fn is_default(&self) -> bool {
        self.source == StatSource::LeagueDefault
    }

    pub fn league_default(league: League) -> Self {
        TeamStats {
            record: league.profile().default_record(),
            source: StatSource::LeagueDefault,
            defaulted_fields: STAT_FIELDS,
            matched: TeamMatch::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LeagueTable {
    index: TeamIndex,
    records: HashMap<String, (TeamStatRecord, u8)>,
}

/// In-memory stat store for any number of leagues. Built from the cached
/// stat tables at the start of a run; no hidden global state.
#[derive(Debug, Clone, Default)]
pub struct StatProvider {
    tables: HashMap<League, LeagueTable>,
}

impl StatProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (replace) a league's table.
    pub fn load(&mut self, league: League, table: &StatTable) {
        let profile = league.profile();
        let mut records = HashMap::new();
        for (name, raw) in &table.teams {
            let key = team_key(name);
            if key.is_empty() {
                continue;
            }
            records.insert(key, normalize(raw, &profile));
        }
        let index = TeamIndex::new(records.keys().cloned());
        debug!("StatProvider: {} teams loaded for {}", records.len(), league);
        self.tables.insert(league, LeagueTable { index, records });
    }

    pub fn team_count(&self, league: League) -> usize {
        self.tables.get(&league).map(|t| t.records.len()).unwrap_or(0)
    }

    /// Look up a team. Never fails; unknown teams get the league default.
    pub fn get_team_stats(&self, team_name: &str, league: League) -> TeamStats {
        let Some(table) = self.tables.get(&league) else {
            debug!("No {} stat table loaded; defaulting {}", league, team_name);
            return TeamStats::league_default(league);
        };

        let matched = table.index.resolve(team_name);
        if let TeamMatch::Ambiguous { key, candidates } = &matched {
            warn!(
                "Ambiguous team name '{}' ({}): candidates {:?}, using '{}'",
                team_name, league, candidates, key
            );
        }

        match matched.key().and_then(|k| table.records.get(k)) {
            Some((record, defaulted)) => TeamStats {
                record: record.clone(),
                source: StatSource::Cached,
                defaulted_fields: *defaulted,
                matched,
            },
            None => {
                debug!("Unknown team '{}' ({}); using league default", team_name, league);
                TeamStats::league_default(league)
            }
        }
    }
}

fn usable(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x >= 0.0)
}

/// Fill every missing or invalid field from the league profile. Returns the
/// normalized record and the number of defaulted fields.
pub fn normalize(raw: &RawTeamStats, profile: &LeagueProfile) -> (TeamStatRecord, u8) {
    let mut defaulted = 0u8;
    let mut take = |v: Option<f64>, fallback: f64| match v {
        Some(x) => x,
        None => {
            defaulted += 1;
            fallback
        }
    };

    let points_for = take(usable(raw.points_for), profile.points_for);
    let points_against = take(usable(raw.points_against), profile.points_against);
    let pace = take(usable(raw.pace).filter(|p| *p > 0.0), profile.pace);
    // Splits default relative to the team's own scoring rate
    let home_points_for = take(
        usable(raw.home_points_for),
        points_for + (profile.home_points_for - profile.points_for),
    );
    let away_points_for = take(
        usable(raw.away_points_for),
        (points_for + (profile.away_points_for - profile.points_for)).max(0.0),
    );

    let recent_margins: Vec<f64> = raw
        .recent_margins
        .as_deref()
        .unwrap_or_default()
        .iter()
        .copied()
        .filter(|m| m.is_finite())
        .collect();
    let recent_margins = if recent_margins.is_empty() {
        defaulted += 1;
        vec![0.0; profile::DEFAULT_RECENT_GAMES]
    } else {
        recent_margins
    };

    let recent_points_for: Vec<f64> = raw
        .recent_points_for
        .as_deref()
        .unwrap_or_default()
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p >= 0.0)
        .collect();
    let recent_points_for = if recent_points_for.is_empty() {
        defaulted += 1;
        vec![points_for; profile::DEFAULT_RECENT_GAMES]
    } else {
        recent_points_for
    };

    (
        TeamStatRecord {
            points_for,
            points_against,
            pace,
            home_points_for,
            away_points_for,
            recent_margins,
            recent_points_for,
        },
        defaulted,
    )
}
