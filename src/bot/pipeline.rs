//! One ranking run: candidates in, ranked recommendations plus provenance
//! out.
//!
//! validate line → predict → score → drop disabled bet types → filter →
//! resolve conflicts → cut to `top_n`
//!
//! The weight snapshot and stat tables are fixed for the whole run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use super::conflict::{check_line, entry_for, ConflictResolver, ResolverPolicy};
use super::predict::{MatchupContext, PredictorParams, Predictors};
use super::score::{score_bet, ScoreTiers};
use super::weights::AdaptiveWeights;
use crate::db::models::{
    BetType, GameCandidate, GameKey, InjuryReport, ResolutionAction, ResolutionEntry,
    ResolutionReason, ScoredBet,
};
use crate::stats::{team_key, StatProvider};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingFilters {
    pub min_edge: f64,
    /// Per-bet-type confidence floor; missing types have none
    pub min_confidence: BTreeMap<BetType, f64>,
    pub top_n: usize,
}

impl Default for RankingFilters {
    fn default() -> Self {
        Self {
            min_edge: 0.0,
            min_confidence: BTreeMap::new(),
            top_n: 10,
        }
    }
}

/// Canonical identity of a candidate's game.
pub fn game_key(candidate: &GameCandidate) -> GameKey {
    GameKey {
        away: team_key(&candidate.away_team),
        home: team_key(&candidate.home_team),
        date: candidate.scheduled_at.date_naive(),
    }
}

/// Per-game context supplied next to the candidates (injuries, venue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameNote {
    pub away_team: String,
    pub home_team: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub neutral_site: bool,
    #[serde(flatten)]
    pub injuries: InjuryReport,
}

#[derive(Debug, Clone, Default)]
pub struct GameNotes {
    notes: HashMap<GameKey, GameNote>,
}

impl GameNotes {
    pub fn new(notes: impl IntoIterator<Item = GameNote>) -> Self {
        let notes = notes
            .into_iter()
            .map(|n| {
                let key = GameKey {
                    away: team_key(&n.away_team),
                    home: team_key(&n.home_team),
                    date: n.date,
                };
                (key, n)
            })
            .collect();
        Self { notes }
    }

    pub fn context(&self, game: &GameKey, candidate: &GameCandidate) -> MatchupContext {
        let note = self.notes.get(game);
        MatchupContext {
            league: candidate.league,
            home_advantage: !note.map(|n| n.neutral_site).unwrap_or(false),
            injuries: note.map(|n| n.injuries).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingOutcome {
    pub ranked: Vec<ScoredBet>,
    pub log: Vec<ResolutionEntry>,
    pub evaluated: usize,
    /// Input entries that could not be read as candidates at all
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedCandidate {
    /// Position in the input batch
    pub index: usize,
    pub detail: String,
}

/// Read a batch entry by entry. An unreadable entry (unknown bet type,
/// missing date) is rejected on its own; the rest of the batch survives.
pub fn parse_candidates(raw: Vec<serde_json::Value>) -> (Vec<GameCandidate>, Vec<RejectedCandidate>) {
    let mut candidates = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<GameCandidate>(value) {
            Ok(c) => candidates.push(c),
            Err(e) => {
                warn!("Rejecting candidate #{}: {}", index, e);
                rejected.push(RejectedCandidate {
                    index,
                    detail: e.to_string(),
                });
            }
        }
    }
    (candidates, rejected)
}

pub struct RankingEngine<'a> {
    stats: &'a StatProvider,
    weights: &'a AdaptiveWeights,
    predictors: Predictors,
    tiers: ScoreTiers,
    resolver: ConflictResolver,
    filters: RankingFilters,
}

impl<'a> RankingEngine<'a> {
    pub fn new(
        stats: &'a StatProvider,
        weights: &'a AdaptiveWeights,
        predictors: &PredictorParams,
        tiers: ScoreTiers,
        policy: ResolverPolicy,
        filters: RankingFilters,
    ) -> Self {
        Self {
            stats,
            weights,
            predictors: Predictors::new(predictors),
            tiers,
            resolver: ConflictResolver::new(policy, tiers),
            filters,
        }
    }

    pub fn run(&self, candidates: &[GameCandidate], notes: &GameNotes) -> RankingOutcome {
        let mut log = Vec::new();
        let mut scored = Vec::with_capacity(candidates.len());

        for (idx, candidate) in candidates.iter().enumerate() {
            let game = game_key(candidate);
            let excluded = |reason: ResolutionReason, detail: String| ResolutionEntry {
                game: game.to_string(),
                bet_type: candidate.bet_type,
                side: None,
                action: ResolutionAction::Excluded,
                reason,
                detail,
                replacement: None,
            };

            let line = match check_line(candidate) {
                Ok(line) => line,
                Err(reason) => {
                    warn!("Excluding {} {}: {}", candidate.matchup(), candidate.bet_type, reason);
                    log.push(excluded(ResolutionReason::MalformedLine, reason));
                    continue;
                }
            };

            let ctx = notes.context(&game, candidate);
            let Some(prediction) = self.predictors.evaluate(self.stats, candidate, line, &ctx)
            else {
                let reason = format!("unusable odds {line}");
                warn!("Excluding {} {}: {}", candidate.matchup(), candidate.bet_type, reason);
                log.push(excluded(ResolutionReason::MalformedLine, reason));
                continue;
            };

            let weight = self.weights.get(candidate.bet_type);
            let bet = score_bet(&self.tiers, candidate.clone(), game, prediction, weight, idx);

            // A disabled type must never displace an enabled pick in the resolver
            if bet.weight <= 0.0 {
                log.push(entry_for(
                    &bet,
                    ResolutionAction::Excluded,
                    ResolutionReason::DisabledBetType,
                    format!("{} weight is 0", bet.bet_type()),
                    None,
                ));
                continue;
            }

            if bet.prediction.edge < self.filters.min_edge {
                log.push(entry_for(
                    &bet,
                    ResolutionAction::Excluded,
                    ResolutionReason::BelowMinEdge,
                    format!("edge {:.2} < {:.2}", bet.prediction.edge, self.filters.min_edge),
                    None,
                ));
                continue;
            }
            if let Some(min) = self.filters.min_confidence.get(&candidate.bet_type) {
                if bet.prediction.confidence < *min {
                    log.push(entry_for(
                        &bet,
                        ResolutionAction::Excluded,
                        ResolutionReason::BelowMinConfidence,
                        format!("confidence {:.1} < {:.1}", bet.prediction.confidence, min),
                        None,
                    ));
                    continue;
                }
            }
            scored.push(bet);
        }

        let evaluated = scored.len();
        let resolution = self.resolver.resolve(scored);
        log.extend(resolution.log);
        let mut ranked = resolution.bets;

        if ranked.len() > self.filters.top_n {
            for bet in ranked.split_off(self.filters.top_n) {
                log.push(entry_for(
                    &bet,
                    ResolutionAction::Dropped,
                    ResolutionReason::BelowTopN,
                    format!("outside top {}", self.filters.top_n),
                    None,
                ));
            }
        }

        info!(
            "Ranked {} of {} candidates ({} provenance entries)",
            ranked.len(),
            candidates.len(),
            log.len()
        );
        RankingOutcome {
            ranked,
            log,
            evaluated,
            rejected: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::performance::compute_win_rates;
    use crate::bot::weights::WeightParams;
    use crate::db::models::{BetOrigin, BetRecord, League, Side};
    use crate::stats::StatTable;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn stats() -> StatProvider {
        let table = StatTable::from_json(&json!({
            "teams": {
                "Duke": { "ppg": 82, "opp_ppg": 66, "poss": 71, "home_ppg": 85, "away_ppg": 79,
                          "recent_margin": [12, 9, 15, 4, 10], "recent_ppg": [84, 80, 86, 75, 83] },
                "UNC": { "ppg": 74, "opp_ppg": 71, "poss": 72, "home_ppg": 76, "away_ppg": 72,
                         "recent_margin": [1, -3, 5, 0, 2], "recent_ppg": [73, 70, 78, 74, 75] },
                "Kansas": { "ppg": 78, "opp_ppg": 68, "poss": 69 },
                "Baylor": { "ppg": 75, "opp_ppg": 69, "poss": 68 }
            }
        }))
        .unwrap();
        let mut p = StatProvider::new();
        p.load(League::Ncaab, &table);
        p
    }

    fn candidate(away: &str, home: &str, bet_type: BetType, line: Option<f64>) -> GameCandidate {
        GameCandidate {
            away_team: away.into(),
            home_team: home.into(),
            league: League::Ncaab,
            bet_type,
            market_line: line,
            away_odds: None,
            scheduled_at: Utc.with_ymd_and_hms(2025, 2, 8, 23, 0, 0).unwrap(),
            book: None,
        }
    }

    fn all_enabled() -> AdaptiveWeights {
        let params = WeightParams {
            disabled: vec![],
            ..WeightParams::default()
        };
        AdaptiveWeights::refresh(&compute_win_rates(&Vec::<BetRecord>::new()), &params, Utc::now())
    }

    fn engine<'a>(
        stats: &'a StatProvider,
        weights: &'a AdaptiveWeights,
        policy: ResolverPolicy,
        filters: RankingFilters,
    ) -> RankingEngine<'a> {
        RankingEngine::new(
            stats,
            weights,
            &PredictorParams::default(),
            ScoreTiers::default(),
            policy,
            filters,
        )
    }

    #[test]
    fn malformed_lines_are_excluded_not_fatal() {
        let stats = stats();
        let weights = all_enabled();
        let e = engine(&stats, &weights, ResolverPolicy::default(), RankingFilters::default());
        let out = e.run(
            &[
                candidate("UNC", "Duke", BetType::Spread, None),
                candidate("Baylor", "Kansas", BetType::Total, Some(f64::INFINITY)),
                candidate("Baylor", "Kansas", BetType::Spread, Some(-2.5)),
            ],
            &GameNotes::default(),
        );
        assert_eq!(out.ranked.len(), 1);
        let malformed = out
            .log
            .iter()
            .filter(|e| e.reason == ResolutionReason::MalformedLine)
            .count();
        assert_eq!(malformed, 2);
    }

    #[test]
    fn one_recommendation_per_game() {
        let stats = stats();
        let weights = all_enabled();
        let e = engine(&stats, &weights, ResolverPolicy::default(), RankingFilters::default());
        let out = e.run(
            &[
                candidate("UNC", "Duke", BetType::Spread, Some(-3.0)),
                candidate("UNC", "Duke", BetType::Total, Some(130.0)),
                candidate("Baylor", "Kansas", BetType::Spread, Some(-1.0)),
                candidate("Baylor", "Kansas", BetType::Total, Some(160.0)),
            ],
            &GameNotes::default(),
        );
        assert_eq!(out.ranked.len(), 2);
        assert_ne!(out.ranked[0].game, out.ranked[1].game);
        assert!(out.ranked[0].score >= out.ranked[1].score);
    }

    #[test]
    fn conflicting_spread_and_moneyline_leave_one_pick() {
        let stats = stats();
        let weights = all_enabled();
        let e = engine(&stats, &weights, ResolverPolicy::default(), RankingFilters::default());
        // Duke is a huge home favorite on the spread board; the moneyline
        // price is so short that the model sides with UNC there.
        let mut ml = candidate("UNC", "Duke", BetType::Moneyline, Some(-5000.0));
        ml.away_odds = Some(2000.0);
        let spread = candidate("UNC", "Duke", BetType::Spread, Some(-2.0));
        let out = e.run(&[spread, ml], &GameNotes::default());

        assert_eq!(out.ranked.len(), 1);
        assert!(out.log.iter().any(|e| matches!(
            e.reason,
            ResolutionReason::ConflictLowerConfidence | ResolutionReason::ConflictFlippedSpread
        )));
    }

    #[test]
    fn disabled_bet_type_never_ranks() {
        let stats = stats();
        let weights = AdaptiveWeights::refresh(
            &compute_win_rates(&Vec::<BetRecord>::new()),
            &WeightParams::default(),
            Utc::now(),
        );
        let policy = ResolverPolicy {
            single_per_game: false,
            flip_spreads: true,
        };
        let e = engine(&stats, &weights, policy, RankingFilters::default());
        let mut ml = candidate("UNC", "Duke", BetType::Moneyline, Some(120.0));
        ml.away_odds = Some(-140.0);
        let out = e.run(
            &[ml, candidate("Baylor", "Kansas", BetType::Total, Some(150.0))],
            &GameNotes::default(),
        );
        assert!(out.ranked.iter().all(|b| b.bet_type() != BetType::Moneyline));
        assert!(out
            .log
            .iter()
            .any(|e| e.reason == ResolutionReason::DisabledBetType));
    }

    #[test]
    fn filters_and_top_n_are_recorded() {
        let stats = stats();
        let weights = all_enabled();
        let filters = RankingFilters {
            min_edge: 1.0,
            min_confidence: BTreeMap::from([(BetType::Total, 99.0)]),
            top_n: 1,
        };
        let e = engine(&stats, &weights, ResolverPolicy::default(), filters);
        let out = e.run(
            &[
                candidate("UNC", "Duke", BetType::Spread, Some(-30.0)),
                candidate("Baylor", "Kansas", BetType::Spread, Some(-30.0)),
                candidate("Baylor", "Kansas", BetType::Total, Some(100.0)),
            ],
            &GameNotes::default(),
        );
        assert_eq!(out.ranked.len(), 1);
        let reasons: Vec<_> = out.log.iter().map(|e| e.reason).collect();
        assert!(reasons.contains(&ResolutionReason::BelowMinConfidence));
        assert!(reasons.contains(&ResolutionReason::BelowTopN));
    }

    #[test]
    fn neutral_site_and_injuries_shift_the_spread() {
        let stats = stats();
        let weights = all_enabled();
        let e = engine(&stats, &weights, ResolverPolicy::default(), RankingFilters::default());
        let c = candidate("UNC", "Duke", BetType::Spread, Some(-3.0));
        let home = e.run(std::slice::from_ref(&c), &GameNotes::default());
        let notes = GameNotes::new([GameNote {
            away_team: "UNC".into(),
            home_team: "Duke".into(),
            date: NaiveDate::from_ymd_opt(2025, 2, 8).unwrap(),
            neutral_site: true,
            injuries: InjuryReport {
                home_missing_key_players: true,
                away_missing_key_players: false,
            },
        }]);
        let neutral = e.run(std::slice::from_ref(&c), &notes);
        assert!(neutral.ranked[0].prediction.estimate < home.ranked[0].prediction.estimate - 3.0);
    }

    #[test]
    fn disabled_moneyline_does_not_cost_the_game_its_spread() {
        let twin = json!({ "ppg": 75, "opp_ppg": 70, "poss": 69, "home_ppg": 77, "away_ppg": 73,
                           "recent_margin": [4, 6, 5], "recent_ppg": [76, 74, 75] });
        let table = StatTable::from_json(&json!({ "Duke": twin, "UNC": twin })).unwrap();
        let mut stats = StatProvider::new();
        stats.load(League::Ncaab, &table);
        let weights = AdaptiveWeights::refresh(
            &compute_win_rates(&Vec::<BetRecord>::new()),
            &WeightParams::default(),
            Utc::now(),
        );
        let e = engine(&stats, &weights, ResolverPolicy::default(), RankingFilters::default());

        let spread = candidate("UNC", "Duke", BetType::Spread, Some(1.5));
        let mut ml = candidate("UNC", "Duke", BetType::Moneyline, Some(-5000.0));
        ml.away_odds = Some(2000.0);
        let out = e.run(&[spread, ml], &GameNotes::default());

        assert_eq!(out.ranked.len(), 1);
        assert_eq!(out.ranked[0].bet_type(), BetType::Spread);
        assert!(out.log.iter().any(|e| e.bet_type == BetType::Moneyline
            && e.reason == ResolutionReason::DisabledBetType));
        assert!(out.log.iter().all(|e| e.bet_type != BetType::Spread));
    }

    #[test]
    fn unreadable_entries_do_not_sink_the_batch() {
        let raw = vec![
            json!({ "away_team": "UNC", "home_team": "Duke", "bet_type": "SPREAD",
                    "market_line": -3.0, "scheduled_at": "2025-02-08T23:00:00Z" }),
            json!({ "away_team": "Baylor", "home_team": "Kansas", "bet_type": "SPREAD",
                    "market_line": "PK", "scheduled_at": "2025-02-08T23:00:00Z" }),
            json!({ "away_team": "Baylor", "home_team": "Kansas", "bet_type": "TOTAL",
                    "market_line": "151.5", "scheduled_at": "2025-02-08T23:00:00Z" }),
            json!({ "away_team": "X", "home_team": "Y", "bet_type": "PARLAY",
                    "market_line": 1.0, "scheduled_at": "2025-02-08T23:00:00Z" }),
            json!({ "away_team": "X", "home_team": "Y", "bet_type": "SPREAD", "market_line": 1.0 }),
        ];
        let (candidates, rejected) = parse_candidates(raw);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[1].market_line, None);
        assert_eq!(candidates[2].market_line, Some(151.5));
        assert_eq!(rejected.iter().map(|r| r.index).collect::<Vec<_>>(), vec![3, 4]);

        let stats = stats();
        let weights = all_enabled();
        let policy = ResolverPolicy {
            single_per_game: false,
            flip_spreads: true,
        };
        let out = engine(&stats, &weights, policy, RankingFilters::default())
            .run(&candidates, &GameNotes::default());
        assert_eq!(out.ranked.len(), 2);
        assert_eq!(
            out.log
                .iter()
                .filter(|e| e.reason == ResolutionReason::MalformedLine)
                .count(),
            1
        );
    }

    #[test]
    fn ranking_is_reproducible() {
        let stats = stats();
        let weights = all_enabled();
        let e = engine(&stats, &weights, ResolverPolicy::default(), RankingFilters::default());
        let input = [
            candidate("UNC", "Duke", BetType::Spread, Some(-3.0)),
            candidate("Baylor", "Kansas", BetType::Total, Some(150.0)),
            candidate("Nobody", "Somebody", BetType::Spread, Some(0.0)),
        ];
        let a = e.run(&input, &GameNotes::default());
        let b = e.run(&input, &GameNotes::default());
        assert_eq!(a, b);
        assert!(a.ranked.iter().all(|b| b.origin == BetOrigin::Model));
        assert!(a.ranked.iter().any(|b| b.side() == Side::Home));
    }
}
