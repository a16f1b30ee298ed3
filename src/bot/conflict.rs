//! Conflict resolution and per-game deduplication.
//!
//! Candidates are grouped by game. Within a game:
//!
//! 1. Only the best-ranked bet of each bet type survives.
//! 2. A SPREAD pick and a MONEYLINE pick naming different teams conflict.
//!    The more confident signal wins. When the moneyline is more confident
//!    and the spread pick was laying points, the spread is flipped to the
//!    underdog plus the points instead of being dropped.
//! 3. With `single_per_game`, only the best-ranked remaining bet survives.
//!
//! Everything removed or replaced is recorded as a [`ResolutionEntry`].
//! Resolution is idempotent: resolving the output again changes nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::score::{rank_cmp, ScoreTiers};
use crate::db::models::{
    BetOrigin, BetType, GameCandidate, GameKey, ResolutionAction, ResolutionEntry,
    ResolutionReason, ScoredBet,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverPolicy {
    pub single_per_game: bool,
    /// Replace a favorite spread with the underdog spread when a stronger
    /// moneyline signal names the other team
    pub flip_spreads: bool,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            single_per_game: true,
            flip_spreads: true,
        }
    }
}

/// Validate a candidate's market line. Returns the usable line or the
/// reason it is malformed.
pub fn check_line(candidate: &GameCandidate) -> Result<f64, String> {
    let line = candidate
        .market_line
        .ok_or_else(|| "missing market line".to_string())?;
    if !line.is_finite() {
        return Err(format!("non-finite market line {line}"));
    }
    match candidate.bet_type {
        BetType::Total if line <= 0.0 => Err(format!("total line {line} is not positive")),
        BetType::Moneyline if line.abs() < 100.0 => {
            Err(format!("moneyline odds {line} are not valid American odds"))
        }
        _ => Ok(line),
    }
}

pub fn entry_for(
    bet: &ScoredBet,
    action: ResolutionAction,
    reason: ResolutionReason,
    detail: impl Into<String>,
    replacement: Option<String>,
) -> ResolutionEntry {
    ResolutionEntry {
        game: bet.game.to_string(),
        bet_type: bet.bet_type(),
        side: Some(bet.side()),
        action,
        reason,
        detail: detail.into(),
        replacement,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resolution {
    /// Surviving bets in rank order
    pub bets: Vec<ScoredBet>,
    pub log: Vec<ResolutionEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    pub policy: ResolverPolicy,
    pub tiers: ScoreTiers,
}

impl ConflictResolver {
    pub fn new(policy: ResolverPolicy, tiers: ScoreTiers) -> Self {
        Self { policy, tiers }
    }

    pub fn resolve(&self, bets: Vec<ScoredBet>) -> Resolution {
        let mut games: BTreeMap<GameKey, Vec<ScoredBet>> = BTreeMap::new();
        for bet in bets {
            games.entry(bet.game.clone()).or_default().push(bet);
        }

        let mut out = Resolution::default();
        for (_, mut group) in games {
            group.sort_by(rank_cmp);
            let group = self.dedup_bet_types(group, &mut out.log);
            let mut group = self.resolve_conflict(group, &mut out.log);
            group.sort_by(rank_cmp);

            if self.policy.single_per_game && group.len() > 1 {
                let keeper = group.remove(0);
                for bet in group.drain(..) {
                    out.log.push(entry_for(
                        &bet,
                        ResolutionAction::Dropped,
                        ResolutionReason::SinglePerGame,
                        format!("one bet per game; kept {}", keeper.pick_label()),
                        Some(keeper.pick_label()),
                    ));
                }
                group.push(keeper);
            }
            out.bets.extend(group);
        }

        out.bets.sort_by(rank_cmp);
        out
    }

    /// Keep the best-ranked bet per bet type. `group` must be rank-sorted.
    fn dedup_bet_types(&self, group: Vec<ScoredBet>, log: &mut Vec<ResolutionEntry>) -> Vec<ScoredBet> {
        let mut kept: Vec<ScoredBet> = Vec::with_capacity(group.len());
        for bet in group {
            match kept.iter().find(|k| k.bet_type() == bet.bet_type()) {
                Some(better) => log.push(entry_for(
                    &bet,
                    ResolutionAction::Dropped,
                    ResolutionReason::DuplicateBetType,
                    format!("duplicate {} candidate", bet.bet_type()),
                    Some(better.pick_label()),
                )),
                None => kept.push(bet),
            }
        }
        kept
    }

    fn resolve_conflict(&self, mut group: Vec<ScoredBet>, log: &mut Vec<ResolutionEntry>) -> Vec<ScoredBet> {
        let spread_idx = group.iter().position(|b| b.bet_type() == BetType::Spread);
        let ml_idx = group.iter().position(|b| b.bet_type() == BetType::Moneyline);
        let (Some(si), Some(mi)) = (spread_idx, ml_idx) else {
            return group;
        };
        if group[si].side() == group[mi].side() {
            return group;
        }

        let spread_conf = group[si].prediction.confidence;
        let ml_conf = group[mi].prediction.confidence;
        let laying_points = group[si].picked_line().map(|l| l < 0.0).unwrap_or(false);
        // A weight-0 bet never beats an enabled one, whatever its confidence
        let spread_wins = match (group[si].weight > 0.0, group[mi].weight > 0.0) {
            (true, false) => true,
            (false, true) => false,
            _ => spread_conf >= ml_conf,
        };

        if spread_wins {
            let ml = group.remove(mi);
            let kept = group[if si > mi { si - 1 } else { si }].pick_label();
            info!("Conflict on {}: kept {} over {}", ml.game, kept, ml.pick_label());
            let detail = if ml.weight > 0.0 {
                format!("spread confidence {spread_conf:.1} >= moneyline {ml_conf:.1}")
            } else {
                format!("moneyline disabled; spread kept over confidence {ml_conf:.1}")
            };
            log.push(entry_for(
                &ml,
                ResolutionAction::Dropped,
                ResolutionReason::ConflictLowerConfidence,
                detail,
                Some(kept),
            ));
        } else if self.policy.flip_spreads && laying_points {
            let flipped = self.flip_spread(&group[si], ml_conf);
            let ml = group.remove(mi);
            let si = if si > mi { si - 1 } else { si };
            let original = std::mem::replace(&mut group[si], flipped);
            let label = group[si].pick_label();
            info!(
                "Conflict on {}: {} flipped to {} on {} signal",
                original.game,
                original.pick_label(),
                label,
                ml.pick_label()
            );
            log.push(entry_for(
                &original,
                ResolutionAction::Replaced,
                ResolutionReason::ConflictFlippedSpread,
                format!("moneyline confidence {ml_conf:.1} > spread {spread_conf:.1}"),
                Some(label.clone()),
            ));
            log.push(entry_for(
                &ml,
                ResolutionAction::Dropped,
                ResolutionReason::ConflictFlippedSpread,
                "moneyline signal folded into the underdog spread",
                Some(label),
            ));
        } else {
            let spread = group.remove(si);
            let kept = group[if mi > si { mi - 1 } else { mi }].pick_label();
            info!("Conflict on {}: kept {} over {}", spread.game, kept, spread.pick_label());
            log.push(entry_for(
                &spread,
                ResolutionAction::Dropped,
                ResolutionReason::ConflictLowerConfidence,
                format!("moneyline confidence {ml_conf:.1} > spread {spread_conf:.1}"),
                Some(kept),
            ));
        }
        group
    }

    /// The same spread market from the other side, carrying the moneyline's
    /// confidence.
    fn flip_spread(&self, spread: &ScoredBet, moneyline_confidence: f64) -> ScoredBet {
        let mut flipped = spread.clone();
        let original_side = spread.side();
        flipped.prediction.side = original_side.opposite();
        flipped.prediction.confidence = moneyline_confidence;
        flipped.score = self.tiers.score(&flipped.prediction, flipped.weight);
        flipped.origin = BetOrigin::FlippedSpread {
            original_side,
            moneyline_confidence,
        };
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::score::score_bet;
    use crate::db::models::{League, PredictionResult, Side};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn game(home: &str) -> GameKey {
        GameKey {
            away: "visitors".into(),
            home: home.into(),
            date: NaiveDate::from_ymd_opt(2025, 2, 14).unwrap(),
        }
    }

    fn bet(
        home: &str,
        bet_type: BetType,
        line: f64,
        side: Side,
        edge: f64,
        confidence: f64,
        idx: usize,
    ) -> ScoredBet {
        let candidate = GameCandidate {
            away_team: "Visitors".into(),
            home_team: home.into(),
            league: League::Ncaab,
            bet_type,
            market_line: Some(line),
            away_odds: None,
            scheduled_at: Utc.with_ymd_and_hms(2025, 2, 14, 19, 0, 0).unwrap(),
            book: None,
        };
        let prediction = PredictionResult {
            estimate: 0.0,
            market_estimate: 0.0,
            uncertainty: 0.1,
            edge,
            confidence,
            side,
        };
        score_bet(&ScoreTiers::default(), candidate, game(home), prediction, 1.0, idx)
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::default()
    }

    fn no_single() -> ConflictResolver {
        ConflictResolver::new(
            ResolverPolicy {
                single_per_game: false,
                flip_spreads: true,
            },
            ScoreTiers::default(),
        )
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let mut c = bet("Home", BetType::Total, 140.5, Side::Over, 3.0, 50.0, 0).candidate;
        assert_eq!(check_line(&c), Ok(140.5));
        c.market_line = Some(-2.0);
        assert!(check_line(&c).is_err());
        c.market_line = None;
        assert!(check_line(&c).is_err());
        c.bet_type = BetType::Spread;
        c.market_line = Some(f64::NAN);
        assert!(check_line(&c).is_err());
        c.bet_type = BetType::Moneyline;
        c.market_line = Some(-40.0);
        assert!(check_line(&c).is_err());
    }

    #[test]
    fn spread_vs_moneyline_conflict_leaves_one_pick() {
        let bets = vec![
            bet("Home", BetType::Spread, -6.5, Side::Home, 4.0, 70.0, 0),
            bet("Home", BetType::Moneyline, -250.0, Side::Away, 8.0, 60.0, 1),
        ];
        let out = resolver().resolve(bets);
        assert_eq!(out.bets.len(), 1);
        assert_eq!(out.bets[0].bet_type(), BetType::Spread);
        assert_eq!(out.log.len(), 1);
        assert_eq!(out.log[0].reason, ResolutionReason::ConflictLowerConfidence);
        assert_eq!(out.log[0].bet_type, BetType::Moneyline);
    }

    #[test]
    fn stronger_moneyline_flips_a_favorite_spread() {
        let bets = vec![
            bet("Home", BetType::Spread, -9.5, Side::Home, 4.0, 55.0, 0),
            bet("Home", BetType::Moneyline, -400.0, Side::Away, 9.0, 78.0, 1),
        ];
        let out = no_single().resolve(bets);
        assert_eq!(out.bets.len(), 1);
        let flipped = &out.bets[0];
        assert_eq!(flipped.bet_type(), BetType::Spread);
        assert_eq!(flipped.side(), Side::Away);
        assert_eq!(flipped.picked_line(), Some(9.5));
        assert_eq!(flipped.pick_label(), "Visitors +9.5");
        assert_eq!(
            flipped.origin,
            BetOrigin::FlippedSpread {
                original_side: Side::Home,
                moneyline_confidence: 78.0
            }
        );
        let actions: Vec<_> = out.log.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![ResolutionAction::Replaced, ResolutionAction::Dropped]);
        assert!(out.log.iter().all(|e| e.replacement.as_deref() == Some("Visitors +9.5")));
    }

    #[test]
    fn stronger_moneyline_drops_an_underdog_spread() {
        let bets = vec![
            bet("Home", BetType::Spread, 4.5, Side::Home, 3.0, 50.0, 0),
            bet("Home", BetType::Moneyline, 150.0, Side::Away, 9.0, 75.0, 1),
        ];
        let out = no_single().resolve(bets);
        assert_eq!(out.bets.len(), 1);
        assert_eq!(out.bets[0].bet_type(), BetType::Moneyline);
        assert_eq!(out.log[0].bet_type, BetType::Spread);
    }

    #[test]
    fn agreeing_picks_are_not_conflicts() {
        let bets = vec![
            bet("Home", BetType::Spread, -3.5, Side::Home, 4.0, 70.0, 0),
            bet("Home", BetType::Moneyline, -160.0, Side::Home, 6.0, 60.0, 1),
        ];
        let out = no_single().resolve(bets);
        assert_eq!(out.bets.len(), 2);
        assert!(out.log.is_empty());
    }

    #[test]
    fn duplicates_and_single_per_game() {
        let bets = vec![
            bet("Home", BetType::Total, 140.0, Side::Over, 6.0, 60.0, 0),
            bet("Home", BetType::Total, 141.0, Side::Over, 7.0, 62.0, 1),
            bet("Home", BetType::Spread, -2.0, Side::Home, 12.0, 80.0, 2),
            bet("Other", BetType::Spread, -2.0, Side::Home, 5.0, 60.0, 3),
        ];
        let out = resolver().resolve(bets);
        assert_eq!(out.bets.len(), 2);
        assert_eq!(out.bets[0].input_index, 2);
        assert_eq!(out.bets[1].input_index, 3);
        let reasons: Vec<_> = out.log.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![ResolutionReason::DuplicateBetType, ResolutionReason::SinglePerGame]
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let bets = vec![
            bet("Home", BetType::Spread, -9.5, Side::Home, 4.0, 55.0, 0),
            bet("Home", BetType::Moneyline, -400.0, Side::Away, 9.0, 78.0, 1),
            bet("Home", BetType::Total, 150.0, Side::Under, 6.0, 66.0, 2),
            bet("Other", BetType::Total, 130.0, Side::Over, 3.0, 50.0, 3),
            bet("Other", BetType::Total, 131.0, Side::Over, 3.0, 51.0, 4),
        ];
        for r in [resolver(), no_single()] {
            let once = r.resolve(bets.clone());
            let twice = r.resolve(once.bets.clone());
            assert_eq!(twice.bets, once.bets);
            assert!(twice.log.is_empty());
        }
    }

    #[test]
    fn disabled_bets_lose_the_game_slot() {
        let mut ml = bet("Home", BetType::Moneyline, -130.0, Side::Home, 20.0, 90.0, 0);
        ml.weight = 0.0;
        ml.score = 0.0;
        let spread = bet("Home", BetType::Spread, -2.0, Side::Home, 1.0, 40.0, 1);
        let out = resolver().resolve(vec![ml, spread]);
        assert_eq!(out.bets.len(), 1);
        assert_eq!(out.bets[0].bet_type(), BetType::Spread);
    }
    #[test]
    fn disabled_moneyline_never_overrides_enabled_spread() {
        // Opposite sides, moneyline far more confident but weight 0
        let mut ml = bet("Home", BetType::Moneyline, -5000.0, Side::Away, 20.0, 76.0, 0);
        ml.weight = 0.0;
        ml.score = 0.0;
        let spread = bet("Home", BetType::Spread, -1.5, Side::Home, 3.0, 60.0, 1);
        let out = resolver().resolve(vec![ml, spread.clone()]);

        assert_eq!(out.bets, vec![spread]);
        assert_eq!(out.log.len(), 1);
        assert_eq!(out.log[0].bet_type, BetType::Moneyline);
        assert_eq!(out.log[0].reason, ResolutionReason::ConflictLowerConfidence);
    }
}
