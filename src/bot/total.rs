//! Game-total heuristic.
//!
//! Each side's expected score is the average of its own scoring rate and a
//! defense-adjusted rate against this opponent, scaled by a shared pace
//! factor and the side's recent scoring ratio. The home side gets a small
//! multiplicative boost when the game is at its venue.

use serde::{Deserialize, Serialize};

use super::confidence::UncertaintyParams;
use super::predict::{mean, MatchupContext, Prediction};
use crate::db::models::TeamStatRecord;
use crate::stats::TeamStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TotalParams {
    pub home_boost: f64,
    /// Recent games needed before the recent-form ratio is applied
    pub min_recent_games: usize,
    pub recent_ratio_min: f64,
    pub recent_ratio_max: f64,
}

impl Default for TotalParams {
    fn default() -> Self {
        Self {
            home_boost: 1.03,
            min_recent_games: 3,
            recent_ratio_min: 0.8,
            recent_ratio_max: 1.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TotalPredictor {
    pub params: TotalParams,
    pub uncertainty: UncertaintyParams,
}

impl TotalPredictor {
    pub fn new(params: TotalParams, uncertainty: UncertaintyParams) -> Self {
        Self {
            params,
            uncertainty,
        }
    }

    /// Predicted combined score. Always finite and non-negative.
    pub fn predict(&self, home: &TeamStats, away: &TeamStats, ctx: &MatchupContext) -> Prediction {
        let (h, a) = (&home.record, &away.record);
        let pace = self.pace_factor(h, a, ctx);

        let mut home_score = expected_score(h, a) * pace * self.recent_ratio(h);
        let away_score = expected_score(a, h) * pace * self.recent_ratio(a);
        if ctx.home_advantage {
            home_score *= self.params.home_boost;
        }

        let total = home_score + away_score;
        let total = if total.is_finite() { total.max(0.0) } else { 0.0 };

        Prediction {
            estimate: total,
            uncertainty: self.uncertainty.for_matchup(home, away),
            conviction: 0.0,
        }
    }

    /// Geometric mean of both paces relative to the league average.
    fn pace_factor(&self, h: &TeamStatRecord, a: &TeamStatRecord, ctx: &MatchupContext) -> f64 {
        let league_pace = ctx.league.profile().pace;
        let game_pace = (h.pace.max(0.0) * a.pace.max(0.0)).sqrt();
        if league_pace > 0.0 && game_pace > 0.0 {
            game_pace / league_pace
        } else {
            1.0
        }
    }

    fn recent_ratio(&self, t: &TeamStatRecord) -> f64 {
        if t.recent_points_for.len() < self.params.min_recent_games || t.points_for <= 0.0 {
            return 1.0;
        }
        let ratio = mean(&t.recent_points_for) / t.points_for;
        if ratio.is_finite() {
            ratio.clamp(self.params.recent_ratio_min, self.params.recent_ratio_max)
        } else {
            1.0
        }
    }
}

/// Average of a side's own scoring and its scoring adjusted for the
/// opponent's defense.
fn expected_score(team: &TeamStatRecord, opponent: &TeamStatRecord) -> f64 {
    let adjusted = (team.points_for + opponent.points_against) / 2.0;
    ((team.points_for + adjusted) / 2.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::League;
    use crate::stats::{StatSource, TeamMatch};
    use approx::assert_relative_eq;

    fn team(points_for: f64, points_against: f64, pace: f64) -> TeamStats {
        TeamStats {
            record: TeamStatRecord {
                points_for,
                points_against,
                pace,
                home_points_for: points_for,
                away_points_for: points_for,
                recent_margins: vec![0.0; 5],
                recent_points_for: vec![points_for; 5],
            },
            source: StatSource::Cached,
            defaulted_fields: 0,
            matched: TeamMatch::Exact { key: "x".into() },
        }
    }

    // Equal paces and mirrored offense/defense cancel in the blend, so the
    // total equals the naive sum before the home boost; the boost alone
    // lifts it past 220.
    #[test]
    fn home_boost_lifts_mirrored_matchup() {
        let p = TotalPredictor::default();
        let home = team(120.0, 100.0, 70.0);
        let away = team(100.0, 120.0, 70.0);
        let ctx = MatchupContext {
            home_advantage: true,
            ..MatchupContext::neutral(League::Ncaab)
        };
        let total = p.predict(&home, &away, &ctx).estimate;
        assert!(total > 220.0, "total {total}");
        assert_relative_eq!(total, 120.0 * 1.03 + 100.0, epsilon = 1e-9);
    }

    #[test]
    fn faster_pace_raises_total() {
        let p = TotalPredictor::default();
        let ctx = MatchupContext::neutral(League::Ncaab);
        let slow = p.predict(&team(70.0, 70.0, 63.0), &team(70.0, 70.0, 63.0), &ctx);
        let fast = p.predict(&team(70.0, 70.0, 77.0), &team(70.0, 70.0, 77.0), &ctx);
        assert!(fast.estimate > slow.estimate);
    }

    #[test]
    fn hot_recent_scoring_is_bounded() {
        let p = TotalPredictor::default();
        let ctx = MatchupContext::neutral(League::Ncaab);
        let mut hot = team(70.0, 70.0, 70.0);
        hot.record.recent_points_for = vec![140.0; 5];
        let base = p.predict(&team(70.0, 70.0, 70.0), &team(70.0, 70.0, 70.0), &ctx);
        let boosted = p.predict(&hot, &team(70.0, 70.0, 70.0), &ctx);
        assert_relative_eq!(boosted.estimate - base.estimate, 70.0 * 0.2, epsilon = 1e-9);
    }

    #[test]
    fn total_is_finite_and_non_negative_for_degenerate_inputs() {
        let p = TotalPredictor::default();
        for league in League::ALL {
            let ctx = MatchupContext::neutral(league);
            let d = TeamStats::league_default(league);
            let zero = team(0.0, 0.0, 0.0);
            for (h, a) in [(&d, &d), (&zero, &zero), (&zero, &d)] {
                let pred = p.predict(h, a, &ctx);
                assert!(pred.estimate.is_finite());
                assert!(pred.estimate >= 0.0);
            }
            assert_relative_eq!(p.predict(&d, &d, &ctx).uncertainty, 0.6);
        }
    }
}
