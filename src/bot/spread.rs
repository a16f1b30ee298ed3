//! Point-spread heuristic.
//!
//! The predicted home margin is a blend of three offense/defense
//! differentials, plus a recent-form term, an optional home-court bonus and
//! an injury swing. With the home-advantage flag off and no injuries the
//! model is anti-symmetric: swapping the teams negates the margin.

use serde::{Deserialize, Serialize};

use super::confidence::UncertaintyParams;
use super::predict::{mean, MatchupContext, Prediction};
use crate::stats::TeamStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadParams {
    /// Weight of (home offense vs away defense) minus (away offense vs home defense)
    pub matchup_weight: f64,
    /// Weight of (home offense − away offense)
    pub offense_weight: f64,
    /// Weight of (away defense − home defense)
    pub defense_weight: f64,
    pub recent_form_factor: f64,
    /// Multiplies the league's home-court bonus
    pub home_court_scale: f64,
    /// Points moved against a side missing key players
    pub injury_swing: f64,
}

impl Default for SpreadParams {
    fn default() -> Self {
        Self {
            matchup_weight: 1.0,
            offense_weight: 1.0,
            defense_weight: 1.0,
            recent_form_factor: 0.3,
            home_court_scale: 1.0,
            injury_swing: 3.0,
        }
    }
}

/// Breakdown of a spread prediction, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadBreakdown {
    pub baseline: f64,
    pub recent_form: f64,
    pub home_court: f64,
    pub injury: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SpreadPredictor {
    pub params: SpreadParams,
    pub uncertainty: UncertaintyParams,
}

impl SpreadPredictor {
    pub fn new(params: SpreadParams, uncertainty: UncertaintyParams) -> Self {
        Self {
            params,
            uncertainty,
        }
    }

    /// Predicted home margin (positive = home wins by that many points).
    pub fn predict(&self, home: &TeamStats, away: &TeamStats, ctx: &MatchupContext) -> Prediction {
        let breakdown = self.breakdown(home, away, ctx);
        let margin =
            breakdown.baseline + breakdown.recent_form + breakdown.home_court + breakdown.injury;
        let margin = if margin.is_finite() { margin } else { 0.0 };

        Prediction {
            estimate: margin,
            uncertainty: self.uncertainty.for_matchup(home, away),
            conviction: margin.abs(),
        }
    }

    pub fn breakdown(
        &self,
        home: &TeamStats,
        away: &TeamStats,
        ctx: &MatchupContext,
    ) -> SpreadBreakdown {
        let p = &self.params;
        let (h, a) = (&home.record, &away.record);

        // Venue splits only enter when the game is played at a real home venue
        let (h_off, a_off) = if ctx.home_advantage {
            (
                (h.points_for + h.home_points_for) / 2.0,
                (a.points_for + a.away_points_for) / 2.0,
            )
        } else {
            (h.points_for, a.points_for)
        };
        let (h_def, a_def) = (h.points_against, a.points_against);

        let matchup = (h_off - a_def) - (a_off - h_def);
        let offense = h_off - a_off;
        let defense = a_def - h_def;
        let weight_sum = p.matchup_weight + p.offense_weight + p.defense_weight;
        let baseline = if weight_sum > 0.0 {
            (p.matchup_weight * matchup + p.offense_weight * offense + p.defense_weight * defense)
                / weight_sum
        } else {
            0.0
        };

        let recent_form =
            p.recent_form_factor * (mean(&h.recent_margins) - mean(&a.recent_margins));

        let home_court = if ctx.home_advantage {
            ctx.league.profile().home_court * p.home_court_scale
        } else {
            0.0
        };

        let mut injury = 0.0;
        if ctx.injuries.home_missing_key_players {
            injury -= p.injury_swing;
        }
        if ctx.injuries.away_missing_key_players {
            injury += p.injury_swing;
        }

        SpreadBreakdown {
            baseline,
            recent_form,
            home_court,
            injury,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{InjuryReport, League, TeamStatRecord};
    use crate::stats::{StatSource, TeamMatch};
    use approx::assert_relative_eq;

    fn team(points_for: f64, points_against: f64, recent: f64) -> TeamStats {
        TeamStats {
            record: TeamStatRecord {
                points_for,
                points_against,
                pace: 70.0,
                home_points_for: points_for + 1.5,
                away_points_for: points_for - 1.5,
                recent_margins: vec![recent; 5],
                recent_points_for: vec![points_for; 5],
            },
            source: StatSource::Cached,
            defaulted_fields: 0,
            matched: TeamMatch::Exact { key: "x".into() },
        }
    }

    fn neutral() -> MatchupContext {
        MatchupContext::neutral(League::Ncaab)
    }

    #[test]
    fn identical_teams_on_neutral_floor_predict_zero() {
        let p = SpreadPredictor::default();
        let t = team(75.0, 70.0, 2.0);
        assert_relative_eq!(p.predict(&t, &t, &neutral()).estimate, 0.0);
    }

    #[test]
    fn swapping_teams_negates_margin() {
        let p = SpreadPredictor::default();
        let a = team(82.0, 66.0, 6.0);
        let b = team(71.0, 74.0, -2.0);
        let ab = p.predict(&a, &b, &neutral()).estimate;
        let ba = p.predict(&b, &a, &neutral()).estimate;
        assert!(ab > 0.0);
        assert_relative_eq!(ab, -ba, epsilon = 1e-9);
    }

    #[test]
    fn strong_home_team_is_favored() {
        let p = SpreadPredictor::default();
        let home = team(120.0, 100.0, 0.0);
        let away = team(100.0, 120.0, 0.0);
        let ctx = MatchupContext {
            home_advantage: true,
            ..neutral()
        };
        let b = p.breakdown(&home, &away, &ctx);
        assert_relative_eq!(b.home_court, 3.5);
        assert!(p.predict(&home, &away, &ctx).estimate > 13.0);
    }

    #[test]
    fn recent_form_uses_point_three_factor() {
        let p = SpreadPredictor::default();
        let b = p.breakdown(&team(70.0, 70.0, 10.0), &team(70.0, 70.0, 0.0), &neutral());
        assert_relative_eq!(b.recent_form, 3.0);
    }

    #[test]
    fn injuries_swing_the_margin() {
        let p = SpreadPredictor::default();
        let t = team(70.0, 70.0, 0.0);
        let ctx = MatchupContext {
            injuries: InjuryReport {
                home_missing_key_players: true,
                away_missing_key_players: false,
            },
            ..neutral()
        };
        assert_relative_eq!(p.predict(&t, &t, &ctx).estimate, -3.0);
    }

    #[test]
    fn default_stats_never_lower_uncertainty() {
        let p = SpreadPredictor::default();
        let known = team(72.0, 72.0, 0.0);
        let unknown = TeamStats::league_default(League::Ncaab);
        let base = p.predict(&known, &known, &neutral()).uncertainty;
        assert!(p.predict(&unknown, &known, &neutral()).uncertainty >= base);
        let both = p.predict(&unknown, &unknown, &neutral());
        assert_relative_eq!(both.uncertainty, 0.6);
        assert!(both.estimate.is_finite());
    }
}
