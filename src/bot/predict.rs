//! Candidate evaluation: look up both teams, run the predictor for the
//! candidate's bet type and compare the estimate with the market line.
//!
//! Every bet type expresses the market in the units of its own estimate
//! before the edge is taken:
//!
//! | bet type  | estimate              | market estimate                  |
//! |-----------|-----------------------|----------------------------------|
//! | SPREAD    | predicted home margin | `-line` (the margin the line implies) |
//! | TOTAL     | predicted total       | `line`                           |
//! | MONEYLINE | model home win %      | vig-free implied home win %      |

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::confidence::{ConfidenceCurve, UncertaintyParams};
use super::moneyline::{market_home_pct, MoneylineParams};
use super::spread::{SpreadParams, SpreadPredictor};
use super::total::{TotalParams, TotalPredictor};
use crate::db::models::{BetType, GameCandidate, InjuryReport, League, PredictionResult, Side};
use crate::stats::{StatProvider, TeamStats};

/// Raw predictor output before it is compared with the market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub estimate: f64,
    /// 0..1
    pub uncertainty: f64,
    /// Bet-type specific strength of the call (|margin| for spreads)
    pub conviction: f64,
}

/// Everything a predictor needs besides the two stat records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchupContext {
    pub league: League,
    /// False for neutral-site games
    pub home_advantage: bool,
    pub injuries: InjuryReport,
}

impl MatchupContext {
    pub fn neutral(league: League) -> Self {
        Self {
            league,
            home_advantage: false,
            injuries: InjuryReport::default(),
        }
    }
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Per-bet-type confidence curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceCurves {
    pub spread: ConfidenceCurve,
    pub total: ConfidenceCurve,
    pub moneyline: ConfidenceCurve,
}

impl Default for ConfidenceCurves {
    fn default() -> Self {
        Self {
            spread: ConfidenceCurve::spread(),
            total: ConfidenceCurve::total(),
            moneyline: ConfidenceCurve::moneyline(),
        }
    }
}

impl ConfidenceCurves {
    pub fn for_type(&self, bet_type: BetType) -> &ConfidenceCurve {
        match bet_type {
            BetType::Spread => &self.spread,
            BetType::Total => &self.total,
            BetType::Moneyline => &self.moneyline,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorParams {
    pub spread: SpreadParams,
    pub total: TotalParams,
    pub moneyline: MoneylineParams,
    pub uncertainty: UncertaintyParams,
    pub confidence: ConfidenceCurves,
}

/// All predictors plus the stat provider they read from.
#[derive(Debug, Clone, Default)]
pub struct Predictors {
    pub spread: SpreadPredictor,
    pub total: TotalPredictor,
    pub moneyline: MoneylineParams,
    pub confidence: ConfidenceCurves,
}

impl Predictors {
    pub fn new(params: &PredictorParams) -> Self {
        Self {
            spread: SpreadPredictor::new(params.spread, params.uncertainty),
            total: TotalPredictor::new(params.total, params.uncertainty),
            moneyline: params.moneyline,
            confidence: params.confidence,
        }
    }

    /// Evaluate one candidate against an already validated market line.
    /// Returns `None` only when the moneyline price cannot be converted.
    pub fn evaluate(
        &self,
        stats: &StatProvider,
        candidate: &GameCandidate,
        line: f64,
        ctx: &MatchupContext,
    ) -> Option<PredictionResult> {
        let home = stats.get_team_stats(&candidate.home_team, ctx.league);
        let away = stats.get_team_stats(&candidate.away_team, ctx.league);
        self.evaluate_with(&home, &away, candidate, line, ctx)
    }

    pub fn evaluate_with(
        &self,
        home: &TeamStats,
        away: &TeamStats,
        candidate: &GameCandidate,
        line: f64,
        ctx: &MatchupContext,
    ) -> Option<PredictionResult> {
        let (prediction, market_estimate) = match candidate.bet_type {
            BetType::Spread => (self.spread.predict(home, away, ctx), -line),
            BetType::Total => (self.total.predict(home, away, ctx), line),
            BetType::Moneyline => {
                let margin = self.spread.predict(home, away, ctx);
                let market = market_home_pct(line, candidate.away_odds)?;
                let pct = self.moneyline.home_win_pct(margin.estimate, ctx.league);
                (
                    Prediction {
                        estimate: pct,
                        uncertainty: margin.uncertainty,
                        conviction: 0.0,
                    },
                    market,
                )
            }
        };

        let side = match (candidate.bet_type, prediction.estimate > market_estimate) {
            (BetType::Total, true) => Side::Over,
            (BetType::Total, false) => Side::Under,
            (_, true) => Side::Home,
            (_, false) => Side::Away,
        };
        let edge = (prediction.estimate - market_estimate).abs();
        let confidence = self.confidence.for_type(candidate.bet_type).confidence(
            edge,
            prediction.conviction,
            prediction.uncertainty,
        );

        debug!(
            "{} {}: estimate={:.2} market={:.2} edge={:.2} unc={:.2} conf={:.1} → {}",
            candidate.matchup(),
            candidate.bet_type,
            prediction.estimate,
            market_estimate,
            edge,
            prediction.uncertainty,
            confidence,
            side
        );

        Some(PredictionResult {
            estimate: prediction.estimate,
            market_estimate,
            uncertainty: prediction.uncertainty,
            edge,
            confidence,
            side,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatTable;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn candidate(bet_type: BetType, line: f64) -> GameCandidate {
        GameCandidate {
            away_team: "Away U".into(),
            home_team: "Home State".into(),
            league: League::Ncaab,
            bet_type,
            market_line: Some(line),
            away_odds: None,
            scheduled_at: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            book: None,
        }
    }

    fn provider() -> StatProvider {
        let table = StatTable::from_json(&json!({
            "Home State": { "ppg": 80.0, "opp_ppg": 66.0, "poss": 70.0,
                            "home_ppg": 82.0, "away_ppg": 78.0,
                            "recent_margin": [8, 10, 12], "recent_ppg": [80, 81, 79] },
            "Away U": { "ppg": 70.0, "opp_ppg": 72.0, "poss": 70.0,
                        "home_ppg": 72.0, "away_ppg": 68.0,
                        "recent_margin": [-2, 0, 1], "recent_ppg": [70, 69, 71] }
        }))
        .unwrap();
        let mut p = StatProvider::new();
        p.load(League::Ncaab, &table);
        p
    }

    #[test]
    fn identical_teams_at_pick_em_are_low_confidence() {
        let predictors = Predictors::default();
        let stats = StatProvider::new();
        let mut c = candidate(BetType::Spread, 0.0);
        c.home_team = "Nobody".into();
        c.away_team = "Nobody Else".into();
        let r = predictors
            .evaluate(&stats, &c, 0.0, &MatchupContext::neutral(League::Ncaab))
            .unwrap();
        assert_relative_eq!(r.estimate, 0.0);
        assert!(r.confidence < 30.0, "confidence {}", r.confidence);
    }

    #[test]
    fn known_identical_teams_at_pick_em_are_low_confidence() {
        let stats = json!({ "ppg": 75.0, "opp_ppg": 70.0, "poss": 69.0,
                            "home_ppg": 77.0, "away_ppg": 73.0,
                            "recent_margin": [4, 6, 5], "recent_ppg": [76, 74, 75] });
        let table = StatTable::from_json(&json!({ "Home State": stats, "Away U": stats })).unwrap();
        let mut provider = StatProvider::new();
        provider.load(League::Ncaab, &table);

        let r = Predictors::default()
            .evaluate(
                &provider,
                &candidate(BetType::Spread, 0.0),
                0.0,
                &MatchupContext::neutral(League::Ncaab),
            )
            .unwrap();
        assert_relative_eq!(r.estimate, 0.0, epsilon = 1e-9);
        assert_relative_eq!(r.uncertainty, 0.05);
        // Base 40 discounted by the 5% floor uncertainty, nothing from edge
        assert_relative_eq!(r.confidence, 38.0, epsilon = 1e-9);
        assert!(r.confidence < 45.0);
    }

    #[test]
    fn spread_market_is_expressed_as_home_margin() {
        let predictors = Predictors::default();
        let ctx = MatchupContext {
            home_advantage: true,
            ..MatchupContext::neutral(League::Ncaab)
        };
        let r = predictors
            .evaluate(&provider(), &candidate(BetType::Spread, -3.5), -3.5, &ctx)
            .unwrap();
        assert_relative_eq!(r.market_estimate, 3.5);
        assert!(r.estimate > 3.5);
        assert_eq!(r.side, Side::Home);
        assert_relative_eq!(r.edge, r.estimate - 3.5);
    }

    #[test]
    fn big_home_line_picks_the_away_side() {
        let predictors = Predictors::default();
        let ctx = MatchupContext::neutral(League::Ncaab);
        let r = predictors
            .evaluate(&provider(), &candidate(BetType::Spread, -40.0), -40.0, &ctx)
            .unwrap();
        assert_eq!(r.side, Side::Away);
    }

    #[test]
    fn total_side_follows_estimate() {
        let predictors = Predictors::default();
        let ctx = MatchupContext::neutral(League::Ncaab);
        let over = predictors
            .evaluate(&provider(), &candidate(BetType::Total, 100.0), 100.0, &ctx)
            .unwrap();
        assert_eq!(over.side, Side::Over);
        let under = predictors
            .evaluate(&provider(), &candidate(BetType::Total, 200.0), 200.0, &ctx)
            .unwrap();
        assert_eq!(under.side, Side::Under);
    }

    #[test]
    fn moneyline_compares_win_probabilities() {
        let predictors = Predictors::default();
        let ctx = MatchupContext::neutral(League::Ncaab);
        let mut c = candidate(BetType::Moneyline, 150.0);
        c.away_odds = Some(-170.0);
        let r = predictors.evaluate(&provider(), &c, 150.0, &ctx).unwrap();
        // The model likes the home side far more than a +150 underdog price
        assert_eq!(r.side, Side::Home);
        assert!(r.market_estimate < 50.0);
        assert!(r.estimate > 50.0);

        assert!(predictors.evaluate(&provider(), &c, 50.0, &ctx).is_none());
    }
}
