//! LARLScore: the ranking score of a candidate bet.
//!
//! `score = (confidence / 100) × edge × weight × edge_tier × confidence_tier`
//!
//! Every factor is non-negative, so the score is monotonic in edge,
//! confidence and weight, and a zero weight zeroes the score. Ranking uses
//! [`rank_cmp`], a total order that also places disabled (weight 0) bets
//! after every enabled one regardless of score.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::db::models::{BetOrigin, GameCandidate, GameKey, PredictionResult, ScoredBet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreTiers {
    /// Edge at or above which `high_edge_multiplier` applies
    pub high_edge: f64,
    pub high_edge_multiplier: f64,
    pub mid_edge: f64,
    pub mid_edge_multiplier: f64,
    /// Edge below which `low_edge_multiplier` applies
    pub low_edge: f64,
    pub low_edge_multiplier: f64,
    pub high_confidence: f64,
    pub high_confidence_multiplier: f64,
    pub mid_confidence: f64,
    pub mid_confidence_multiplier: f64,
}

impl Default for ScoreTiers {
    fn default() -> Self {
        Self {
            high_edge: 20.0,
            high_edge_multiplier: 1.5,
            mid_edge: 10.0,
            mid_edge_multiplier: 1.3,
            low_edge: 5.0,
            low_edge_multiplier: 0.5,
            high_confidence: 80.0,
            high_confidence_multiplier: 1.2,
            mid_confidence: 75.0,
            mid_confidence_multiplier: 1.1,
        }
    }
}

impl ScoreTiers {
    pub fn edge_multiplier(&self, edge: f64) -> f64 {
        if edge >= self.high_edge {
            self.high_edge_multiplier
        } else if edge >= self.mid_edge {
            self.mid_edge_multiplier
        } else if edge < self.low_edge {
            self.low_edge_multiplier
        } else {
            1.0
        }
    }

    pub fn confidence_multiplier(&self, confidence: f64) -> f64 {
        if confidence >= self.high_confidence {
            self.high_confidence_multiplier
        } else if confidence >= self.mid_confidence {
            self.mid_confidence_multiplier
        } else {
            1.0
        }
    }

    /// The LARLScore of a prediction under a bet-type weight.
    pub fn score(&self, prediction: &PredictionResult, weight: f64) -> f64 {
        let edge = prediction.edge.max(0.0);
        let confidence = prediction.confidence.max(0.0);
        let weight = weight.max(0.0);
        let score = (confidence / 100.0)
            * edge
            * weight
            * self.edge_multiplier(edge)
            * self.confidence_multiplier(confidence);
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }
}

/// Score a candidate into a [`ScoredBet`].
pub fn score_bet(
    tiers: &ScoreTiers,
    candidate: GameCandidate,
    game: GameKey,
    prediction: PredictionResult,
    weight: f64,
    input_index: usize,
) -> ScoredBet {
    let score = tiers.score(&prediction, weight);
    ScoredBet {
        candidate,
        game,
        prediction,
        weight,
        score,
        input_index,
        origin: BetOrigin::Model,
    }
}

/// Ranking order: enabled before disabled, then score, edge and confidence
/// descending, then input order ascending.
pub fn rank_cmp(a: &ScoredBet, b: &ScoredBet) -> Ordering {
    let enabled = |s: &ScoredBet| s.weight > 0.0;
    enabled(b)
        .cmp(&enabled(a))
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| b.prediction.edge.total_cmp(&a.prediction.edge))
        .then_with(|| b.prediction.confidence.total_cmp(&a.prediction.confidence))
        .then_with(|| a.input_index.cmp(&b.input_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{BetType, League, Side};
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn prediction(edge: f64, confidence: f64) -> PredictionResult {
        PredictionResult {
            estimate: 0.0,
            market_estimate: edge,
            uncertainty: 0.1,
            edge,
            confidence,
            side: Side::Home,
        }
    }

    fn bet(edge: f64, confidence: f64, weight: f64, idx: usize) -> ScoredBet {
        let candidate = GameCandidate {
            away_team: "A".into(),
            home_team: "B".into(),
            league: League::Ncaab,
            bet_type: BetType::Spread,
            market_line: Some(-edge),
            away_odds: None,
            scheduled_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            book: None,
        };
        let game = GameKey {
            away: "a".into(),
            home: "b".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        };
        score_bet(
            &ScoreTiers::default(),
            candidate,
            game,
            prediction(edge, confidence),
            weight,
            idx,
        )
    }

    #[test]
    fn score_applies_tiers() {
        let t = ScoreTiers::default();
        // 0.8 * 12 * 1.0 * 1.3 * 1.2
        assert_relative_eq!(t.score(&prediction(12.0, 80.0), 1.0), 0.8 * 12.0 * 1.3 * 1.2);
        // low-edge penalty
        assert_relative_eq!(t.score(&prediction(4.0, 50.0), 1.0), 0.5 * 4.0 * 0.5);
        assert_relative_eq!(t.score(&prediction(7.0, 60.0), 1.5), 0.6 * 7.0 * 1.5);
    }

    #[test]
    fn zero_weight_zeroes_score() {
        let t = ScoreTiers::default();
        assert_relative_eq!(t.score(&prediction(30.0, 92.0), 0.0), 0.0);
    }

    #[test]
    fn score_is_monotonic_in_edge_and_confidence() {
        let t = ScoreTiers::default();
        let mut last = 0.0;
        for e in 0..40 {
            let s = t.score(&prediction(e as f64, 70.0), 1.0);
            assert!(s >= last);
            last = s;
        }
        assert!(t.score(&prediction(8.0, 81.0), 1.0) > t.score(&prediction(8.0, 79.0), 1.0));
    }

    #[test]
    fn disabled_bets_rank_last_and_ties_are_stable() {
        let mut bets = vec![
            bet(30.0, 92.0, 0.0, 0),
            bet(6.0, 60.0, 1.0, 1),
            bet(6.0, 60.0, 1.0, 2),
            bet(8.0, 60.0, 1.0, 3),
        ];
        bets.sort_by(rank_cmp);
        let order: Vec<usize> = bets.iter().map(|b| b.input_index).collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }
}
