//! Uncertainty and confidence curves shared by every predictor.
//!
//! Uncertainty grows with how much of the input was guessed: each
//! league-default field, each wholly unknown team and each ambiguous
//! team-name join adds a fixed increment, capped at `max`. Confidence then
//! rises with edge and conviction, is discounted by `(1 - uncertainty)` and
//! clamped to `[min, max]`.

use serde::{Deserialize, Serialize};

use crate::stats::TeamStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyParams {
    /// Floor applied to every prediction
    pub base: f64,
    pub per_defaulted_field: f64,
    /// Extra increment when a team was not found at all
    pub per_default_team: f64,
    pub per_ambiguous_match: f64,
    pub max: f64,
}

impl Default for UncertaintyParams {
    fn default() -> Self {
        Self {
            base: 0.05,
            per_defaulted_field: 0.03,
            per_default_team: 0.1,
            per_ambiguous_match: 0.05,
            max: 0.6,
        }
    }
}

impl UncertaintyParams {
    fn team_penalty(&self, team: &TeamStats) -> f64 {
        let mut penalty = team.defaulted_fields as f64 * self.per_defaulted_field;
        if team.is_default() {
            penalty += self.per_default_team;
        }
        if team.matched.is_ambiguous() {
            penalty += self.per_ambiguous_match;
        }
        penalty
    }

    /// Uncertainty of a prediction made from these two teams' stats, in
    /// `[0, max]`.
    pub fn for_matchup(&self, home: &TeamStats, away: &TeamStats) -> f64 {
        let raw = self.base + self.team_penalty(home) + self.team_penalty(away);
        raw.clamp(0.0, self.max.max(0.0))
    }
}

/// Confidence curve for one bet type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceCurve {
    pub base: f64,
    /// Points of confidence per unit of edge
    pub edge_slope: f64,
    pub edge_cap: f64,
    /// Points of confidence per unit of conviction (|predicted margin| for spreads)
    pub conviction_slope: f64,
    pub conviction_cap: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for ConfidenceCurve {
    fn default() -> Self {
        Self {
            base: 40.0,
            edge_slope: 3.0,
            edge_cap: 30.0,
            conviction_slope: 1.0,
            conviction_cap: 22.0,
            min: 20.0,
            max: 92.0,
        }
    }
}

impl ConfidenceCurve {
    pub fn spread() -> Self {
        Self::default()
    }

    pub fn total() -> Self {
        Self {
            edge_slope: 4.0,
            edge_cap: 40.0,
            conviction_slope: 0.0,
            conviction_cap: 0.0,
            ..Self::default()
        }
    }

    /// Moneyline edge is measured in win-probability points.
    pub fn moneyline() -> Self {
        Self {
            edge_slope: 2.0,
            edge_cap: 40.0,
            conviction_slope: 0.0,
            conviction_cap: 0.0,
            ..Self::default()
        }
    }

    pub fn confidence(&self, edge: f64, conviction: f64, uncertainty: f64) -> f64 {
        let edge_part = (edge.max(0.0) * self.edge_slope).min(self.edge_cap);
        let conviction_part = (conviction.max(0.0) * self.conviction_slope).min(self.conviction_cap);
        let discount = 1.0 - uncertainty.clamp(0.0, 1.0);
        let raw = (self.base + edge_part + conviction_part) * discount;
        if raw.is_finite() {
            raw.clamp(self.min, self.max)
        } else {
            self.min
        }
    }
}
