//! Moneyline conversion: spread-model margin → home win probability, and
//! American odds → vig-free implied probability.

use serde::{Deserialize, Serialize};

use crate::db::models::League;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoneylineParams {
    /// Multiplies the league's margin-per-logit scale
    pub logit_scale: f64,
    /// Model probabilities are clamped to [floor, 1 - floor]
    pub probability_floor: f64,
}

impl Default for MoneylineParams {
    fn default() -> Self {
        Self {
            logit_scale: 1.0,
            probability_floor: 0.03,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

impl MoneylineParams {
    /// Home win probability in percent for a predicted home margin.
    pub fn home_win_pct(&self, margin: f64, league: League) -> f64 {
        let scale = league.profile().margin_per_logit * self.logit_scale;
        let p = if scale > 0.0 && margin.is_finite() {
            sigmoid(margin / scale)
        } else {
            0.5
        };
        p.clamp(self.probability_floor, 1.0 - self.probability_floor) * 100.0
    }
}

/// Raw implied probability (0..1) of American odds. `None` for odds that
/// cannot be quoted (|odds| < 100 or non-finite).
pub fn implied_probability(american: f64) -> Option<f64> {
    if !american.is_finite() || american.abs() < 100.0 {
        return None;
    }
    Some(if american < 0.0 {
        -american / (-american + 100.0)
    } else {
        100.0 / (american + 100.0)
    })
}

/// Home win probability in percent with the bookmaker margin removed. Falls
/// back to the raw home price when the away price is missing or invalid.
pub fn market_home_pct(home_odds: f64, away_odds: Option<f64>) -> Option<f64> {
    let home = implied_probability(home_odds)?;
    let fair = match away_odds.and_then(implied_probability) {
        Some(away) if home + away > 0.0 => home / (home + away),
        _ => home,
    };
    Some(fair * 100.0)
}
