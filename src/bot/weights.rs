//! Adaptive bet-type weights learned from the resolved history.
//!
//! `weight = clamp(1 + slope · (smoothed − baseline) · stability, min, max)`
//!
//! * `smoothed` is the Beta(α, β)-smoothed win rate `(wins + α) / (n + α + β)`,
//!   so a handful of results cannot swing the weight on its own.
//! * `stability` ramps from 0 at `min_samples` decided bets to 1 at
//!   `full_stability_samples`.
//!
//! The curve is monotonic in the measured win rate. Bet types listed in
//! `disabled` get weight 0 regardless of record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::performance::WinRates;
use crate::db::models::{AdaptiveWeight, BetType, PerformanceRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightParams {
    pub prior_alpha: f64,
    pub prior_beta: f64,
    pub slope: f64,
    pub baseline_win_rate: f64,
    pub min_samples: u32,
    pub full_stability_samples: u32,
    pub min_weight: f64,
    pub max_weight: f64,
    pub disabled: Vec<BetType>,
}

impl Default for WeightParams {
    fn default() -> Self {
        Self {
            prior_alpha: 2.0,
            prior_beta: 2.0,
            slope: 2.0,
            baseline_win_rate: 0.5,
            min_samples: 20,
            full_stability_samples: 30,
            min_weight: 0.3,
            max_weight: 2.0,
            disabled: vec![BetType::Moneyline],
        }
    }
}

impl WeightParams {
    pub fn smoothed_win_rate(&self, rec: &PerformanceRecord) -> f64 {
        let denom = rec.total as f64 + self.prior_alpha + self.prior_beta;
        if denom > 0.0 {
            (rec.wins as f64 + self.prior_alpha) / denom
        } else {
            self.baseline_win_rate
        }
    }

    pub fn stability(&self, samples: u32) -> f64 {
        if samples < self.min_samples {
            0.0
        } else if samples >= self.full_stability_samples {
            1.0
        } else {
            let span = (self.full_stability_samples - self.min_samples) as f64;
            (samples - self.min_samples) as f64 / span
        }
    }

    pub fn weight_for(&self, bet_type: BetType, rec: &PerformanceRecord, now: DateTime<Utc>) -> AdaptiveWeight {
        let smoothed = self.smoothed_win_rate(rec);
        let stability = self.stability(rec.total);
        let disabled = self.disabled.contains(&bet_type);
        let weight = if disabled {
            0.0
        } else {
            let raw = 1.0 + self.slope * (smoothed - self.baseline_win_rate) * stability;
            raw.clamp(self.min_weight, self.max_weight)
        };
        AdaptiveWeight {
            bet_type,
            weight,
            win_rate: smoothed,
            samples: rec.total,
            stability,
            disabled,
            updated_at: now,
        }
    }
}

/// Immutable weight snapshot used for one ranking run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveWeights {
    weights: BTreeMap<BetType, AdaptiveWeight>,
}

impl AdaptiveWeights {
    /// Recompute every bet type's weight from fresh win rates.
    pub fn refresh(win_rates: &WinRates, params: &WeightParams, now: DateTime<Utc>) -> Self {
        let weights = BetType::ALL
            .iter()
            .map(|t| {
                let w = params.weight_for(*t, &win_rates.get(*t), now);
                info!(
                    "Weight {}: {:.3} (win rate {:.3}, n={}, stability {:.2}{})",
                    t,
                    w.weight,
                    w.win_rate,
                    w.samples,
                    w.stability,
                    if w.disabled { ", disabled" } else { "" }
                );
                (*t, w)
            })
            .collect();
        Self { weights }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = AdaptiveWeight>) -> Self {
        Self {
            weights: entries.into_iter().map(|w| (w.bet_type, w)).collect(),
        }
    }

    /// Weight multiplier for a bet type; 1.0 when nothing was stored yet.
    pub fn get(&self, bet_type: BetType) -> f64 {
        self.weights.get(&bet_type).map(|w| w.weight).unwrap_or(1.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = &AdaptiveWeight> {
        self.weights.values()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
