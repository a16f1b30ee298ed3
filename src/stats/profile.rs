use serde::{Deserialize, Serialize};

use crate::db::models::{League, TeamStatRecord};

/// Number of recent games a default record carries.
pub const DEFAULT_RECENT_GAMES: usize = 5;

/// League-average baselines. These fill any stat a source did not provide
/// and size the league-dependent adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeagueProfile {
    pub points_for: f64,
    pub points_against: f64,
    pub pace: f64,
    pub home_points_for: f64,
    pub away_points_for: f64,
    /// Home-court bonus added to the predicted home margin
    pub home_court: f64,
    /// Margin (in points) that moves home win odds by one logit
    pub margin_per_logit: f64,
}

impl League {
    pub fn profile(&self) -> LeagueProfile {
        match self {
            League::Ncaab => LeagueProfile {
                points_for: 72.0,
                points_against: 72.0,
                pace: 70.0,
                home_points_for: 73.5,
                away_points_for: 70.5,
                home_court: 3.5,
                margin_per_logit: 7.0,
            },
            League::Nba => LeagueProfile {
                points_for: 110.0,
                points_against: 110.0,
                pace: 99.0,
                home_points_for: 111.5,
                away_points_for: 108.5,
                home_court: 2.5,
                margin_per_logit: 7.0,
            },
            League::Nhl => LeagueProfile {
                points_for: 3.1,
                points_against: 3.1,
                pace: 60.0,
                home_points_for: 3.2,
                away_points_for: 3.0,
                home_court: 0.25,
                margin_per_logit: 1.3,
            },
            League::Ncaaf => LeagueProfile {
                points_for: 28.0,
                points_against: 28.0,
                pace: 70.0,
                home_points_for: 29.5,
                away_points_for: 26.5,
                home_court: 3.0,
                margin_per_logit: 9.0,
            },
        }
    }
}

impl LeagueProfile {
    /// The documented league-average record returned for unknown teams.
    pub fn default_record(&self) -> TeamStatRecord {
        TeamStatRecord {
            points_for: self.points_for,
            points_against: self.points_against,
            pace: self.pace,
            home_points_for: self.home_points_for,
            away_points_for: self.away_points_for,
            recent_margins: vec![0.0; DEFAULT_RECENT_GAMES],
            recent_points_for: vec![self.points_for; DEFAULT_RECENT_GAMES],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_league_default_is_balanced() {
        for league in League::ALL {
            let p = league.profile();
            let rec = p.default_record();
            assert_eq!(rec.points_for, rec.points_against);
            assert!(rec.home_points_for > rec.away_points_for);
            assert!(rec.pace > 0.0);
            assert!(rec.recent_margins.iter().all(|m| *m == 0.0));
        }
    }

    #[test]
    fn basketball_scores_more_than_hockey() {
        assert!(League::Nba.profile().points_for > League::Nhl.profile().points_for * 10.0);
    }
}
