use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of wager a candidate represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetType {
    Spread,
    Total,
    Moneyline,
}

impl BetType {
    pub const ALL: [BetType; 3] = [BetType::Spread, BetType::Total, BetType::Moneyline];

    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Spread => "SPREAD",
            BetType::Total => "TOTAL",
            BetType::Moneyline => "MONEYLINE",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SPREAD" | "SPREADS" | "ATS" => Ok(BetType::Spread),
            "TOTAL" | "TOTALS" | "OVER_UNDER" | "OU" => Ok(BetType::Total),
            "MONEYLINE" | "ML" | "H2H" => Ok(BetType::Moneyline),
            other => anyhow::bail!("unknown bet type: {other}"),
        }
    }
}

/// Leagues with their own baseline scoring profile (see `League::profile`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum League {
    Ncaab,
    Nba,
    Nhl,
    Ncaaf,
}

impl League {
    pub const ALL: [League; 4] = [League::Ncaab, League::Nba, League::Nhl, League::Ncaaf];

    pub fn as_str(&self) -> &'static str {
        match self {
            League::Ncaab => "ncaab",
            League::Nba => "nba",
            League::Nhl => "nhl",
            League::Ncaaf => "ncaaf",
        }
    }

    /// Parse a league label, falling back to college basketball for anything
    /// unrecognized.
    pub fn from_str_lossy(s: &str) -> League {
        s.parse().unwrap_or(League::Ncaab)
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for League {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ncaab" | "ncaa" | "cbb" | "basketball_ncaab" | "college_basketball" => {
                Ok(League::Ncaab)
            }
            "nba" | "basketball_nba" => Ok(League::Nba),
            "nhl" | "icehockey_nhl" | "ice_hockey" => Ok(League::Nhl),
            "ncaaf" | "cfb" | "americanfootball_ncaaf" | "college_football" => Ok(League::Ncaaf),
            other => anyhow::bail!("unknown league: {other}"),
        }
    }
}

/// The side of a wager that the model recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Home,
    Away,
    Over,
    Under,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Home => "HOME",
            Side::Away => "AWAY",
            Side::Over => "OVER",
            Side::Under => "UNDER",
        }
    }

    /// The other side of the same market.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
            Side::Over => Side::Under,
            Side::Under => Side::Over,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HOME" => Ok(Side::Home),
            "AWAY" => Ok(Side::Away),
            "OVER" => Ok(Side::Over),
            "UNDER" => Ok(Side::Under),
            other => anyhow::bail!("unknown side: {other}"),
        }
    }
}

/// Normalized per-team statistics. Every field is always populated; values
/// the source did not provide come from the league profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatRecord {
    /// Season points scored per game
    pub points_for: f64,
    /// Season points allowed per game
    pub points_against: f64,
    /// Possessions per game
    pub pace: f64,
    pub home_points_for: f64,
    pub away_points_for: f64,
    /// Recent final margins, oldest first
    pub recent_margins: Vec<f64>,
    /// Recent points scored, oldest first
    pub recent_points_for: Vec<f64>,
}

/// Canonical identity of one game: team keys plus the scheduled UTC date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameKey {
    pub away: String,
    pub home: String,
    pub date: NaiveDate,
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({})", self.away, self.home, self.date)
    }
}

/// One potential wager as supplied by the odds collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCandidate {
    pub away_team: String,
    pub home_team: String,
    #[serde(default = "default_league")]
    pub league: League,
    pub bet_type: BetType,
    /// SPREAD: home spread (negative = home favored).
    /// TOTAL: the posted total.
    /// MONEYLINE: home American odds (negative = home favored).
    #[serde(default, deserialize_with = "lenient_line")]
    pub market_line: Option<f64>,
    /// MONEYLINE only: away American odds, used to strip the vig.
    #[serde(default, deserialize_with = "lenient_line")]
    pub away_odds: Option<f64>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub book: Option<String>,
}

fn default_league() -> League {
    League::Ncaab
}

/// Numbers and numeric strings are lines; anything else ("PK", "OFF", null)
/// reads as missing and the candidate is excluded downstream.
fn lenient_line<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

impl GameCandidate {
    /// Free-text matchup label as the odds feed named it.
    pub fn matchup(&self) -> String {
        format!("{} @ {}", self.away_team, self.home_team)
    }

    pub fn team_for(&self, side: Side) -> Option<&str> {
        match side {
            Side::Home => Some(&self.home_team),
            Side::Away => Some(&self.away_team),
            Side::Over | Side::Under => None,
        }
    }
}

/// Injury context for one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjuryReport {
    #[serde(default)]
    pub home_missing_key_players: bool,
    #[serde(default)]
    pub away_missing_key_players: bool,
}

/// A predictor's view of one candidate after comparing with the market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted home margin, predicted total, or home win % (moneyline)
    pub estimate: f64,
    /// The market line expressed in the same units as `estimate`
    pub market_estimate: f64,
    /// 0..1, higher = less reliable
    pub uncertainty: f64,
    /// |estimate - market_estimate|
    pub edge: f64,
    /// 20..92
    pub confidence: f64,
    pub side: Side,
}

/// Where a scored bet came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BetOrigin {
    Model,
    /// Spread side flipped to the underdog because a stronger moneyline
    /// signal named the other team.
    FlippedSpread { original_side: Side, moneyline_confidence: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredBet {
    pub candidate: GameCandidate,
    pub game: GameKey,
    pub prediction: PredictionResult,
    pub weight: f64,
    /// LARLScore
    pub score: f64,
    /// Position in the run's candidate list, used as the final tie-breaker
    pub input_index: usize,
    pub origin: BetOrigin,
}

impl ScoredBet {
    pub fn bet_type(&self) -> BetType {
        self.candidate.bet_type
    }

    pub fn side(&self) -> Side {
        self.prediction.side
    }

    /// Line from the picked side's perspective (spread and moneyline flip
    /// sign for the away side).
    pub fn picked_line(&self) -> Option<f64> {
        let line = self.candidate.market_line?;
        Some(match (self.bet_type(), self.side()) {
            (BetType::Spread, Side::Away) => -line,
            (BetType::Moneyline, Side::Away) => self.candidate.away_odds.unwrap_or(-line),
            _ => line,
        })
    }

    /// Human-readable pick, e.g. "Duke -3.5", "OVER 145.5", "UNC (Moneyline)".
    pub fn pick_label(&self) -> String {
        let line = self.picked_line().unwrap_or(0.0);
        match (self.bet_type(), self.side()) {
            (BetType::Spread, side) => format!(
                "{} {:+.1}",
                self.candidate.team_for(side).unwrap_or("?"),
                line
            ),
            (BetType::Total, side) => format!("{} {:.1}", side, line),
            (BetType::Moneyline, side) => format!(
                "{} (Moneyline)",
                self.candidate.team_for(side).unwrap_or("?")
            ),
        }
    }
}

/// Outcome of a recorded bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetResult {
    Pending,
    Win,
    Loss,
    Push,
}

impl BetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetResult::Pending => "PENDING",
            BetResult::Win => "WIN",
            BetResult::Loss => "LOSS",
            BetResult::Push => "PUSH",
        }
    }

    /// WIN and LOSS are the only results that count toward win rates.
    pub fn is_decided(&self) -> bool {
        matches!(self, BetResult::Win | BetResult::Loss)
    }
}

impl fmt::Display for BetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" | "OPEN" => Ok(BetResult::Pending),
            "WIN" | "W" | "WON" => Ok(BetResult::Win),
            "LOSS" | "L" | "LOST" => Ok(BetResult::Loss),
            "PUSH" | "P" | "VOID" => Ok(BetResult::Push),
            other => anyhow::bail!("unknown bet result: {other}"),
        }
    }
}

/// A recommendation persisted in the bet history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub id: Option<i64>,
    /// `GameKey` display string
    pub game: String,
    pub league: League,
    pub bet_type: BetType,
    pub side: Side,
    pub pick: String,
    pub market_line: Option<f64>,
    pub confidence: f64,
    pub edge: f64,
    pub score: f64,
    pub result: BetResult,
    pub recorded_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregated win/loss record for one bet type (or bucket).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
}

/// Persisted per-bet-type multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveWeight {
    pub bet_type: BetType,
    pub weight: f64,
    /// Smoothed win rate the weight was derived from
    pub win_rate: f64,
    pub samples: u32,
    pub stability: f64,
    pub disabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// What the resolver or ranking filters did to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Excluded,
    Dropped,
    Replaced,
}

impl ResolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::Excluded => "excluded",
            ResolutionAction::Dropped => "dropped",
            ResolutionAction::Replaced => "replaced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    MalformedLine,
    DisabledBetType,
    BelowMinEdge,
    BelowMinConfidence,
    DuplicateBetType,
    ConflictLowerConfidence,
    ConflictFlippedSpread,
    SinglePerGame,
    BelowTopN,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionReason::MalformedLine => "malformed_line",
            ResolutionReason::DisabledBetType => "disabled_bet_type",
            ResolutionReason::BelowMinEdge => "below_min_edge",
            ResolutionReason::BelowMinConfidence => "below_min_confidence",
            ResolutionReason::DuplicateBetType => "duplicate_bet_type",
            ResolutionReason::ConflictLowerConfidence => "conflict_lower_confidence",
            ResolutionReason::ConflictFlippedSpread => "conflict_flipped_spread",
            ResolutionReason::SinglePerGame => "single_per_game",
            ResolutionReason::BelowTopN => "below_top_n",
        }
    }
}

/// Provenance entry for anything removed or replaced during a ranking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub game: String,
    pub bet_type: BetType,
    pub side: Option<Side>,
    pub action: ResolutionAction,
    pub reason: ResolutionReason,
    pub detail: String,
    /// Pick label of the bet that took this one's place, if any
    pub replacement: Option<String>,
}
