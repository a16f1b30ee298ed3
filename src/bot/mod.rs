pub mod confidence;
pub mod conflict;
pub mod moneyline;
pub mod performance;
pub mod pipeline;
pub mod predict;
pub mod score;
pub mod spread;
pub mod total;
pub mod weights;

pub use conflict::{ConflictResolver, ResolverPolicy};
pub use performance::{compute_win_rates, WinRates};
pub use pipeline::{
    parse_candidates, GameNote, GameNotes, RankingEngine, RankingFilters, RankingOutcome,
    RejectedCandidate,
};
pub use predict::{MatchupContext, PredictorParams, Predictors};
pub use score::ScoreTiers;
pub use weights::{AdaptiveWeights, WeightParams};
