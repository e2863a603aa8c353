//! Match simulation: lifecycle state machine, storm and their shared plumbing

pub mod directory;
pub mod events;
pub mod geometry;
pub mod r#match;
pub mod results;
pub mod safezone;
pub mod session;
pub mod settings;

pub use directory::{DamageOutcome, InMemoryDirectory, PlayerDirectory};
pub use geometry::Vec3;
pub use r#match::{MatchEngine, MatchError, MatchInfo, MatchPhase, VictoryOutcome};
pub use results::{Elimination, EliminationCause, EliminationRecord, MatchResult};
pub use safezone::{SafezoneEngine, SafezoneState, StormPhase};
pub use session::{MatchRegistry, MatchSession, MatchSummary};
pub use settings::{MatchSettings, StormPhaseData, StormSettings, VictoryCondition};

/// Team identifier as reported by the player directory
pub type TeamId = u32;
