pub mod document;
pub mod ids;
pub mod skill;
pub mod timeline;

pub use document::{MatchDocument, MatchInfo, MedalCount, PlayerStats, TeamScore};
pub use ids::{AccountId, MatchId};
pub use skill::{SkillData, SkillEntry};
pub use timeline::{EventTimeline, TimelineEvent};
