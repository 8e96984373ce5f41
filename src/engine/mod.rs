//! The pure engines of the reward pipeline.
//!
//! Everything here is deterministic and free of I/O: points mapping, the
//! leveling curve, aggregation fan-out, achievement evaluation and
//! leaderboard ranking. The store applies their outputs transactionally.

pub mod achievement;
pub mod aggregation;
pub mod leaderboard;
pub mod level;
pub mod points;

pub use achievement::{AchievementCatalog, AchievementEvaluation};
pub use aggregation::{event_matches_key, fan_out};
pub use leaderboard::rank_standings;
pub use level::LevelCurve;
pub use points::PointsEngine;

/// The engine set the pipeline carries through a unit's transaction
#[derive(Debug, Clone)]
pub struct Engines {
    pub points: PointsEngine,
    pub curve: LevelCurve,
    pub catalog: AchievementCatalog,
    pub terms: crate::domain::TermCalendar,
}

impl Engines {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            points: PointsEngine::new(&config.points),
            curve: LevelCurve::new(&config.leveling),
            catalog: AchievementCatalog::default_catalog(),
            terms: crate::domain::TermCalendar::new(config.terms.clone()),
        }
    }
}
