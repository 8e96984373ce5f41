pub mod api;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod error;
pub mod facade;
pub mod outbox;
pub mod snapshot;
pub mod store;
pub mod worker;

pub use config::AppConfig;
pub use coordination::{install_signal_handlers, Shutdown};
pub use domain::{
    AchievementProgress, AggregateKey, Completion, JobState, LeaderboardEntry,
    LeaderboardSnapshot, NewPointEvent, PeriodType, PointEvent, PointSource, PointsAggregate,
    RewardJob, Scope, ScopeIds, ScopeKind, StandingRow, StudentLevel, TermCalendar,
};
pub use engine::{
    fan_out, rank_standings, AchievementCatalog, Engines, LevelCurve, PointsEngine,
};
pub use error::{Result, RewardsError};
pub use facade::{DashboardFacade, PointsSummary};
pub use outbox::{NewOutboxRecord, OutboxKind, OutboxRecord};
pub use snapshot::{SnapshotEngine, SnapshotScheduler};
pub use store::{PostgresStore, RewardPipeline};
pub use worker::{CompletionPipeline, JobWorker, ProcessOutcome, WorkerConfig, WorkerStats};
