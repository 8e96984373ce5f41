use thiserror::Error;

/// Main error type for the rewards engine
#[derive(Error, Debug)]
pub enum RewardsError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Domain errors
    #[error("Unknown scope kind: {0}")]
    UnknownScopeKind(String),

    #[error("Unknown period type: {0}")]
    UnknownPeriodType(String),

    #[error("Unknown point source: {0}")]
    UnknownPointSource(String),

    #[error("Unknown achievement: {0}")]
    UnknownAchievement(String),

    #[error("Aggregate not found: {0}")]
    AggregateNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    // Pipeline errors
    #[error("Unit timed out after {elapsed_ms}ms")]
    UnitTimeout { elapsed_ms: u64 },

    #[error("Snapshot generation failed: {0}")]
    SnapshotGeneration(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RewardsError
pub type Result<T> = std::result::Result<T, RewardsError>;
