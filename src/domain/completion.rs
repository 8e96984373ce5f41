use super::event::PointSource;
use super::scope::ScopeIds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A graded activity completion from the external feed.
///
/// The grading subsystem owns these records; the worker only reads them.
/// Whether one has been processed is decided by the event log's dedup key,
/// never by a flag on the source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: i64,
    pub student_id: String,
    pub source: PointSource,
    pub source_id: String,
    /// Free-form activity type (QUIZ, EXERCISE, ...); unknown values fall
    /// back to the configured default point amount
    pub activity_type: String,
    /// Difficulty multiplier in percent (150 = 1.5x), when the activity
    /// carries one
    pub difficulty: Option<i32>,
    /// Explicit signed amount for manual adjustments and bonuses; these
    /// bypass the points engine entirely
    pub override_amount: Option<i64>,
    pub scopes: ScopeIds,
    pub completed_at: DateTime<Utc>,
}
