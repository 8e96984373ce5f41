use super::scope::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Level standing derived from a cumulative experience total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: i32,
    /// Experience accumulated inside the current level
    pub current_experience: i64,
    /// Experience needed to advance from this level to the next
    pub experience_for_next_level: i64,
}

/// Per-scope level row.
///
/// Always recomputed from the scope's ALL_TIME aggregate, never advanced by
/// its own delta, so a retroactive point correction needs one re-derivation
/// rather than a history replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentLevel {
    pub student_id: String,
    pub scope: Scope,
    pub level: i32,
    pub current_experience: i64,
    pub experience_for_next_level: i64,
    pub updated_at: DateTime<Utc>,
}
