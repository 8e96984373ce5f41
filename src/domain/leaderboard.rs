use super::period::PeriodType;
use super::scope::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ranked line of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub student_id: String,
    /// 1-based, strictly sequential; the deterministic tie-break guarantees
    /// a total order so ranks are never shared
    pub rank: i32,
    pub score: i64,
    /// Rank in the immediately preceding snapshot for the same key; None
    /// for new entrants
    pub previous_rank: Option<i32>,
}

/// An immutable, timestamped materialization of one ranked leaderboard.
///
/// A new generation writes a new row rather than mutating the old one, so
/// rank-change comparisons against history stay available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub id: i64,
    pub entity: Scope,
    pub period_type: PeriodType,
    pub period_key: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<LeaderboardEntry>,
}

/// Raw ranking input: one student's standing within a scope and period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingRow {
    pub student_id: String,
    pub total: i64,
    /// `unlocked_at` of the student's most recent achievement, used as the
    /// first tie-break after the total
    pub last_unlock_at: Option<DateTime<Utc>>,
}
