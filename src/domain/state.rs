use super::event::PointSource;
use super::scope::ScopeIds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job state machine states, one per unit of work (an activity completion)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Discovered, waiting to be claimed
    Pending,
    /// Claimed by a unit processor
    Processing,
    /// Pipeline committed (or the award already existed)
    Done,
    /// Failed with attempts remaining, waiting out its backoff
    Failed,
    /// Attempts exhausted; excluded from polling until manually requeued
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Processing => "PROCESSING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
            JobState::Dead => "DEAD",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        match (self, target) {
            // From Pending
            (Pending, Processing) => true,

            // From Processing
            (Processing, Done) => true,   // Pipeline committed
            (Processing, Failed) => true, // Retryable failure
            (Processing, Dead) => true,   // Attempts exhausted

            // From Failed
            (Failed, Processing) => true, // Backoff elapsed, reclaimed

            // From Dead
            (Dead, Pending) => true, // Manual requeue

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<JobState> {
        use JobState::*;

        match self {
            Pending => vec![Processing],
            Processing => vec![Done, Failed, Dead],
            Failed => vec![Processing],
            Dead => vec![Pending],
            Done => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobState {
    type Error = crate::error::RewardsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "PROCESSING" => Ok(JobState::Processing),
            "DONE" => Ok(JobState::Done),
            "FAILED" => Ok(JobState::Failed),
            "DEAD" => Ok(JobState::Dead),
            other => Err(crate::error::RewardsError::UnexpectedState(
                other.to_string(),
            )),
        }
    }
}

/// One unit of work in the worker's queue: a completion awaiting its award.
///
/// Attempt bookkeeping lives here, never on the source completion record,
/// keeping the grading subsystem and the rewards pipeline decoupled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardJob {
    pub id: i64,
    pub student_id: String,
    pub source: PointSource,
    pub source_id: String,
    pub activity_type: String,
    pub difficulty: Option<i32>,
    /// Carried through from manual-adjustment completions; bypasses the
    /// points engine
    pub override_amount: Option<i64>,
    pub scopes: ScopeIds,
    pub completed_at: DateTime<Utc>,
    pub state: JobState,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl RewardJob {
    /// The completion this job was discovered from, reconstructed for the
    /// points engine
    pub fn completion(&self) -> super::Completion {
        super::Completion {
            id: self.id,
            student_id: self.student_id.clone(),
            source: self.source,
            source_id: self.source_id.clone(),
            activity_type: self.activity_type.clone(),
            difficulty: self.difficulty,
            override_amount: self.override_amount,
            scopes: self.scopes.clone(),
            completed_at: self.completed_at,
        }
    }
}
