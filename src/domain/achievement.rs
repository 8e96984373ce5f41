use super::scope::{Scope, ScopeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declarative unlock criterion.
///
/// Counting criteria advance by a fixed increment per qualifying event;
/// the threshold criterion tracks the ALL_TIME total directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criterion {
    /// Complete N activities of a given type
    CompletionsOfType { activity_type: String },
    /// Complete N activities within any scope of a given kind; progress is
    /// tracked per scope instance
    CompletionsInScope { scope_kind: ScopeKind },
    /// Reach a cumulative point total
    TotalPoints,
}

/// One achievement the catalog can unlock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDefinition {
    /// Stable identifier persisted on progress rows
    pub id: String,
    pub name: String,
    pub description: String,
    pub criterion: Criterion,
    pub target: i64,
    /// Progress added per qualifying event (ignored by TotalPoints)
    pub increment: i64,
}

/// Per-student progress against one achievement definition.
///
/// `unlocked` is monotonic: once true it never reverts. `progress` never
/// decreases except through an explicit reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub student_id: String,
    pub achievement_id: String,
    /// Present for scope-bound criteria, absent otherwise
    pub scope: Option<Scope>,
    pub progress: i64,
    pub target: i64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Emitted when an achievement unlocks, for the notification collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementUnlock {
    pub student_id: String,
    pub achievement_id: String,
    pub name: String,
    pub scope: Option<Scope>,
    pub unlocked_at: DateTime<Utc>,
}
