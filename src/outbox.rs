//! Typed outbox for cross-subsystem notification.
//!
//! The pipeline writes a small typed record in the same transaction as the
//! award it describes; the notification subsystem polls and marks them
//! dispatched. This replaces in-process event dispatch, which disappears
//! across process boundaries.

use crate::domain::{AchievementUnlock, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind tag of an outbox record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxKind {
    PointsAwarded,
    LevelUp,
    AchievementUnlocked,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::PointsAwarded => "POINTS_AWARDED",
            OutboxKind::LevelUp => "LEVEL_UP",
            OutboxKind::AchievementUnlocked => "ACHIEVEMENT_UNLOCKED",
        }
    }
}

impl fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OutboxKind {
    type Error = crate::error::RewardsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "POINTS_AWARDED" => Ok(OutboxKind::PointsAwarded),
            "LEVEL_UP" => Ok(OutboxKind::LevelUp),
            "ACHIEVEMENT_UNLOCKED" => Ok(OutboxKind::AchievementUnlocked),
            other => Err(crate::error::RewardsError::Internal(format!(
                "unknown outbox kind: {other}"
            ))),
        }
    }
}

/// Payload of a POINTS_AWARDED record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsAwardedPayload {
    pub student_id: String,
    pub amount: i64,
    pub event_id: i64,
    pub source_id: String,
}

/// Payload of a LEVEL_UP record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelUpPayload {
    pub student_id: String,
    pub scope: Scope,
    pub level: i32,
}

/// A record waiting to be written, payload already typed
#[derive(Debug, Clone)]
pub struct NewOutboxRecord {
    pub kind: OutboxKind,
    pub payload: serde_json::Value,
}

impl NewOutboxRecord {
    pub fn points_awarded(payload: &PointsAwardedPayload) -> crate::error::Result<Self> {
        Ok(Self {
            kind: OutboxKind::PointsAwarded,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn level_up(payload: &LevelUpPayload) -> crate::error::Result<Self> {
        Ok(Self {
            kind: OutboxKind::LevelUp,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn achievement_unlocked(unlock: &AchievementUnlock) -> crate::error::Result<Self> {
        Ok(Self {
            kind: OutboxKind::AchievementUnlocked,
            payload: serde_json::to_value(unlock)?,
        })
    }
}

/// A stored outbox record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: i64,
    pub kind: OutboxKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            OutboxKind::PointsAwarded,
            OutboxKind::LevelUp,
            OutboxKind::AchievementUnlocked,
        ] {
            assert_eq!(OutboxKind::try_from(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_points_awarded_payload() {
        let record = NewOutboxRecord::points_awarded(&PointsAwardedPayload {
            student_id: "s1".to_string(),
            amount: 15,
            event_id: 7,
            source_id: "a1".to_string(),
        })
        .unwrap();

        assert_eq!(record.kind, OutboxKind::PointsAwarded);
        assert_eq!(record.payload["amount"], 15);
    }
}
