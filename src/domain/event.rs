use super::scope::ScopeIds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What produced a point award
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointSource {
    Activity,
    Assessment,
    ManualAdjustment,
    Bonus,
}

impl PointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointSource::Activity => "ACTIVITY",
            PointSource::Assessment => "ASSESSMENT",
            PointSource::ManualAdjustment => "MANUAL_ADJUSTMENT",
            PointSource::Bonus => "BONUS",
        }
    }
}

impl fmt::Display for PointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PointSource {
    type Error = crate::error::RewardsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "ACTIVITY" => Ok(PointSource::Activity),
            "ASSESSMENT" => Ok(PointSource::Assessment),
            "MANUAL_ADJUSTMENT" => Ok(PointSource::ManualAdjustment),
            "BONUS" => Ok(PointSource::Bonus),
            other => Err(crate::error::RewardsError::UnknownPointSource(
                other.to_string(),
            )),
        }
    }
}

/// A point award about to be written to the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPointEvent {
    pub student_id: String,
    /// Signed: corrective events may revoke points
    pub amount: i64,
    pub source: PointSource,
    pub source_id: String,
    pub scopes: ScopeIds,
    /// Corrective events supersede an earlier award and are exempt from
    /// the one-event-per-(student, source, source_id) guarantee
    pub corrective: bool,
    pub created_at: DateTime<Utc>,
}

/// A point award as stored in the append-only event log.
///
/// Immutable once written; only superseded by a later corrective event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEvent {
    pub id: i64,
    pub student_id: String,
    pub amount: i64,
    pub source: PointSource,
    pub source_id: String,
    pub scopes: ScopeIds,
    pub corrective: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of the conditional insert into the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This run won the conditional insert
    Inserted(i64),
    /// Another run already awarded this completion; treated as success
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_source_roundtrip() {
        for source in [
            PointSource::Activity,
            PointSource::Assessment,
            PointSource::ManualAdjustment,
            PointSource::Bonus,
        ] {
            assert_eq!(PointSource::try_from(source.as_str()).unwrap(), source);
        }
        assert!(PointSource::try_from("GIFT").is_err());
    }
}
