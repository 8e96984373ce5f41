//! Points Engine: completion in, point amount out.
//!
//! Pure and deterministic, no I/O. Manual adjustments bypass this entirely
//! and carry an explicitly signed amount.

use crate::config::PointsSettings;
use crate::domain::Completion;
use std::collections::HashMap;
use tracing::warn;

/// Maps a completed activity to its point amount via the configured base
/// table and optional difficulty multiplier
#[derive(Debug, Clone)]
pub struct PointsEngine {
    base_values: HashMap<String, i64>,
    default_points: i64,
}

impl PointsEngine {
    pub fn new(settings: &PointsSettings) -> Self {
        Self {
            base_values: settings.base_values.clone(),
            default_points: settings.default_points,
        }
    }

    /// Compute the award for a completion.
    ///
    /// Always a non-negative integer. An unknown activity type falls back
    /// to the default amount; a missing mapping must never block grading.
    pub fn compute(&self, completion: &Completion) -> i64 {
        let base = match self.base_values.get(&completion.activity_type) {
            Some(base) => *base,
            None => {
                warn!(
                    activity_type = %completion.activity_type,
                    default = self.default_points,
                    "no point mapping for activity type, using default"
                );
                self.default_points
            }
        };

        let amount = match completion.difficulty {
            Some(pct) if pct > 0 => base.saturating_mul(pct as i64) / 100,
            _ => base,
        };

        amount.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PointSource, ScopeIds};
    use chrono::Utc;

    fn completion(activity_type: &str, difficulty: Option<i32>) -> Completion {
        Completion {
            id: 1,
            student_id: "s1".to_string(),
            source: PointSource::Activity,
            source_id: "a1".to_string(),
            activity_type: activity_type.to_string(),
            difficulty,
            override_amount: None,
            scopes: ScopeIds::default(),
            completed_at: Utc::now(),
        }
    }

    fn engine() -> PointsEngine {
        PointsEngine::new(&PointsSettings::default())
    }

    #[test]
    fn test_base_table_lookup() {
        let engine = engine();
        assert_eq!(engine.compute(&completion("QUIZ", None)), 15);
        assert_eq!(engine.compute(&completion("PROJECT", None)), 40);
    }

    #[test]
    fn test_unknown_type_falls_back() {
        let engine = engine();
        assert_eq!(engine.compute(&completion("SCAVENGER_HUNT", None)), 5);
    }

    #[test]
    fn test_difficulty_multiplier() {
        let engine = engine();
        assert_eq!(engine.compute(&completion("QUIZ", Some(200))), 30);
        assert_eq!(engine.compute(&completion("EXERCISE", Some(150))), 15);
        // Non-positive multipliers are ignored
        assert_eq!(engine.compute(&completion("QUIZ", Some(0))), 15);
        assert_eq!(engine.compute(&completion("QUIZ", Some(-50))), 15);
    }

    #[test]
    fn test_deterministic() {
        let engine = engine();
        let c = completion("ASSESSMENT", Some(120));
        assert_eq!(engine.compute(&c), engine.compute(&c));
    }
}
