//! Achievement Engine: progress counters against declarative criteria.
//!
//! Evaluation is pure. Idempotency comes from the pipeline: achievements
//! are only evaluated when the event log's conditional insert was won, so
//! a reprocessed completion can never double-increment.

use crate::domain::{
    AchievementDefinition, AchievementProgress, AchievementUnlock, Criterion, RewardJob, Scope,
    ScopeKind,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What one evaluation decided: progress rows to persist and unlocks to emit
#[derive(Debug, Default)]
pub struct AchievementEvaluation {
    pub updated: Vec<AchievementProgress>,
    pub unlocks: Vec<AchievementUnlock>,
}

/// The declarative achievement catalog
#[derive(Debug, Clone)]
pub struct AchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    pub fn new(definitions: Vec<AchievementDefinition>) -> Self {
        Self { definitions }
    }

    /// The stock catalog shipped with the portal
    pub fn default_catalog() -> Self {
        Self::new(vec![
            AchievementDefinition {
                id: "quiz-whiz".to_string(),
                name: "Quiz Whiz".to_string(),
                description: "Complete 5 quizzes".to_string(),
                criterion: Criterion::CompletionsOfType {
                    activity_type: "QUIZ".to_string(),
                },
                target: 5,
                increment: 1,
            },
            AchievementDefinition {
                id: "steady-worker".to_string(),
                name: "Steady Worker".to_string(),
                description: "Complete 20 exercises".to_string(),
                criterion: Criterion::CompletionsOfType {
                    activity_type: "EXERCISE".to_string(),
                },
                target: 20,
                increment: 1,
            },
            AchievementDefinition {
                id: "class-contributor".to_string(),
                name: "Class Contributor".to_string(),
                description: "Complete 10 activities in one class".to_string(),
                criterion: Criterion::CompletionsInScope {
                    scope_kind: ScopeKind::Class,
                },
                target: 10,
                increment: 1,
            },
            AchievementDefinition {
                id: "point-collector".to_string(),
                name: "Point Collector".to_string(),
                description: "Earn 1000 points".to_string(),
                criterion: Criterion::TotalPoints,
                target: 1000,
                increment: 0,
            },
        ])
    }

    pub fn definitions(&self) -> &[AchievementDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    /// Evaluate the catalog against one freshly awarded completion.
    ///
    /// `all_time_totals` holds the post-increment ALL_TIME total per scope
    /// of the event. `existing` is the student's current progress; rows
    /// already unlocked are left untouched (unlocked is monotonic).
    pub fn evaluate(
        &self,
        job: &RewardJob,
        all_time_totals: &HashMap<Scope, i64>,
        existing: &[AchievementProgress],
        now: DateTime<Utc>,
    ) -> AchievementEvaluation {
        let mut evaluation = AchievementEvaluation::default();

        for def in &self.definitions {
            let Some((scope, new_progress)) = self.progress_for(def, job, all_time_totals, existing)
            else {
                continue;
            };

            let current = existing
                .iter()
                .find(|p| p.achievement_id == def.id && p.scope == scope);

            if current.is_some_and(|p| p.unlocked) {
                continue;
            }

            let unlocking = new_progress >= def.target;
            let row = AchievementProgress {
                student_id: job.student_id.clone(),
                achievement_id: def.id.clone(),
                scope: scope.clone(),
                progress: new_progress.min(def.target),
                target: def.target,
                unlocked: unlocking,
                unlocked_at: unlocking.then_some(now),
            };

            if unlocking {
                evaluation.unlocks.push(AchievementUnlock {
                    student_id: job.student_id.clone(),
                    achievement_id: def.id.clone(),
                    name: def.name.clone(),
                    scope,
                    unlocked_at: now,
                });
            }

            evaluation.updated.push(row);
        }

        evaluation
    }

    /// The progress row scope and new progress value for one definition,
    /// or None when the event does not qualify
    fn progress_for(
        &self,
        def: &AchievementDefinition,
        job: &RewardJob,
        all_time_totals: &HashMap<Scope, i64>,
        existing: &[AchievementProgress],
    ) -> Option<(Option<Scope>, i64)> {
        let prior = |scope: &Option<Scope>| {
            existing
                .iter()
                .find(|p| p.achievement_id == def.id && p.scope == *scope)
                .map(|p| p.progress)
                .unwrap_or(0)
        };

        match &def.criterion {
            Criterion::CompletionsOfType { activity_type } => {
                if job.activity_type != *activity_type {
                    return None;
                }
                Some((None, prior(&None) + def.increment))
            }
            Criterion::CompletionsInScope { scope_kind } => {
                let id = job.scopes.get(*scope_kind)?;
                let scope = Some(Scope::new(*scope_kind, id));
                let progress = prior(&scope) + def.increment;
                Some((scope, progress))
            }
            // Tracked against the widest scope present on the event
            Criterion::TotalPoints => {
                let total = widest_total(job, all_time_totals)?;
                Some((None, total))
            }
        }
    }
}

fn widest_total(job: &RewardJob, totals: &HashMap<Scope, i64>) -> Option<i64> {
    for kind in [
        ScopeKind::Campus,
        ScopeKind::Course,
        ScopeKind::Subject,
        ScopeKind::Class,
    ] {
        if let Some(id) = job.scopes.get(kind) {
            if let Some(total) = totals.get(&Scope::new(kind, id)) {
                return Some(*total);
            }
        }
    }
    None
}

impl Default for AchievementCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobState, PointSource, ScopeIds};
    use chrono::Utc;

    fn job(activity_type: &str) -> RewardJob {
        RewardJob {
            id: 1,
            student_id: "s1".to_string(),
            source: PointSource::Activity,
            source_id: "a1".to_string(),
            activity_type: activity_type.to_string(),
            difficulty: None,
            override_amount: None,
            scopes: ScopeIds {
                class_id: Some("c1".to_string()),
                subject_id: Some("math".to_string()),
                course_id: Some("g3".to_string()),
                campus_id: Some("main".to_string()),
            },
            completed_at: Utc::now(),
            state: JobState::Processing,
            attempts: 0,
            next_attempt_at: Utc::now(),
            last_error: None,
        }
    }

    fn totals(campus_all_time: i64) -> HashMap<Scope, i64> {
        HashMap::from([(Scope::new(ScopeKind::Campus, "main"), campus_all_time)])
    }

    #[test]
    fn test_counting_criterion_increments() {
        let catalog = AchievementCatalog::default_catalog();
        let evaluation = catalog.evaluate(&job("QUIZ"), &totals(15), &[], Utc::now());

        let quiz = evaluation
            .updated
            .iter()
            .find(|p| p.achievement_id == "quiz-whiz")
            .unwrap();
        assert_eq!(quiz.progress, 1);
        assert!(!quiz.unlocked);
        assert!(evaluation.unlocks.is_empty());
    }

    #[test]
    fn test_unlocks_exactly_on_target() {
        let catalog = AchievementCatalog::default_catalog();
        let now = Utc::now();
        let mut progress: Vec<AchievementProgress> = Vec::new();

        // Apply five qualifying completions one at a time
        for i in 1..=5 {
            let evaluation = catalog.evaluate(&job("QUIZ"), &totals(15 * i), &progress, now);
            let quiz = evaluation
                .updated
                .iter()
                .find(|p| p.achievement_id == "quiz-whiz")
                .unwrap()
                .clone();

            if i < 5 {
                assert!(!quiz.unlocked, "unlocked early at increment {i}");
                assert!(evaluation
                    .unlocks
                    .iter()
                    .all(|u| u.achievement_id != "quiz-whiz"));
            } else {
                assert!(quiz.unlocked);
                assert_eq!(quiz.unlocked_at, Some(now));
                assert_eq!(
                    evaluation
                        .unlocks
                        .iter()
                        .filter(|u| u.achievement_id == "quiz-whiz")
                        .count(),
                    1
                );
            }

            progress.retain(|p| {
                !evaluation
                    .updated
                    .iter()
                    .any(|u| u.achievement_id == p.achievement_id && u.scope == p.scope)
            });
            progress.extend(evaluation.updated);
        }
    }

    #[test]
    fn test_unlocked_rows_never_touched_again() {
        let catalog = AchievementCatalog::default_catalog();
        let existing = vec![AchievementProgress {
            student_id: "s1".to_string(),
            achievement_id: "quiz-whiz".to_string(),
            scope: None,
            progress: 5,
            target: 5,
            unlocked: true,
            unlocked_at: Some(Utc::now()),
        }];

        let evaluation = catalog.evaluate(&job("QUIZ"), &totals(500), &existing, Utc::now());
        assert!(evaluation
            .updated
            .iter()
            .all(|p| p.achievement_id != "quiz-whiz"));
        assert!(evaluation.unlocks.is_empty());
    }

    #[test]
    fn test_scope_bound_criterion_tracks_per_class() {
        let catalog = AchievementCatalog::default_catalog();
        let evaluation = catalog.evaluate(&job("EXERCISE"), &totals(10), &[], Utc::now());

        let contributor = evaluation
            .updated
            .iter()
            .find(|p| p.achievement_id == "class-contributor")
            .unwrap();
        assert_eq!(
            contributor.scope,
            Some(Scope::new(ScopeKind::Class, "c1"))
        );
        assert_eq!(contributor.progress, 1);
    }

    #[test]
    fn test_total_points_tracks_widest_scope() {
        let catalog = AchievementCatalog::default_catalog();
        let evaluation = catalog.evaluate(&job("QUIZ"), &totals(1000), &[], Utc::now());

        let collector = evaluation
            .updated
            .iter()
            .find(|p| p.achievement_id == "point-collector")
            .unwrap();
        assert!(collector.unlocked);
        assert_eq!(collector.progress, 1000);
    }

    #[test]
    fn test_progress_caps_at_target() {
        let catalog = AchievementCatalog::default_catalog();
        let evaluation = catalog.evaluate(&job("QUIZ"), &totals(250_000), &[], Utc::now());

        let collector = evaluation
            .updated
            .iter()
            .find(|p| p.achievement_id == "point-collector")
            .unwrap();
        assert_eq!(collector.progress, 1000);
    }
}
