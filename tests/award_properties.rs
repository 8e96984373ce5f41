//! End-to-end properties of the pure award pipeline: points mapping,
//! fan-out, leveling, achievement unlocks and ranking, exercised through
//! the public API.

use chrono::{Duration, TimeZone, Utc};
use rewards::config::{LevelingSettings, PointsSettings};
use rewards::domain::{
    AchievementDefinition, Completion, Criterion, JobState, NewPointEvent, PeriodType,
    PointSource, RewardJob, Scope, ScopeIds, ScopeKind, StandingRow, TermCalendar,
};
use rewards::engine::{fan_out, rank_standings, AchievementCatalog, LevelCurve, PointsEngine};
use std::collections::HashMap;

fn scope_ids() -> ScopeIds {
    ScopeIds {
        class_id: Some("class-c".to_string()),
        subject_id: Some("math".to_string()),
        course_id: Some("grade3".to_string()),
        campus_id: Some("main".to_string()),
    }
}

fn quiz_completion(student: &str, source_id: &str) -> Completion {
    Completion {
        id: 1,
        student_id: student.to_string(),
        source: PointSource::Activity,
        source_id: source_id.to_string(),
        activity_type: "QUIZ".to_string(),
        difficulty: None,
        override_amount: None,
        scopes: scope_ids(),
        completed_at: Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, 0).unwrap(),
    }
}

fn event_for(completion: &Completion, amount: i64) -> NewPointEvent {
    NewPointEvent {
        student_id: completion.student_id.clone(),
        amount,
        source: completion.source,
        source_id: completion.source_id.clone(),
        scopes: completion.scopes.clone(),
        corrective: false,
        created_at: completion.completed_at,
    }
}

/// The scenario from the drawing board: student S completes a QUIZ (base
/// 15) in class C, subject Math, course Grade3, campus Main. One event of
/// amount 15, and every scope gets all five period buckets incremented.
#[test]
fn quiz_completion_fans_out_to_every_scope_and_period() {
    let engine = PointsEngine::new(&PointsSettings::default());
    let completion = quiz_completion("student-s", "activity-a");

    let amount = engine.compute(&completion);
    assert_eq!(amount, 15);

    let event = event_for(&completion, amount);
    let deltas = fan_out(&event, &TermCalendar::default());

    assert_eq!(deltas.len(), 20);
    assert!(deltas.iter().all(|d| d.amount == 15));

    for kind in ScopeKind::all() {
        let periods: Vec<PeriodType> = deltas
            .iter()
            .filter(|d| d.key.scope.kind == kind)
            .map(|d| d.key.period_type)
            .collect();
        assert_eq!(periods.len(), 5, "scope kind {kind} missing buckets");
    }

    let class_day = deltas
        .iter()
        .find(|d| {
            d.key.scope == Scope::new(ScopeKind::Class, "class-c")
                && d.key.period_type == PeriodType::Day
        })
        .unwrap();
    assert_eq!(class_day.key.period_key, "2026-08-06");
}

/// Aggregate totals are order-independent: any interleaving of increments
/// for the same key sums to the same total.
#[test]
fn aggregate_totals_commute() {
    let terms = TermCalendar::default();
    let amounts = [15i64, 10, 25, -5, 40];

    let mut forward: HashMap<String, i64> = HashMap::new();
    let mut backward: HashMap<String, i64> = HashMap::new();

    for (i, amount) in amounts.iter().enumerate() {
        let completion = quiz_completion("student-s", &format!("activity-{i}"));
        for delta in fan_out(&event_for(&completion, *amount), &terms) {
            *forward.entry(delta.key.to_string()).or_insert(0) += delta.amount;
        }
    }

    for (i, amount) in amounts.iter().enumerate().rev() {
        let completion = quiz_completion("student-s", &format!("activity-{i}"));
        for delta in fan_out(&event_for(&completion, *amount), &terms) {
            *backward.entry(delta.key.to_string()).or_insert(0) += delta.amount;
        }
    }

    assert_eq!(forward, backward);
    let expected: i64 = amounts.iter().sum();
    assert!(forward.values().all(|total| *total == expected));
}

/// A level derived from a total is the same whether computed once or
/// replayed; a no-op replay changes nothing.
#[test]
fn level_derivation_is_replay_safe() {
    let curve = LevelCurve::new(&LevelingSettings::default());

    for total in [0i64, 15, 99, 100, 282, 4_000] {
        let first = curve.derive(total);
        let replayed = curve.derive(total);
        assert_eq!(first, replayed);
    }

    // Levels never decrease as experience grows
    let mut last_level = 0;
    for total in (0..5_000).step_by(50) {
        let info = curve.derive(total);
        assert!(info.level >= last_level);
        last_level = info.level;
    }
}

fn job_with_type(activity_type: &str, n: usize) -> RewardJob {
    RewardJob {
        id: n as i64,
        student_id: "student-s".to_string(),
        source: PointSource::Activity,
        source_id: format!("activity-{n}"),
        activity_type: activity_type.to_string(),
        difficulty: None,
        override_amount: None,
        scopes: scope_ids(),
        completed_at: Utc::now(),
        state: JobState::Processing,
        attempts: 0,
        next_attempt_at: Utc::now(),
        last_error: None,
    }
}

/// A target-5 achievement unlocks exactly on the fifth qualifying
/// increment, never earlier, and never again afterwards.
#[test]
fn achievement_unlocks_exactly_once_at_target() {
    let catalog = AchievementCatalog::new(vec![AchievementDefinition {
        id: "five-quizzes".to_string(),
        name: "Five Quizzes".to_string(),
        description: "Complete 5 quizzes".to_string(),
        criterion: Criterion::CompletionsOfType {
            activity_type: "QUIZ".to_string(),
        },
        target: 5,
        increment: 1,
    }]);

    let now = Utc::now();
    let totals = HashMap::new();
    let mut progress = Vec::new();
    let mut total_unlocks = 0;

    for n in 1..=7 {
        let evaluation = catalog.evaluate(&job_with_type("QUIZ", n), &totals, &progress, now);
        total_unlocks += evaluation.unlocks.len();

        if n < 5 {
            assert_eq!(total_unlocks, 0, "unlocked early at increment {n}");
        }

        for row in evaluation.updated {
            progress.retain(|p: &rewards::domain::AchievementProgress| {
                !(p.achievement_id == row.achievement_id && p.scope == row.scope)
            });
            progress.push(row);
        }
    }

    assert_eq!(total_unlocks, 1);
    assert_eq!(progress[0].progress, 5);
    assert!(progress[0].unlocked);
}

/// Repeated generations over identical standings produce identical
/// orderings, including for exact ties.
#[test]
fn ranking_is_deterministic_across_generations() {
    let base = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

    let rows = vec![
        StandingRow {
            student_id: "carol".to_string(),
            total: 120,
            last_unlock_at: Some(base),
        },
        StandingRow {
            student_id: "bob".to_string(),
            total: 120,
            last_unlock_at: Some(base + Duration::days(2)),
        },
        StandingRow {
            student_id: "alice".to_string(),
            total: 120,
            last_unlock_at: None,
        },
        StandingRow {
            student_id: "dave".to_string(),
            total: 200,
            last_unlock_at: None,
        },
    ];

    let first = rank_standings(rows.clone(), None);

    let mut shuffled = rows;
    shuffled.reverse();
    shuffled.swap(0, 2);
    let second = rank_standings(shuffled, None);

    assert_eq!(first, second);

    // dave leads on total; carol beats bob on earlier unlock; alice has no
    // unlock and ranks last of the tie
    let order: Vec<&str> = first.iter().map(|e| e.student_id.as_str()).collect();
    assert_eq!(order, vec!["dave", "carol", "bob", "alice"]);
    assert_eq!(
        first.iter().map(|e| e.rank).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
}

/// Rank deltas come from the previous snapshot; new entrants have none.
#[test]
fn previous_ranks_follow_snapshot_history() {
    let day_one = rank_standings(
        vec![
            StandingRow {
                student_id: "alice".to_string(),
                total: 30,
                last_unlock_at: None,
            },
            StandingRow {
                student_id: "bob".to_string(),
                total: 50,
                last_unlock_at: None,
            },
        ],
        None,
    );
    assert!(day_one.iter().all(|e| e.previous_rank.is_none()));

    let day_two = rank_standings(
        vec![
            StandingRow {
                student_id: "alice".to_string(),
                total: 90,
                last_unlock_at: None,
            },
            StandingRow {
                student_id: "bob".to_string(),
                total: 60,
                last_unlock_at: None,
            },
            StandingRow {
                student_id: "carol".to_string(),
                total: 10,
                last_unlock_at: None,
            },
        ],
        Some(day_one.as_slice()),
    );

    assert_eq!(day_two[0].student_id, "alice");
    assert_eq!(day_two[0].previous_rank, Some(2));
    assert_eq!(day_two[1].student_id, "bob");
    assert_eq!(day_two[1].previous_rank, Some(1));
    assert_eq!(day_two[2].student_id, "carol");
    assert_eq!(day_two[2].previous_rank, None);
}
