//! Aggregation Engine: the scope and period fan-out of a point event.
//!
//! One event updates one aggregate row per (present scope, period type)
//! pair. Fan-out, not nesting: a campus total is its own incrementally
//! maintained row, never derived by summing class totals at read time.

use crate::domain::{AggregateDelta, AggregateKey, NewPointEvent, PeriodType, TermCalendar};

/// Compute the set of aggregate increments a point event produces.
///
/// Pure; the store applies the deltas atomically inside the unit's
/// transaction. Scopes enumerate exhaustively per kind, so an event scoped
/// to all four kinds yields twenty deltas.
pub fn fan_out(event: &NewPointEvent, terms: &TermCalendar) -> Vec<AggregateDelta> {
    let scopes = event.scopes.present();
    let mut deltas = Vec::with_capacity(scopes.len() * PeriodType::all().len());

    for scope in scopes {
        for period_type in PeriodType::all() {
            deltas.push(AggregateDelta {
                key: AggregateKey {
                    student_id: event.student_id.clone(),
                    scope: scope.clone(),
                    period_type,
                    period_key: period_type.key_for(event.created_at, terms),
                },
                amount: event.amount,
            });
        }
    }

    deltas
}

/// Whether an event falls into a given aggregate bucket.
///
/// This is the same predicate the fan-out uses, exposed for the repair
/// recompute so drift correction and the hot path can never disagree.
pub fn event_matches_key(event: &NewPointEvent, key: &AggregateKey, terms: &TermCalendar) -> bool {
    event.student_id == key.student_id
        && event.scopes.get(key.scope.kind) == Some(key.scope.id.as_str())
        && key.period_type.key_for(event.created_at, terms) == key.period_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PointSource, Scope, ScopeIds, ScopeKind};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn event() -> NewPointEvent {
        NewPointEvent {
            student_id: "s1".to_string(),
            amount: 15,
            source: PointSource::Activity,
            source_id: "activity-a".to_string(),
            scopes: ScopeIds {
                class_id: Some("class-c".to_string()),
                subject_id: Some("math".to_string()),
                course_id: Some("grade3".to_string()),
                campus_id: Some("main".to_string()),
            },
            corrective: false,
            created_at: Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_full_fan_out_is_twenty_rows() {
        let deltas = fan_out(&event(), &TermCalendar::default());

        assert_eq!(deltas.len(), 20);
        assert!(deltas.iter().all(|d| d.amount == 15));

        // Every (scope, period) combination exactly once
        let keys: HashSet<_> = deltas
            .iter()
            .map(|d| (d.key.scope.clone(), d.key.period_type))
            .collect();
        assert_eq!(keys.len(), 20);
    }

    #[test]
    fn test_missing_scope_drops_out() {
        let mut event = event();
        event.scopes.campus_id = None;

        let deltas = fan_out(&event, &TermCalendar::default());
        assert_eq!(deltas.len(), 15);
        assert!(deltas
            .iter()
            .all(|d| d.key.scope.kind != ScopeKind::Campus));
    }

    #[test]
    fn test_period_keys_from_event_timestamp() {
        let deltas = fan_out(&event(), &TermCalendar::default());

        let day = deltas
            .iter()
            .find(|d| d.key.period_type == PeriodType::Day && d.key.scope.kind == ScopeKind::Class)
            .unwrap();
        assert_eq!(day.key.period_key, "2026-08-06");
        assert_eq!(day.key.scope, Scope::new(ScopeKind::Class, "class-c"));

        let all_time = deltas
            .iter()
            .find(|d| d.key.period_type == PeriodType::AllTime)
            .unwrap();
        assert_eq!(all_time.key.period_key, "all");
    }

    #[test]
    fn test_fan_out_agrees_with_match_predicate() {
        let event = event();
        let terms = TermCalendar::default();

        for delta in fan_out(&event, &terms) {
            assert!(event_matches_key(&event, &delta.key, &terms));
        }
    }

    #[test]
    fn test_match_predicate_rejects_other_buckets() {
        let event = event();
        let terms = TermCalendar::default();

        let other_day = AggregateKey {
            student_id: "s1".to_string(),
            scope: Scope::new(ScopeKind::Class, "class-c"),
            period_type: PeriodType::Day,
            period_key: "2026-08-07".to_string(),
        };
        assert!(!event_matches_key(&event, &other_day, &terms));

        let other_class = AggregateKey {
            student_id: "s1".to_string(),
            scope: Scope::new(ScopeKind::Class, "class-z"),
            period_type: PeriodType::AllTime,
            period_key: "all".to_string(),
        };
        assert!(!event_matches_key(&event, &other_class, &terms));
    }
}
