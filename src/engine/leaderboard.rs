//! Leaderboard ranking.
//!
//! Ordering is a strict total order with no shared ranks. Tie-break after
//! the score: the student whose most recent achievement unlocked earlier
//! wins, and `student_id` decides as the final deterministic fallback.
//! Ties are never resolved by iteration order.

use crate::domain::{LeaderboardEntry, StandingRow};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Rank standings into snapshot entries.
///
/// `previous` is the entry list of the immediately preceding snapshot for
/// the same key; students absent from it get `previous_rank = None`.
pub fn rank_standings(
    mut rows: Vec<StandingRow>,
    previous: Option<&[LeaderboardEntry]>,
) -> Vec<LeaderboardEntry> {
    rows.sort_by(compare_standings);

    let previous_ranks: HashMap<&str, i32> = previous
        .unwrap_or_default()
        .iter()
        .map(|e| (e.student_id.as_str(), e.rank))
        .collect();

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| LeaderboardEntry {
            previous_rank: previous_ranks.get(row.student_id.as_str()).copied(),
            student_id: row.student_id,
            rank: i as i32 + 1,
            score: row.total,
        })
        .collect()
}

fn compare_standings(a: &StandingRow, b: &StandingRow) -> Ordering {
    // Higher total first
    b.total
        .cmp(&a.total)
        // Earlier most-recent unlock first; students with no unlock sort
        // after those with one
        .then_with(|| match (a.last_unlock_at, b.last_unlock_at) {
            (Some(a_at), Some(b_at)) => a_at.cmp(&b_at),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        // Lexicographic student id as the final deterministic fallback
        .then_with(|| a.student_id.cmp(&b.student_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn row(student_id: &str, total: i64) -> StandingRow {
        StandingRow {
            student_id: student_id.to_string(),
            total,
            last_unlock_at: None,
        }
    }

    #[test]
    fn test_descending_by_total() {
        let entries = rank_standings(vec![row("a", 10), row("b", 30), row("c", 20)], None);

        assert_eq!(entries[0].student_id, "b");
        assert_eq!(entries[1].student_id, "c");
        assert_eq!(entries[2].student_id, "a");
        assert_eq!(
            entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_tie_broken_by_achievement_recency() {
        let now = Utc::now();
        let mut earlier = row("zed", 50);
        earlier.last_unlock_at = Some(now - Duration::days(30));
        let mut later = row("amy", 50);
        later.last_unlock_at = Some(now);

        // Earlier unlock wins despite the lexicographically larger id
        let entries = rank_standings(vec![later.clone(), earlier.clone()], None);
        assert_eq!(entries[0].student_id, "zed");
        assert_eq!(entries[1].student_id, "amy");
    }

    #[test]
    fn test_unlock_beats_no_unlock() {
        let mut unlocked = row("b", 50);
        unlocked.last_unlock_at = Some(Utc::now());

        let entries = rank_standings(vec![row("a", 50), unlocked], None);
        assert_eq!(entries[0].student_id, "b");
    }

    #[test]
    fn test_final_fallback_is_student_id() {
        let entries = rank_standings(vec![row("s2", 50), row("s1", 50)], None);
        assert_eq!(entries[0].student_id, "s1");
        assert_eq!(entries[1].student_id, "s2");
    }

    #[test]
    fn test_order_insensitive_to_input_order() {
        let now = Utc::now();
        let mut rows = vec![row("a", 10), row("b", 10), row("c", 30)];
        rows[1].last_unlock_at = Some(now);

        let forward = rank_standings(rows.clone(), None);
        rows.reverse();
        let backward = rank_standings(rows, None);

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_previous_rank_lookup() {
        let previous = vec![
            LeaderboardEntry {
                student_id: "a".to_string(),
                rank: 1,
                score: 40,
                previous_rank: None,
            },
            LeaderboardEntry {
                student_id: "b".to_string(),
                rank: 2,
                score: 20,
                previous_rank: Some(1),
            },
        ];

        let entries = rank_standings(
            vec![row("b", 60), row("a", 50), row("new", 10)],
            Some(previous.as_slice()),
        );

        assert_eq!(entries[0].student_id, "b");
        assert_eq!(entries[0].previous_rank, Some(2));
        assert_eq!(entries[1].previous_rank, Some(1));
        // New entrants have no previous rank
        assert_eq!(entries[2].student_id, "new");
        assert_eq!(entries[2].previous_rank, None);
    }

    #[test]
    fn test_ranks_strictly_sequential_with_ties() {
        let entries = rank_standings(vec![row("a", 50), row("b", 50), row("c", 50)], None);
        assert_eq!(
            entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
