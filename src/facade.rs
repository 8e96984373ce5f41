//! Dashboard Query Facade.
//!
//! Read-only projections over already-committed aggregate and snapshot
//! state, consumed by the UI layer. Nothing here triggers recomputation;
//! a missing row degrades to zeros or absence rather than an error.

use crate::domain::{
    AchievementProgress, LeaderboardSnapshot, PeriodType, PointEvent, Scope, StudentLevel,
    TermCalendar,
};
use crate::error::Result;
use crate::outbox::OutboxRecord;
use crate::store::PostgresStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Per-period totals for one student within one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsSummary {
    pub student_id: String,
    pub scope: Scope,
    pub day: i64,
    pub week: i64,
    pub month: i64,
    pub term: i64,
    pub all_time: i64,
}

/// Read-only query surface for dashboards
#[derive(Clone)]
pub struct DashboardFacade {
    store: PostgresStore,
    terms: TermCalendar,
}

impl DashboardFacade {
    pub fn new(store: PostgresStore, terms: TermCalendar) -> Self {
        Self { store, terms }
    }

    /// Totals for the current day/week/month/term plus all-time.
    ///
    /// Absent aggregate rows read as zero.
    pub async fn points_summary(&self, student_id: &str, scope: &Scope) -> Result<PointsSummary> {
        let now = Utc::now();
        let keys: Vec<(PeriodType, String)> = PeriodType::all()
            .into_iter()
            .map(|p| (p, p.key_for(now, &self.terms)))
            .collect();

        let totals = self.store.period_totals(student_id, scope, &keys).await?;

        let mut summary = PointsSummary {
            student_id: student_id.to_string(),
            scope: scope.clone(),
            day: 0,
            week: 0,
            month: 0,
            term: 0,
            all_time: 0,
        };

        for (period_type, total) in totals {
            match period_type {
                PeriodType::Day => summary.day = total,
                PeriodType::Week => summary.week = total,
                PeriodType::Month => summary.month = total,
                PeriodType::Term => summary.term = total,
                PeriodType::AllTime => summary.all_time = total,
            }
        }

        Ok(summary)
    }

    /// Level standing for one scope; None until the student earns points
    pub async fn student_level(
        &self,
        student_id: &str,
        scope: &Scope,
    ) -> Result<Option<StudentLevel>> {
        self.store.get_student_level(student_id, scope).await
    }

    /// All achievement progress rows for a student, locked and unlocked
    pub async fn student_achievements(&self, student_id: &str) -> Result<Vec<AchievementProgress>> {
        self.store.get_student_achievements(student_id).await
    }

    /// Recent awards, newest first, for the points history widget
    pub async fn recent_events(&self, student_id: &str, limit: i64) -> Result<Vec<PointEvent>> {
        self.store.recent_events(student_id, limit).await
    }

    /// Latest snapshot for an entity and period, with rank deltas baked in.
    ///
    /// None when no snapshot has been generated yet; callers show an empty
    /// board, never an error.
    pub async fn leaderboard(
        &self,
        entity: &Scope,
        period_type: PeriodType,
    ) -> Result<Option<LeaderboardSnapshot>> {
        self.store.latest_snapshot(entity, period_type).await
    }

    /// Outbox records awaiting the notification subsystem
    pub async fn pending_notifications(&self, limit: i64) -> Result<Vec<OutboxRecord>> {
        self.store.pending_outbox(limit).await
    }

    /// Acknowledge dispatched notifications
    pub async fn mark_notified(&self, ids: &[i64]) -> Result<u64> {
        self.store.mark_outbox_dispatched(ids).await
    }
}
