//! The award pipeline: Points -> Event Log -> Aggregation -> Level ->
//! Achievements, as one transaction per unit.
//!
//! Failure at any step rolls back the whole unit; a partial fan-out would
//! corrupt the aggregate invariants. A lost conditional insert means an
//! earlier run committed everything already, so it short-circuits as
//! success.

use super::postgres::PostgresStore;
use crate::domain::{
    InsertOutcome, NewPointEvent, PointSource, RewardJob, Scope, StudentLevel,
};
use crate::engine::{fan_out, Engines};
use crate::error::Result;
use crate::outbox::{LevelUpPayload, NewOutboxRecord, PointsAwardedPayload};
use crate::worker::{CompletionPipeline, ProcessOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Production pipeline over the PostgreSQL store
pub struct RewardPipeline {
    store: PostgresStore,
    engines: Engines,
}

impl RewardPipeline {
    pub fn new(store: PostgresStore, engines: Engines) -> Self {
        Self { store, engines }
    }

    pub fn store(&self) -> &PostgresStore {
        &self.store
    }
}

#[async_trait::async_trait]
impl CompletionPipeline for RewardPipeline {
    async fn discover(&self, batch: i64) -> Result<u64> {
        self.store.discover_jobs(batch).await
    }

    async fn claim(&self, batch: i64) -> Result<Vec<RewardJob>> {
        self.store.claim_jobs(batch).await
    }

    #[instrument(skip(self, job), fields(job_id = job.id, student_id = %job.student_id))]
    async fn process(&self, job: &RewardJob) -> Result<ProcessOutcome> {
        let now = Utc::now();

        // Manual adjustments bypass the points engine and carry their own
        // signed amount; they are corrective by nature and exempt from the
        // one-event-per-completion guarantee
        let corrective = job.source == PointSource::ManualAdjustment;
        let amount = match job.override_amount {
            Some(amount) if corrective => amount,
            _ => self.engines.points.compute(&job.completion()),
        };

        // Events are bucketed by completion time, so late processing never
        // shifts a completion into the wrong day
        let event = NewPointEvent {
            student_id: job.student_id.clone(),
            amount,
            source: job.source,
            source_id: job.source_id.clone(),
            scopes: job.scopes.clone(),
            corrective,
            created_at: job.completed_at,
        };

        let mut tx = self.store.pool().begin().await?;

        let event_id = match self.store.insert_event_tx(&mut tx, &event).await? {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Duplicate => {
                // Another run committed the full pipeline for this unit
                tx.rollback().await?;
                return Ok(ProcessOutcome::AlreadyProcessed);
            }
        };

        // Scope and period fan-out, every increment atomic
        let mut all_time_totals: HashMap<Scope, i64> = HashMap::new();
        for delta in fan_out(&event, &self.engines.terms) {
            let total = self
                .store
                .increment_aggregate_tx(&mut tx, &delta.key, delta.amount)
                .await?;
            if delta.key.period_type == crate::domain::PeriodType::AllTime {
                all_time_totals.insert(delta.key.scope.clone(), total);
            }
        }

        // Re-derive each scope's level from its new ALL_TIME total
        for (scope, total) in &all_time_totals {
            let prior = self
                .store
                .get_level_tx(&mut tx, &job.student_id, scope)
                .await?;
            let info = self.engines.curve.derive(*total);

            self.store
                .upsert_level_tx(
                    &mut tx,
                    &StudentLevel {
                        student_id: job.student_id.clone(),
                        scope: scope.clone(),
                        level: info.level,
                        current_experience: info.current_experience,
                        experience_for_next_level: info.experience_for_next_level,
                        updated_at: now,
                    },
                )
                .await?;

            if prior.is_some_and(|p| info.level > p) {
                self.store
                    .insert_outbox_tx(
                        &mut tx,
                        &NewOutboxRecord::level_up(&LevelUpPayload {
                            student_id: job.student_id.clone(),
                            scope: scope.clone(),
                            level: info.level,
                        })?,
                    )
                    .await?;
            }
        }

        // Achievement evaluation; idempotent because we only reach here
        // after winning the conditional insert
        let existing = self.store.progress_rows_tx(&mut tx, &job.student_id).await?;
        let evaluation = self
            .engines
            .catalog
            .evaluate(job, &all_time_totals, &existing, now);

        for progress in &evaluation.updated {
            self.store.upsert_progress_tx(&mut tx, progress).await?;
        }
        for unlock in &evaluation.unlocks {
            self.store
                .insert_outbox_tx(&mut tx, &NewOutboxRecord::achievement_unlocked(unlock)?)
                .await?;
        }

        self.store
            .insert_outbox_tx(
                &mut tx,
                &NewOutboxRecord::points_awarded(&PointsAwardedPayload {
                    student_id: job.student_id.clone(),
                    amount,
                    event_id,
                    source_id: job.source_id.clone(),
                })?,
            )
            .await?;

        tx.commit().await?;

        debug!(
            event_id,
            amount,
            unlocks = evaluation.unlocks.len(),
            "unit pipeline committed"
        );

        Ok(ProcessOutcome::Awarded {
            event_id,
            amount,
            unlocks: evaluation.unlocks.len(),
        })
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        self.store.mark_job_done(job_id).await
    }

    async fn fail(
        &self,
        job_id: i64,
        attempts: i32,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .mark_job_failed(job_id, attempts, error, retry_at)
            .await
    }

    async fn bury(&self, job_id: i64, attempts: i32, error: &str) -> Result<()> {
        self.store.mark_job_dead(job_id, attempts, error).await
    }
}
