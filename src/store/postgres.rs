use crate::domain::{
    AchievementProgress, AggregateKey, InsertOutcome, JobState, LeaderboardEntry,
    LeaderboardSnapshot, NewPointEvent, PeriodType, PointEvent, PointSource, PointsAggregate,
    RewardJob, Scope, ScopeIds, ScopeKind, StandingRow, StudentLevel, TermCalendar,
};
use crate::error::{Result, RewardsError};
use crate::outbox::{NewOutboxRecord, OutboxKind, OutboxRecord};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter.
///
/// Owns every piece of SQL in the crate. The worker pipeline drives the
/// `_tx` helpers inside a single transaction per unit; everything else is
/// a standalone statement.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn scope_column(kind: ScopeKind) -> &'static str {
    match kind {
        ScopeKind::Class => "class_id",
        ScopeKind::Subject => "subject_id",
        ScopeKind::Course => "course_id",
        ScopeKind::Campus => "campus_id",
    }
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Cheap connectivity probe for the health monitor
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Job queue ====================

    /// Enqueue jobs for completions that have no non-corrective point event
    /// and no job row yet. Returns the number of jobs created.
    #[instrument(skip(self))]
    pub async fn discover_jobs(&self, batch: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO reward_jobs (
                student_id, source, source_id, activity_type, difficulty,
                override_amount, class_id, subject_id, course_id, campus_id,
                completed_at, state, attempts, next_attempt_at
            )
            SELECT c.student_id, c.source, c.source_id, c.activity_type, c.difficulty,
                   c.override_amount, c.class_id, c.subject_id, c.course_id, c.campus_id,
                   c.completed_at, 'PENDING', 0, NOW()
            FROM activity_completions c
            WHERE NOT EXISTS (
                    SELECT 1 FROM point_events e
                    WHERE e.student_id = c.student_id
                      AND e.source = c.source
                      AND e.source_id = c.source_id
                      AND NOT e.corrective
                )
              AND NOT EXISTS (
                    SELECT 1 FROM reward_jobs j
                    WHERE j.student_id = c.student_id
                      AND j.source = c.source
                      AND j.source_id = c.source_id
                )
            ORDER BY c.completed_at ASC
            LIMIT $1
            ON CONFLICT (student_id, source, source_id) DO NOTHING
            "#,
        )
        .bind(batch)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim up to `batch` due jobs, moving them to PROCESSING.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent workers from claiming the
    /// same unit.
    pub async fn claim_jobs(&self, batch: i64) -> Result<Vec<RewardJob>> {
        let rows = sqlx::query(
            r#"
            UPDATE reward_jobs j SET state = 'PROCESSING', updated_at = NOW()
            WHERE j.id IN (
                SELECT id FROM reward_jobs
                WHERE state IN ('PENDING', 'FAILED') AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING j.id, j.student_id, j.source, j.source_id, j.activity_type,
                      j.difficulty, j.override_amount, j.class_id, j.subject_id,
                      j.course_id, j.campus_id, j.completed_at, j.state, j.attempts,
                      j.next_attempt_at, j.last_error
            "#,
        )
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// PROCESSING -> DONE
    pub async fn mark_job_done(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET state = 'DONE', last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'PROCESSING'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        ensure_transitioned(result.rows_affected(), job_id, JobState::Done)
    }

    /// PROCESSING -> FAILED with backoff bookkeeping
    pub async fn mark_job_failed(
        &self,
        job_id: i64,
        attempts: i32,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET state = 'FAILED', attempts = $2, last_error = $3,
                next_attempt_at = $4, updated_at = NOW()
            WHERE id = $1 AND state = 'PROCESSING'
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;

        ensure_transitioned(result.rows_affected(), job_id, JobState::Failed)
    }

    /// PROCESSING -> DEAD
    pub async fn mark_job_dead(&self, job_id: i64, attempts: i32, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET state = 'DEAD', attempts = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1 AND state = 'PROCESSING'
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(error)
        .execute(&self.pool)
        .await?;

        ensure_transitioned(result.rows_affected(), job_id, JobState::Dead)
    }

    /// DEAD -> PENDING, attempts reset (the manual requeue operation)
    pub async fn requeue_dead_job(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reward_jobs
            SET state = 'PENDING', attempts = 0, last_error = NULL,
                next_attempt_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND state = 'DEAD'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        ensure_transitioned(result.rows_affected(), job_id, JobState::Pending)
    }

    /// Units parked for manual inspection
    pub async fn dead_jobs(&self, limit: i64) -> Result<Vec<RewardJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_id, source, source_id, activity_type, difficulty,
                   override_amount, class_id, subject_id, course_id, campus_id,
                   completed_at, state, attempts, next_attempt_at, last_error
            FROM reward_jobs
            WHERE state = 'DEAD'
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    // ==================== Event log (transactional) ====================

    /// Conditionally append a point event.
    ///
    /// The partial unique index on (student_id, source, source_id) for
    /// non-corrective events makes this the exactly-once guard: a conflict
    /// means another run already awarded this completion.
    pub async fn insert_event_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &NewPointEvent,
    ) -> Result<InsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO point_events (
                student_id, amount, source, source_id, class_id, subject_id,
                course_id, campus_id, corrective, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (student_id, source, source_id) WHERE NOT corrective DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.student_id)
        .bind(event.amount)
        .bind(event.source.as_str())
        .bind(&event.source_id)
        .bind(&event.scopes.class_id)
        .bind(&event.scopes.subject_id)
        .bind(&event.scopes.course_id)
        .bind(&event.scopes.campus_id)
        .bind(event.corrective)
        .bind(event.created_at)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(row.get("id"))),
            None => {
                debug!(
                    student_id = %event.student_id,
                    source_id = %event.source_id,
                    "point event already exists, conditional insert skipped"
                );
                Ok(InsertOutcome::Duplicate)
            }
        }
    }

    /// Atomically increment one aggregate row, creating it on first touch.
    /// Returns the new total.
    pub async fn increment_aggregate_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: &AggregateKey,
        amount: i64,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO points_aggregates (
                student_id, scope_kind, scope_id, period_type, period_key, total, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (student_id, scope_kind, scope_id, period_type, period_key)
            DO UPDATE SET total = points_aggregates.total + EXCLUDED.total, updated_at = NOW()
            RETURNING total
            "#,
        )
        .bind(&key.student_id)
        .bind(key.scope.kind.as_str())
        .bind(&key.scope.id)
        .bind(key.period_type.as_str())
        .bind(&key.period_key)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("total"))
    }

    /// Current level row for a scope, if any
    pub async fn get_level_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        student_id: &str,
        scope: &Scope,
    ) -> Result<Option<i32>> {
        let row = sqlx::query(
            r#"
            SELECT level FROM student_levels
            WHERE student_id = $1 AND scope_kind = $2 AND scope_id = $3
            "#,
        )
        .bind(student_id)
        .bind(scope.kind.as_str())
        .bind(&scope.id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|r| r.get("level")))
    }

    /// Overwrite a scope's level row with a fresh derivation
    pub async fn upsert_level_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        level: &StudentLevel,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_levels (
                student_id, scope_kind, scope_id, level, current_experience,
                experience_for_next_level, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (student_id, scope_kind, scope_id)
            DO UPDATE SET level = EXCLUDED.level,
                          current_experience = EXCLUDED.current_experience,
                          experience_for_next_level = EXCLUDED.experience_for_next_level,
                          updated_at = NOW()
            "#,
        )
        .bind(&level.student_id)
        .bind(level.scope.kind.as_str())
        .bind(&level.scope.id)
        .bind(level.level)
        .bind(level.current_experience)
        .bind(level.experience_for_next_level)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// All achievement progress rows for a student
    pub async fn progress_rows_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        student_id: &str,
    ) -> Result<Vec<AchievementProgress>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, achievement_id, scope_kind, scope_id, progress,
                   target, unlocked, unlocked_at
            FROM achievement_progress
            WHERE student_id = $1
            "#,
        )
        .bind(student_id)
        .fetch_all(&mut **tx)
        .await?;

        rows.iter().map(progress_from_row).collect()
    }

    /// Persist one evaluated progress row.
    ///
    /// GREATEST and OR in the update arm enforce the row invariants even
    /// against a stale write: progress never decreases, unlocked never
    /// reverts.
    pub async fn upsert_progress_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        progress: &AchievementProgress,
    ) -> Result<()> {
        let (scope_kind, scope_id) = match &progress.scope {
            Some(scope) => (scope.kind.as_str(), scope.id.as_str()),
            None => ("", ""),
        };

        sqlx::query(
            r#"
            INSERT INTO achievement_progress (
                student_id, achievement_id, scope_kind, scope_id, progress,
                target, unlocked, unlocked_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (student_id, achievement_id, scope_kind, scope_id)
            DO UPDATE SET progress = GREATEST(achievement_progress.progress, EXCLUDED.progress),
                          unlocked = achievement_progress.unlocked OR EXCLUDED.unlocked,
                          unlocked_at = COALESCE(achievement_progress.unlocked_at, EXCLUDED.unlocked_at),
                          updated_at = NOW()
            "#,
        )
        .bind(&progress.student_id)
        .bind(&progress.achievement_id)
        .bind(scope_kind)
        .bind(scope_id)
        .bind(progress.progress)
        .bind(progress.target)
        .bind(progress.unlocked)
        .bind(progress.unlocked_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Append an outbox record inside the unit transaction
    pub async fn insert_outbox_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &NewOutboxRecord,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO reward_outbox (kind, payload)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.payload)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }

    /// Most recent awards for a student, newest first
    pub async fn recent_events(&self, student_id: &str, limit: i64) -> Result<Vec<PointEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_id, amount, source, source_id, class_id, subject_id,
                   course_id, campus_id, corrective, created_at
            FROM point_events
            WHERE student_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(student_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let source: String = row.get("source");
                Ok(PointEvent {
                    id: row.get("id"),
                    student_id: row.get("student_id"),
                    amount: row.get("amount"),
                    source: PointSource::try_from(source.as_str())?,
                    source_id: row.get("source_id"),
                    scopes: ScopeIds {
                        class_id: row.get("class_id"),
                        subject_id: row.get("subject_id"),
                        course_id: row.get("course_id"),
                        campus_id: row.get("campus_id"),
                    },
                    corrective: row.get("corrective"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    // ==================== Aggregates (reads) ====================

    /// Totals for a student and scope across a set of period buckets
    pub async fn period_totals(
        &self,
        student_id: &str,
        scope: &Scope,
        keys: &[(PeriodType, String)],
    ) -> Result<Vec<(PeriodType, i64)>> {
        let mut totals = Vec::with_capacity(keys.len());

        for (period_type, period_key) in keys {
            let row = sqlx::query(
                r#"
                SELECT total FROM points_aggregates
                WHERE student_id = $1 AND scope_kind = $2 AND scope_id = $3
                  AND period_type = $4 AND period_key = $5
                "#,
            )
            .bind(student_id)
            .bind(scope.kind.as_str())
            .bind(&scope.id)
            .bind(period_type.as_str())
            .bind(period_key)
            .fetch_optional(&self.pool)
            .await?;

            totals.push((*period_type, row.map(|r| r.get("total")).unwrap_or(0)));
        }

        Ok(totals)
    }

    /// Scopes that have at least one aggregate row for a period bucket
    pub async fn scopes_with_aggregates(
        &self,
        period_type: PeriodType,
        period_key: &str,
    ) -> Result<Vec<Scope>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT scope_kind, scope_id FROM points_aggregates
            WHERE period_type = $1 AND period_key = $2
            "#,
        )
        .bind(period_type.as_str())
        .bind(period_key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("scope_kind");
                Ok(Scope::new(
                    ScopeKind::try_from(kind.as_str())?,
                    row.get::<String, _>("scope_id"),
                ))
            })
            .collect()
    }

    /// Ranking input for one scope and period bucket: each student's total
    /// joined with their most recent unlock timestamp
    pub async fn standings(
        &self,
        scope: &Scope,
        period_type: PeriodType,
        period_key: &str,
    ) -> Result<Vec<StandingRow>> {
        let rows = sqlx::query(
            r#"
            SELECT a.student_id, a.total, u.last_unlock_at
            FROM points_aggregates a
            LEFT JOIN (
                SELECT student_id, MAX(unlocked_at) AS last_unlock_at
                FROM achievement_progress
                WHERE unlocked
                GROUP BY student_id
            ) u ON u.student_id = a.student_id
            WHERE a.scope_kind = $1 AND a.scope_id = $2
              AND a.period_type = $3 AND a.period_key = $4
            "#,
        )
        .bind(scope.kind.as_str())
        .bind(&scope.id)
        .bind(period_type.as_str())
        .bind(period_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StandingRow {
                student_id: row.get("student_id"),
                total: row.get("total"),
                last_unlock_at: row.get("last_unlock_at"),
            })
            .collect())
    }

    // ==================== Levels / achievements (reads) ====================

    pub async fn get_student_level(
        &self,
        student_id: &str,
        scope: &Scope,
    ) -> Result<Option<StudentLevel>> {
        let row = sqlx::query(
            r#"
            SELECT student_id, scope_kind, scope_id, level, current_experience,
                   experience_for_next_level, updated_at
            FROM student_levels
            WHERE student_id = $1 AND scope_kind = $2 AND scope_id = $3
            "#,
        )
        .bind(student_id)
        .bind(scope.kind.as_str())
        .bind(&scope.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let kind: String = r.get("scope_kind");
            Ok(StudentLevel {
                student_id: r.get("student_id"),
                scope: Scope::new(ScopeKind::try_from(kind.as_str())?, r.get::<String, _>("scope_id")),
                level: r.get("level"),
                current_experience: r.get("current_experience"),
                experience_for_next_level: r.get("experience_for_next_level"),
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    pub async fn get_student_achievements(
        &self,
        student_id: &str,
    ) -> Result<Vec<AchievementProgress>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, achievement_id, scope_kind, scope_id, progress,
                   target, unlocked, unlocked_at
            FROM achievement_progress
            WHERE student_id = $1
            ORDER BY achievement_id ASC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(progress_from_row).collect()
    }

    // ==================== Leaderboard snapshots ====================

    /// Latest snapshot for an entity and period type, across period keys
    pub async fn latest_snapshot(
        &self,
        entity: &Scope,
        period_type: PeriodType,
    ) -> Result<Option<LeaderboardSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT id, entity_kind, entity_id, period_type, period_key, generated_at, entries
            FROM leaderboard_snapshots
            WHERE entity_kind = $1 AND entity_id = $2 AND period_type = $3
            ORDER BY generated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(entity.kind.as_str())
        .bind(&entity.id)
        .bind(period_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    /// Append a freshly generated snapshot. Snapshots are write-once;
    /// regeneration always inserts a new row.
    #[instrument(skip(self, entries))]
    pub async fn insert_snapshot(
        &self,
        entity: &Scope,
        period_type: PeriodType,
        period_key: &str,
        entries: &[LeaderboardEntry],
    ) -> Result<LeaderboardSnapshot> {
        let payload = serde_json::to_value(entries)?;

        let row = sqlx::query(
            r#"
            INSERT INTO leaderboard_snapshots (entity_kind, entity_id, period_type, period_key, entries)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, generated_at
            "#,
        )
        .bind(entity.kind.as_str())
        .bind(&entity.id)
        .bind(period_type.as_str())
        .bind(period_key)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(LeaderboardSnapshot {
            id: row.get("id"),
            entity: entity.clone(),
            period_type,
            period_key: period_key.to_string(),
            generated_at: row.get("generated_at"),
            entries: entries.to_vec(),
        })
    }

    // ==================== Outbox ====================

    /// Records not yet picked up by the notification subsystem
    pub async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, created_at, dispatched_at
            FROM reward_outbox
            WHERE dispatched_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("kind");
                Ok(OutboxRecord {
                    id: row.get("id"),
                    kind: OutboxKind::try_from(kind.as_str())?,
                    payload: row.get("payload"),
                    created_at: row.get("created_at"),
                    dispatched_at: row.get("dispatched_at"),
                })
            })
            .collect()
    }

    pub async fn mark_outbox_dispatched(&self, ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reward_outbox SET dispatched_at = NOW()
            WHERE id = ANY($1) AND dispatched_at IS NULL
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== Repair ====================

    /// Fully recompute one aggregate row from the event log.
    ///
    /// The only sanctioned full recomputation, used to correct drift after
    /// a bulk corrective import. Returns the old total and the repaired row.
    #[instrument(skip(self, terms))]
    pub async fn repair_aggregate(
        &self,
        key: &AggregateKey,
        terms: &TermCalendar,
    ) -> Result<(i64, PointsAggregate)> {
        let column = scope_column(key.scope.kind);
        let query = format!(
            r#"
            SELECT id, student_id, amount, source, source_id, class_id, subject_id,
                   course_id, campus_id, corrective, created_at
            FROM point_events
            WHERE student_id = $1 AND {column} = $2
            ORDER BY id ASC
            "#
        );

        let rows = sqlx::query(&query)
            .bind(&key.student_id)
            .bind(&key.scope.id)
            .fetch_all(&self.pool)
            .await?;

        // Filter with the same predicate the fan-out uses, so repair and
        // the hot path can never disagree about bucket membership
        let mut recomputed = 0i64;
        for row in &rows {
            let event = event_from_row(row)?;
            if crate::engine::event_matches_key(&event, key, terms) {
                recomputed += event.amount;
            }
        }

        let mut tx = self.pool.begin().await?;

        let old_total: i64 = sqlx::query(
            r#"
            SELECT total FROM points_aggregates
            WHERE student_id = $1 AND scope_kind = $2 AND scope_id = $3
              AND period_type = $4 AND period_key = $5
            FOR UPDATE
            "#,
        )
        .bind(&key.student_id)
        .bind(key.scope.kind.as_str())
        .bind(&key.scope.id)
        .bind(key.period_type.as_str())
        .bind(&key.period_key)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| r.get("total"))
        .unwrap_or(0);

        let row = sqlx::query(
            r#"
            INSERT INTO points_aggregates (
                student_id, scope_kind, scope_id, period_type, period_key, total, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (student_id, scope_kind, scope_id, period_type, period_key)
            DO UPDATE SET total = EXCLUDED.total, updated_at = NOW()
            RETURNING updated_at
            "#,
        )
        .bind(&key.student_id)
        .bind(key.scope.kind.as_str())
        .bind(&key.scope.id)
        .bind(key.period_type.as_str())
        .bind(&key.period_key)
        .bind(recomputed)
        .fetch_one(&mut *tx)
        .await?;

        let repaired = PointsAggregate {
            key: key.clone(),
            total: recomputed,
            updated_at: row.get("updated_at"),
        };

        tx.commit().await?;

        info!(key = %key, old = old_total, new = repaired.total, "aggregate repaired");

        Ok((old_total, repaired))
    }
}

// ==================== Row mapping ====================

fn job_from_row(row: &PgRow) -> Result<RewardJob> {
    let source: String = row.get("source");
    let state: String = row.get("state");

    Ok(RewardJob {
        id: row.get("id"),
        student_id: row.get("student_id"),
        source: PointSource::try_from(source.as_str())?,
        source_id: row.get("source_id"),
        activity_type: row.get("activity_type"),
        difficulty: row.get("difficulty"),
        override_amount: row.get("override_amount"),
        scopes: ScopeIds {
            class_id: row.get("class_id"),
            subject_id: row.get("subject_id"),
            course_id: row.get("course_id"),
            campus_id: row.get("campus_id"),
        },
        completed_at: row.get("completed_at"),
        state: JobState::try_from(state.as_str())?,
        attempts: row.get("attempts"),
        next_attempt_at: row.get("next_attempt_at"),
        last_error: row.get("last_error"),
    })
}

fn progress_from_row(row: &PgRow) -> Result<AchievementProgress> {
    let scope_kind: String = row.get("scope_kind");
    let scope_id: String = row.get("scope_id");
    let scope = if scope_kind.is_empty() {
        None
    } else {
        Some(Scope::new(
            ScopeKind::try_from(scope_kind.as_str())?,
            scope_id,
        ))
    };

    Ok(AchievementProgress {
        student_id: row.get("student_id"),
        achievement_id: row.get("achievement_id"),
        scope,
        progress: row.get("progress"),
        target: row.get("target"),
        unlocked: row.get("unlocked"),
        unlocked_at: row.get("unlocked_at"),
    })
}

fn event_from_row(row: &PgRow) -> Result<NewPointEvent> {
    let source: String = row.get("source");

    Ok(NewPointEvent {
        student_id: row.get("student_id"),
        amount: row.get("amount"),
        source: PointSource::try_from(source.as_str())?,
        source_id: row.get("source_id"),
        scopes: ScopeIds {
            class_id: row.get("class_id"),
            subject_id: row.get("subject_id"),
            course_id: row.get("course_id"),
            campus_id: row.get("campus_id"),
        },
        corrective: row.get("corrective"),
        created_at: row.get("created_at"),
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<LeaderboardSnapshot> {
    let kind: String = row.get("entity_kind");
    let period: String = row.get("period_type");
    let entries: serde_json::Value = row.get("entries");

    Ok(LeaderboardSnapshot {
        id: row.get("id"),
        entity: Scope::new(
            ScopeKind::try_from(kind.as_str())?,
            row.get::<String, _>("entity_id"),
        ),
        period_type: PeriodType::try_from(period.as_str())?,
        period_key: row.get("period_key"),
        generated_at: row.get("generated_at"),
        entries: serde_json::from_value(entries)?,
    })
}

fn ensure_transitioned(rows_affected: u64, job_id: i64, target: JobState) -> Result<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(RewardsError::InvalidStateTransition {
            from: format!("job {job_id} (not in the expected source state)"),
            to: target.to_string(),
        })
    }
}
