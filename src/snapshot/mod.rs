//! Leaderboard Snapshot Engine.
//!
//! Materializes ranked views from committed aggregate state on its own
//! schedule, one independent task per granularity. It never blocks and is
//! never blocked by the job worker; a failed or timed-out cycle skips to
//! the next tick. Stale snapshots are acceptable, corrupt ones are not.

use crate::config::SnapshotSettings;
use crate::domain::{LeaderboardSnapshot, PeriodType, Scope, TermCalendar};
use crate::engine::rank_standings;
use crate::error::Result;
use crate::store::PostgresStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Generates snapshots for one scope and period at a time
pub struct SnapshotEngine {
    store: PostgresStore,
    terms: TermCalendar,
    /// Last successful cycle per granularity, surfaced through /health
    last_generated: Arc<RwLock<HashMap<PeriodType, DateTime<Utc>>>>,
}

impl SnapshotEngine {
    pub fn new(store: PostgresStore, terms: TermCalendar) -> Self {
        Self {
            store,
            terms,
            last_generated: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate one snapshot for an entity and period type.
    ///
    /// Reads only committed aggregate state. The previous snapshot for the
    /// same key supplies `previous_rank`; absence of one means every entry
    /// is a new entrant.
    pub async fn generate(
        &self,
        entity: &Scope,
        period_type: PeriodType,
    ) -> Result<LeaderboardSnapshot> {
        let period_key = period_type.key_for(Utc::now(), &self.terms);

        let standings = self.store.standings(entity, period_type, &period_key).await?;
        let previous = self.store.latest_snapshot(entity, period_type).await?;

        let entries = rank_standings(
            standings,
            previous.as_ref().map(|s| s.entries.as_slice()),
        );

        let snapshot = self
            .store
            .insert_snapshot(entity, period_type, &period_key, &entries)
            .await?;

        debug!(
            entity = %entity,
            period = %period_type,
            entries = snapshot.entries.len(),
            "snapshot generated"
        );

        Ok(snapshot)
    }

    /// One scheduled cycle: snapshot every scope that has aggregate rows
    /// in the current period bucket. Per-scope failures are logged and
    /// skipped; they never abort the rest of the cycle.
    pub async fn run_cycle(&self, period_type: PeriodType) -> Result<u64> {
        let period_key = period_type.key_for(Utc::now(), &self.terms);
        let scopes = self
            .store
            .scopes_with_aggregates(period_type, &period_key)
            .await?;

        let mut generated = 0u64;
        for scope in scopes {
            match self.generate(&scope, period_type).await {
                Ok(_) => generated += 1,
                Err(e) => warn!(
                    scope = %scope,
                    period = %period_type,
                    "snapshot generation failed for scope: {e}"
                ),
            }
        }

        self.last_generated
            .write()
            .await
            .insert(period_type, Utc::now());

        Ok(generated)
    }

    /// Last successful cycle per granularity
    pub async fn last_generated(&self) -> HashMap<PeriodType, DateTime<Utc>> {
        self.last_generated.read().await.clone()
    }
}

/// Spawns one interval task per granularity.
///
/// Each task is independently configurable and independently
/// failure-isolated; a wedged DAY cycle cannot stall the WEEK one.
pub struct SnapshotScheduler {
    engine: Arc<SnapshotEngine>,
    settings: SnapshotSettings,
}

impl SnapshotScheduler {
    pub fn new(engine: Arc<SnapshotEngine>, settings: SnapshotSettings) -> Self {
        Self { engine, settings }
    }

    fn interval_for(&self, period_type: PeriodType) -> Duration {
        let secs = match period_type {
            PeriodType::Day => self.settings.day_interval_secs,
            PeriodType::Week => self.settings.week_interval_secs,
            PeriodType::Month => self.settings.month_interval_secs,
            PeriodType::Term => self.settings.term_interval_secs,
            PeriodType::AllTime => self.settings.all_time_interval_secs,
        };
        Duration::from_secs(secs)
    }

    /// Start all granularity tasks. They run until shutdown is signalled.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let cycle_timeout = Duration::from_secs(self.settings.cycle_timeout_secs);

        PeriodType::all()
            .into_iter()
            .map(|period_type| {
                let engine = self.engine.clone();
                let mut shutdown = shutdown.clone();
                let interval = self.interval_for(period_type);

                tokio::spawn(async move {
                    info!(
                        period = %period_type,
                        interval_secs = interval.as_secs(),
                        "snapshot task started"
                    );

                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(interval) => {}
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                        }

                        match tokio::time::timeout(cycle_timeout, engine.run_cycle(period_type))
                            .await
                        {
                            Ok(Ok(generated)) => {
                                if generated > 0 {
                                    info!(
                                        period = %period_type,
                                        generated,
                                        "snapshot cycle complete"
                                    );
                                }
                            }
                            Ok(Err(e)) => {
                                warn!(period = %period_type, "snapshot cycle failed: {e}")
                            }
                            // A timed-out generation skips this cycle; the
                            // next tick retries with fresh state
                            Err(_) => warn!(
                                period = %period_type,
                                timeout_secs = cycle_timeout.as_secs(),
                                "snapshot cycle timed out, skipping"
                            ),
                        }
                    }

                    info!(period = %period_type, "snapshot task stopped");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn scheduler(settings: SnapshotSettings) -> SnapshotScheduler {
        // connect_lazy never touches the network
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/rewards_test")
            .expect("lazy pool");
        let engine = Arc::new(SnapshotEngine::new(
            PostgresStore::from_pool(pool),
            TermCalendar::default(),
        ));
        SnapshotScheduler::new(engine, settings)
    }

    #[tokio::test]
    async fn test_interval_per_granularity() {
        let scheduler = scheduler(SnapshotSettings {
            day_interval_secs: 100,
            week_interval_secs: 200,
            month_interval_secs: 300,
            term_interval_secs: 400,
            all_time_interval_secs: 500,
            cycle_timeout_secs: 10,
        });

        assert_eq!(
            scheduler.interval_for(PeriodType::Day),
            Duration::from_secs(100)
        );
        assert_eq!(
            scheduler.interval_for(PeriodType::Week),
            Duration::from_secs(200)
        );
        assert_eq!(
            scheduler.interval_for(PeriodType::AllTime),
            Duration::from_secs(500)
        );
    }

    #[tokio::test]
    async fn test_tasks_stop_on_shutdown() {
        let scheduler = scheduler(SnapshotSettings::default());
        let (tx, rx) = watch::channel(false);

        let handles = scheduler.spawn(rx);
        assert_eq!(handles.len(), 5);

        tx.send(true).expect("receivers alive");
        for handle in handles {
            handle.await.expect("task joins cleanly");
        }
    }
}
