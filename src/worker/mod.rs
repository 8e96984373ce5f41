//! Job Worker: the scheduling and concurrency backbone.
//!
//! Polls for unprocessed completions, runs each through the award pipeline
//! with a bounded pool of unit processors, and retries failures with
//! exponential backoff until they succeed or go DEAD.

use crate::config::WorkerSettings;
use crate::domain::RewardJob;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// Outcome of running one unit through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The pipeline committed: event, aggregates, level, achievements
    Awarded {
        event_id: i64,
        amount: i64,
        unlocks: usize,
    },
    /// Another run already awarded this completion; success, not an error
    AlreadyProcessed,
}

/// The award pipeline seam the worker drives.
///
/// `PostgresStore` backs the production implementation, with the whole of
/// `process` as one transaction. Tests substitute an in-memory one.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CompletionPipeline: Send + Sync {
    /// Enqueue jobs for completions with no matching point event yet
    async fn discover(&self, batch: i64) -> Result<u64>;

    /// Claim up to `batch` due jobs, transitioning them to PROCESSING
    async fn claim(&self, batch: i64) -> Result<Vec<RewardJob>>;

    /// Run the award pipeline for one unit, atomically
    async fn process(&self, job: &RewardJob) -> Result<ProcessOutcome>;

    /// PROCESSING -> DONE
    async fn complete(&self, job_id: i64) -> Result<()>;

    /// PROCESSING -> FAILED, due again at `retry_at`
    async fn fail(
        &self,
        job_id: i64,
        attempts: i32,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// PROCESSING -> DEAD, excluded from polling until manually requeued
    async fn bury(&self, job_id: i64, attempts: i32, error: &str) -> Result<()>;
}

/// Configuration for the job worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between poll cycles (default: 5s)
    pub poll_interval_secs: u64,
    /// Maximum units discovered and claimed per cycle (default: 50)
    pub batch_size: i64,
    /// Concurrent unit processors (default: 8)
    pub concurrency: usize,
    /// Attempts before a unit goes DEAD (default: 5)
    pub max_attempts: i32,
    /// Base delay for exponential backoff (default: 2s)
    pub base_backoff_secs: u64,
    /// Maximum backoff delay (default: 3600s / 1 hour)
    pub max_backoff_secs: u64,
    /// Per-unit pipeline timeout (default: 30s)
    pub unit_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 50,
            concurrency: 8,
            max_attempts: 5,
            base_backoff_secs: 2,
            max_backoff_secs: 3600,
            unit_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            poll_interval_secs: settings.poll_interval_secs,
            batch_size: settings.batch_size,
            concurrency: settings.concurrency,
            max_attempts: settings.max_attempts,
            base_backoff_secs: settings.base_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            unit_timeout_secs: settings.unit_timeout_secs,
        }
    }

    fn backoff_duration(&self, attempts: u32) -> Duration {
        let delay = self
            .base_backoff_secs
            .saturating_mul(2u64.saturating_pow(attempts));
        let capped = delay.min(self.max_backoff_secs);
        Duration::from_secs(capped)
    }
}

/// Worker statistics, surfaced through the health endpoint
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub cycles: u64,
    pub discovered: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub buried: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub discovered: u64,
    pub processed: u64,
    pub succeeded: u64,
}

/// The polling job worker
pub struct JobWorker<P: CompletionPipeline> {
    config: WorkerConfig,
    pipeline: Arc<P>,
    stats: Arc<RwLock<WorkerStats>>,
}

impl<P: CompletionPipeline + 'static> JobWorker<P> {
    pub fn new(config: WorkerConfig, pipeline: Arc<P>) -> Self {
        Self {
            config,
            pipeline,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
        }
    }

    /// Get current statistics
    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Run the poll loop until shutdown is signalled.
    ///
    /// Each cycle fully drains its in-flight units before the next poll, so
    /// exiting after the current cycle is a clean drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Job worker started (interval: {}s, batch: {}, concurrency: {})",
            self.config.poll_interval_secs, self.config.batch_size, self.config.concurrency
        );

        loop {
            // Jitter the wait so multiple workers do not poll in lockstep
            let jitter_ms = rand::thread_rng().gen_range(0..=250u64);
            let wait = Duration::from_secs(self.config.poll_interval_secs)
                + Duration::from_millis(jitter_ms);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            match self.process_cycle().await {
                Ok(summary) if summary.processed > 0 => {
                    info!(
                        "Poll cycle complete: {}/{} succeeded ({} discovered)",
                        summary.succeeded, summary.processed, summary.discovered
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Poll cycle failed: {}", e);
                    let mut stats = self.stats.write().await;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        info!("Job worker stopped");
    }

    /// Run a single poll cycle: discover, claim, process all claimed units.
    ///
    /// Units run concurrently under the semaphore; the cycle returns only
    /// once every claimed unit reached DONE, FAILED or DEAD.
    pub async fn process_cycle(&self) -> Result<CycleSummary> {
        let discovered = self.pipeline.discover(self.config.batch_size).await?;
        if discovered > 0 {
            debug!("Discovered {} new completion(s)", discovered);
        }

        let jobs = self.pipeline.claim(self.config.batch_size).await?;
        let mut summary = CycleSummary {
            discovered,
            ..Default::default()
        };

        if !jobs.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
            let mut handles = Vec::with_capacity(jobs.len());

            for job in jobs {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                let pipeline = self.pipeline.clone();
                let config = self.config.clone();
                let stats = self.stats.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let succeeded = process_unit(&*pipeline, &config, &job).await;
                    let mut s = stats.write().await;
                    s.processed += 1;
                    if succeeded {
                        s.succeeded += 1;
                    }
                    succeeded
                }));
            }

            for handle in handles {
                summary.processed += 1;
                if matches!(handle.await, Ok(true)) {
                    summary.succeeded += 1;
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.cycles += 1;
        stats.discovered += discovered;
        stats.last_poll = Some(Utc::now());

        Ok(summary)
    }
}

/// Process one claimed unit end to end, including its terminal transition.
///
/// Returns true when the unit reached DONE.
async fn process_unit<P: CompletionPipeline>(
    pipeline: &P,
    config: &WorkerConfig,
    job: &RewardJob,
) -> bool {
    let timeout = Duration::from_secs(config.unit_timeout_secs);

    let outcome = match tokio::time::timeout(timeout, pipeline.process(job)).await {
        Ok(result) => result,
        Err(_) => Err(crate::error::RewardsError::UnitTimeout {
            elapsed_ms: timeout.as_millis() as u64,
        }),
    };

    match outcome {
        Ok(ProcessOutcome::Awarded {
            event_id,
            amount,
            unlocks,
        }) => {
            debug!(
                job_id = job.id,
                event_id, amount, unlocks, "unit awarded"
            );
            if let Err(e) = pipeline.complete(job.id).await {
                error!("Failed to mark job {} done: {}", job.id, e);
                return false;
            }
            true
        }
        Ok(ProcessOutcome::AlreadyProcessed) => {
            debug!(job_id = job.id, "unit already awarded, treating as success");
            if let Err(e) = pipeline.complete(job.id).await {
                error!("Failed to mark job {} done: {}", job.id, e);
                return false;
            }
            true
        }
        Err(e) => {
            let attempts = job.attempts + 1;
            let message = e.to_string();

            if attempts >= config.max_attempts {
                error!(
                    "Job {} permanently failed after {} attempts: {}",
                    job.id, attempts, message
                );
                if let Err(e) = pipeline.bury(job.id, attempts, &message).await {
                    error!("Failed to bury job {}: {}", job.id, e);
                }
            } else {
                let backoff = config.backoff_duration(attempts as u32);
                let retry_at = Utc::now()
                    + ChronoDuration::from_std(backoff)
                        .unwrap_or_else(|_| ChronoDuration::seconds(60));
                warn!(
                    "Job {} failed (attempt {}/{}), retrying in {:?}: {}",
                    job.id, attempts, config.max_attempts, backoff, message
                );
                if let Err(e) = pipeline.fail(job.id, attempts, &message, retry_at).await {
                    error!("Failed to mark job {} for retry: {}", job.id, e);
                }
            }
            false
        }
    }
}
