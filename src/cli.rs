use crate::domain::RewardJob;
use clap::{Parser, Subcommand};

/// Reward and leaderboard aggregation engine
#[derive(Debug, Parser)]
#[command(name = "rewards", version, about)]
pub struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config", global = true)]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the worker, snapshot scheduler and query API
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// Generate one leaderboard snapshot immediately
    Snapshot {
        /// Entity kind (CLASS, SUBJECT, COURSE, CAMPUS)
        #[arg(long)]
        kind: String,
        /// Entity id
        #[arg(long)]
        id: String,
        /// Period type (DAY, WEEK, MONTH, TERM, ALL_TIME)
        #[arg(long)]
        period: String,
    },
    /// Recompute one aggregate row from the event log (drift repair)
    Repair {
        #[arg(long)]
        student: String,
        /// Scope kind (CLASS, SUBJECT, COURSE, CAMPUS)
        #[arg(long)]
        kind: String,
        /// Scope id
        #[arg(long)]
        id: String,
        /// Period type (DAY, WEEK, MONTH, TERM, ALL_TIME)
        #[arg(long)]
        period: String,
        /// Period key (e.g. 2026-08-06, 2026-W32, all)
        #[arg(long)]
        key: String,
    },
    /// Inspect and requeue units that exhausted their attempts
    Dead {
        #[command(subcommand)]
        command: DeadCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum DeadCommands {
    /// List dead units
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Move a dead unit back to PENDING with attempts reset
    Requeue { job_id: i64 },
}

/// Print dead units for manual inspection
pub fn print_dead_jobs(jobs: &[RewardJob]) {
    if jobs.is_empty() {
        println!("No dead units.");
        return;
    }

    println!(
        "{:>8}  {:<16} {:<12} {:<20} {:>8}  {}",
        "id", "student", "source", "source_id", "attempts", "last error"
    );
    for job in jobs {
        println!(
            "{:>8}  {:<16} {:<12} {:<20} {:>8}  {}",
            job.id,
            job.student_id,
            job.source.as_str(),
            job.source_id,
            job.attempts,
            job.last_error.as_deref().unwrap_or("-")
        );
    }
}
