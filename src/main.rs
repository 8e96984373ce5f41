use clap::Parser;
use rewards::api::{create_router, AppState, HealthState};
use rewards::cli::{print_dead_jobs, Cli, Commands, DeadCommands};
use rewards::config::{AppConfig, LoggingConfig};
use rewards::coordination::{install_signal_handlers, Shutdown};
use rewards::domain::{AggregateKey, PeriodType, Scope, ScopeKind, TermCalendar};
use rewards::engine::Engines;
use rewards::error::{Result, RewardsError};
use rewards::facade::DashboardFacade;
use rewards::snapshot::{SnapshotEngine, SnapshotScheduler};
use rewards::store::{PostgresStore, RewardPipeline};
use rewards::worker::{JobWorker, WorkerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config error: {e}");
        }
        return Err(RewardsError::Internal(
            "invalid configuration".to_string(),
        ));
    }

    let _log_guard = init_logging(&config.logging);

    match cli.command {
        Commands::Run => run_mode(config).await,
        Commands::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await
        }
        Commands::Snapshot { kind, id, period } => {
            let store = connect(&config).await?;
            let terms = TermCalendar::new(config.terms.clone());
            let engine = SnapshotEngine::new(store, terms);

            let entity = Scope::new(ScopeKind::try_from(kind.as_str())?, id);
            let period = PeriodType::try_from(period.as_str())?;

            let snapshot = engine.generate(&entity, period).await?;
            println!(
                "Snapshot {} for {} ({}, {}): {} entries",
                snapshot.id,
                snapshot.entity,
                snapshot.period_type,
                snapshot.period_key,
                snapshot.entries.len()
            );
            for entry in snapshot.entries.iter().take(10) {
                println!(
                    "  #{:<3} {:<16} {:>8} pts (was #{})",
                    entry.rank,
                    entry.student_id,
                    entry.score,
                    entry
                        .previous_rank
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        Commands::Repair {
            student,
            kind,
            id,
            period,
            key,
        } => {
            let store = connect(&config).await?;
            let terms = TermCalendar::new(config.terms.clone());

            let aggregate_key = AggregateKey {
                student_id: student,
                scope: Scope::new(ScopeKind::try_from(kind.as_str())?, id),
                period_type: PeriodType::try_from(period.as_str())?,
                period_key: key,
            };

            let (old_total, repaired) = store.repair_aggregate(&aggregate_key, &terms).await?;
            println!(
                "Repaired {aggregate_key}: {old_total} -> {} (at {})",
                repaired.total, repaired.updated_at
            );
            Ok(())
        }
        Commands::Dead { command } => {
            let store = connect(&config).await?;
            match command {
                DeadCommands::List { limit } => {
                    let jobs = store.dead_jobs(limit).await?;
                    print_dead_jobs(&jobs);
                }
                DeadCommands::Requeue { job_id } => {
                    store.requeue_dead_job(job_id).await?;
                    println!("Job {job_id} requeued.");
                }
            }
            Ok(())
        }
    }
}

async fn connect(config: &AppConfig) -> Result<PostgresStore> {
    PostgresStore::new(&config.database.url, config.database.max_connections).await
}

/// Run the full engine: worker, snapshot scheduler, query API, health
/// monitor. Blocks until a shutdown signal arrives and all tasks drain.
async fn run_mode(config: AppConfig) -> Result<()> {
    let store = connect(&config).await?;
    store.migrate().await?;

    let engines = Engines::from_config(&config);
    let terms = engines.terms.clone();

    let pipeline = Arc::new(RewardPipeline::new(store.clone(), engines));
    let worker = Arc::new(JobWorker::new(
        WorkerConfig::from_settings(&config.worker),
        pipeline,
    ));

    let snapshot_engine = Arc::new(SnapshotEngine::new(store.clone(), terms.clone()));
    let scheduler = SnapshotScheduler::new(snapshot_engine.clone(), config.snapshots.clone());

    let shutdown = Arc::new(Shutdown::new());
    install_signal_handlers(shutdown.clone()).await;

    // Worker counts as stalled after missing a few polls
    let health = Arc::new(HealthState::new(config.worker.poll_interval_secs * 4 + 30));
    let facade = Arc::new(DashboardFacade::new(store.clone(), terms));
    let router = create_router(AppState {
        facade,
        health: health.clone(),
    });

    let port = config.http_port.unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let mut tasks = Vec::new();

    {
        let worker = worker.clone();
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            worker.run(rx).await;
        }));
    }

    tasks.extend(scheduler.spawn(shutdown.subscribe()));

    {
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = rewards::api::serve(addr, router, rx).await {
                error!("Query API failed: {e}");
            }
        }));
    }

    {
        let store = store.clone();
        let worker = worker.clone();
        let snapshot_engine = snapshot_engine.clone();
        let health = health.clone();
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }

                health.set_db_connected(store.ping().await.is_ok());
                if let Some(at) = worker.stats().await.last_poll {
                    health.record_worker_poll(at).await;
                }
                health
                    .record_snapshots(snapshot_engine.last_generated().await)
                    .await;
            }
        }));
    }

    info!("Rewards engine running (api port: {port})");

    for task in tasks {
        let _ = task.await;
    }

    info!("Rewards engine stopped");
    Ok(())
}

/// Initialize tracing with an optional daily-rolling file layer.
///
/// Returns the appender guard; dropping it loses buffered log lines.
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},rewards=debug,sqlx=warn", config.level))
    });

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial log file, so writability is preflighted first
    let (file_layer, guard) = match std::env::var("REWARDS_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .ok()
    {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let test_path = std::path::Path::new(&dir).join(".rewards_write_test");
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&test_path)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&test_path);
                    let appender = tracing_appender::rolling::daily(&dir, "rewards.log");
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    let layer = tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true);
                    (Some(layer), Some(guard))
                }
                Err(_) => (None, None),
            }
        }
        _ => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    guard
}
