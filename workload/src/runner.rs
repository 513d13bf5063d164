use std::sync::Arc;
use std::time::Instant;

use grid_middleware::chaos::ChaosConnector;
use grid_middleware::native::NativeConnector;
use grid_middleware::sqlite::{SeedOptions, SqliteConnector, create_sample_database};
use grid_middleware::{GridError, RunEnd, Statistics, Workload, clear_history};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::args::RunConfig;

/// Merged outcome of every worker.
pub(crate) struct RunSummary {
    pub(crate) stats: Statistics,
    pub(crate) failed_workers: usize,
}

type WorkerResult = Result<(Statistics, RunEnd), GridError>;

fn connector(config: &RunConfig) -> Result<Arc<dyn NativeConnector>, GridError> {
    let path = config.db.to_string_lossy().into_owned();
    let sqlite: Arc<dyn NativeConnector> = Arc::new(
        SqliteConnector::builder(path)
            .busy_timeout(config.busy_timeout)
            .build(),
    );
    match config.chaos {
        Some(opts) => {
            info!(?opts, "fault injection enabled");
            Ok(Arc::new(ChaosConnector::new(sqlite, opts)?))
        }
        None => Ok(sqlite),
    }
}

fn spawn_worker(
    worker: usize,
    config: &RunConfig,
    connector: Arc<dyn NativeConnector>,
    shutdown: CancellationToken,
) -> JoinHandle<WorkerResult> {
    let options = config.connect.clone();
    let workload = config.workload.clone();
    let seed = config.seed.wrapping_add(worker as u64);
    tokio::spawn(async move {
        let mut w = Workload::start(worker, options, connector, workload, seed).await?;
        let end = w.run(&shutdown).await;
        info!(worker, end = ?end, "worker finished");
        Ok((w.finish().await, end))
    })
}

/// Seed the database, run every worker to completion and merge their
/// statistics. Ctrl-C cancels the run between transactions.
///
/// The history is cleared once before the workers start; the workers
/// themselves never clear it.
pub(crate) async fn run(mut config: RunConfig) -> Result<RunSummary, GridError> {
    let path = config.db.to_string_lossy().into_owned();
    create_sample_database(
        &path,
        SeedOptions {
            customers: config.customers,
            ..SeedOptions::default()
        },
    )
    .await
    .map_err(GridError::Database)?;
    let connector = connector(&config)?;
    if config.workload.clear_history {
        clear_history(config.connect.clone(), Arc::clone(&connector), &config.workload).await?;
        config.workload.clear_history = false;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping workers");
            signal.cancel();
        }
    });

    let started = Instant::now();
    let handles: Vec<_> = (0..config.workers)
        .map(|worker| spawn_worker(worker, &config, Arc::clone(&connector), shutdown.clone()))
        .collect();

    let mut stats = Statistics::new();
    let mut failed_workers = 0;
    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok((worker_stats, end))) => {
                stats.merge(&worker_stats);
                if let RunEnd::Aborted(outcome) = end {
                    error!(worker, ?outcome, "worker aborted");
                    failed_workers += 1;
                }
            }
            Ok(Err(e)) => {
                error!(worker, error = %e, "worker failed to start");
                failed_workers += 1;
            }
            Err(e) => {
                error!(worker, error = %e, "worker task failed");
                failed_workers += 1;
            }
        }
    }
    stats.report_summary(started.elapsed());
    Ok(RunSummary {
        stats,
        failed_workers,
    })
}
