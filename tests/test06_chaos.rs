#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use grid_middleware::chaos::{ChaosConnector, ChaosOptions};
use grid_middleware::config::{ConnectOptions, RetryConfig, RunLimit, WorkloadConfig};
use grid_middleware::native::NativeConnector;
use grid_middleware::sqlite::{SeedOptions, SqliteConnector, SqliteOptions, create_sample_database};
use grid_middleware::types::Dialect;
use grid_middleware::{AttemptOutcome, GridError, RunEnd, Workload};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn chaos_connector(
    dir: &tempfile::TempDir,
    opts: ChaosOptions,
) -> Result<Arc<dyn NativeConnector>, GridError> {
    let path = dir.path().join("chaos.db").to_string_lossy().into_owned();
    create_sample_database(
        &path,
        SeedOptions {
            customers: 20,
            accounts_per_customer: 2,
        },
    )
    .await
    .map_err(GridError::Database)?;
    let sqlite: Arc<dyn NativeConnector> = Arc::new(SqliteConnector::new(SqliteOptions::new(path)));
    Ok(Arc::new(ChaosConnector::new(sqlite, opts)?))
}

fn fast_config(run_limit: RunLimit) -> WorkloadConfig {
    WorkloadConfig {
        retry: RetryConfig {
            grid_retry_delay: Duration::ZERO,
            failover_delay: Duration::ZERO,
            ..RetryConfig::default()
        },
        run_limit,
        ..WorkloadConfig::default()
    }
}

fn options() -> ConnectOptions {
    ConnectOptions::builder("sampledb")
        .dialect(Dialect::Sqlite)
        .finish()
}

#[tokio::test]
async fn workload_survives_retries_and_failovers() -> TestResult {
    let dir = tempfile::tempdir()?;
    let connector = chaos_connector(
        &dir,
        ChaosOptions {
            seed: 11,
            grid_retry_rate: 0.05,
            failover_rate: 0.02,
            fatal_rate: 0.0,
            elements: 3,
        },
    )
    .await?;

    let mut workload =
        Workload::start(0, options(), connector, fast_config(RunLimit::Transactions(300)), 5).await?;
    assert!(workload.connection().is_grid());
    let end = workload.run(&CancellationToken::new()).await;
    assert_eq!(end, RunEnd::LimitReached);
    assert!((1..=3).contains(&workload.connection().element_id()));

    let stats = workload.finish().await;
    assert_eq!(stats.total.executed, 300);
    assert!(stats.total.grid_retries > 0);
    assert!(stats.total.failovers > 0);
    Ok(())
}

#[tokio::test]
async fn element_invalidation_ends_the_run() -> TestResult {
    let dir = tempfile::tempdir()?;
    let connector = chaos_connector(
        &dir,
        ChaosOptions {
            seed: 3,
            grid_retry_rate: 0.0,
            failover_rate: 0.0,
            fatal_rate: 1.0,
            elements: 2,
        },
    )
    .await?;
    let err = Workload::start(0, options(), connector, fast_config(RunLimit::Unbounded), 1)
        .await
        .err();
    assert!(matches!(err, Some(GridError::Fatal { .. })), "{err:?}");

    let dir = tempfile::tempdir()?;
    let connector = chaos_connector(
        &dir,
        ChaosOptions {
            seed: 3,
            grid_retry_rate: 0.0,
            failover_rate: 0.0,
            fatal_rate: 0.01,
            elements: 2,
        },
    )
    .await?;
    // a worker that loses its element during startup fails there; one that
    // gets through loses it during the run
    for seed in 0..32 {
        let Ok(mut workload) = Workload::start(
            0,
            options(),
            Arc::clone(&connector),
            fast_config(RunLimit::Unbounded),
            seed,
        )
        .await
        else {
            continue;
        };
        let end = workload.run(&CancellationToken::new()).await;
        assert!(
            matches!(end, RunEnd::Aborted(AttemptOutcome::ConnectionLost(_))),
            "{end:?}"
        );
        assert!(!workload.connection().is_open());
        return Ok(());
    }
    panic!("no worker got through startup");
}
