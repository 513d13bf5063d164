#![cfg(feature = "sqlite")]

use std::sync::Arc;

use grid_middleware::config::{ConnectOptions, RunLimit, TxnMix, WorkloadConfig};
use grid_middleware::native::NativeConnector;
use grid_middleware::sqlite::{SeedOptions, SqliteConnector, SqliteOptions, create_sample_database};
use grid_middleware::statement::StatementRole;
use grid_middleware::txn::{Topup, Transaction, TxnOutput};
use grid_middleware::types::Dialect;
use grid_middleware::{GridConnection, GridError, RunEnd, Statistics, Workload, clear_history};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn seeded_db(dir: &tempfile::TempDir, customers: u32) -> Result<String, GridError> {
    let path = dir.path().join("grid.db").to_string_lossy().into_owned();
    create_sample_database(
        &path,
        SeedOptions {
            customers,
            accounts_per_customer: 2,
        },
    )
    .await
    .map_err(GridError::Database)?;
    Ok(path)
}

fn sqlite_options() -> ConnectOptions {
    ConnectOptions::builder("sampledb")
        .dialect(Dialect::Sqlite)
        .finish()
}

#[tokio::test]
async fn topup_round_trips_through_sqlite() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = seeded_db(&dir, 10).await?;
    let connector: Arc<dyn NativeConnector> =
        Arc::new(SqliteConnector::new(SqliteOptions::new(path.clone())));
    let mut conn = GridConnection::new(sqlite_options(), connector);
    conn.connect().await?;
    assert!(!conn.is_grid());

    let mut topup = Topup::new();
    topup.init(&mut conn).await?;
    topup.set_account_id(3)?;
    topup.set_amount(Decimal::new(1000, 2))?;
    assert_eq!(topup.execute(&mut conn).await?, TxnOutput::Done { rows: 1 });
    assert_eq!(
        topup.balance_before(),
        Some((Decimal::new(50, 0), Decimal::new(50, 0)))
    );

    topup.set_account_id(100_000)?;
    assert_eq!(topup.execute(&mut conn).await, Err(GridError::NoResults));

    // custom statements share the registry with the built-in ones
    let role = StatementRole::Custom(1);
    {
        let mut stmt = conn
            .prepare(role, "SELECT current_balance, prev_balance FROM accounts WHERE account_id = ?1")
            .await?;
        stmt.set_long(1, 3)?;
        assert!(stmt.execute().await?);
        let mut rs = stmt.result_set()?;
        assert!(rs.next().await?);
        assert_eq!(rs.get_decimal(0)?, Decimal::new(60, 0));
        assert_eq!(rs.get_double(1)?, 50.0);
    }
    conn.commit().await?;
    topup.cleanup(&mut conn).await;
    assert!(conn.close(true).await);

    let check = rusqlite::Connection::open(&path)?;
    let (count, amount): (i64, f64) = check.query_row(
        "SELECT COUNT(*), SUM(amount) FROM transactions WHERE account_id = 3 AND optype = 'T'",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!((count, amount), (1, 10.0));
    Ok(())
}

#[tokio::test]
async fn workload_runs_to_its_transaction_limit() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = seeded_db(&dir, 50).await?;
    {
        let stale = rusqlite::Connection::open(&path)?;
        stale.execute(
            "INSERT INTO transactions (account_id, transaction_ts, description, optype, amount) \
             VALUES (1, datetime('now', '-1 day'), 'stale', 'T', 1.0)",
            [],
        )?;
    }

    let connector: Arc<dyn NativeConnector> =
        Arc::new(SqliteConnector::new(SqliteOptions::new(path.clone())));
    let config = WorkloadConfig {
        mix: TxnMix::new(40, 25, 20, 10, 5)?,
        run_limit: RunLimit::Transactions(200),
        ..WorkloadConfig::default()
    };
    let mut workload = Workload::start(0, sqlite_options(), connector, config, 7).await?;
    let counts = workload.counts();
    assert_eq!((counts.min_cust_id, counts.max_cust_id), (1, 50));
    assert_eq!(counts.num_accounts, 100);

    let end = workload.run(&CancellationToken::new()).await;
    assert_eq!(end, RunEnd::LimitReached);
    let stats = workload.finish().await;
    assert_eq!(stats.total.executed, 200);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        stats.total.authorize + stats.total.charge + stats.total.topup + stats.total.query + stats.total.purge,
        200
    );
    assert_eq!(stats.account_updates, stats.total.charge + stats.total.topup);

    // history was cleared at startup and nothing is old enough to purge
    let check = rusqlite::Connection::open(&path)?;
    let rows: i64 = check.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
    assert_eq!(rows as u64, stats.transaction_inserts);
    assert_eq!(stats.transaction_deletes, 0);
    Ok(())
}

#[tokio::test]
async fn history_is_cleared_once_for_all_workers() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = seeded_db(&dir, 20).await?;
    {
        let stale = rusqlite::Connection::open(&path)?;
        stale.execute(
            "INSERT INTO transactions (account_id, transaction_ts, description, optype, amount) \
             VALUES (1, datetime('now'), 'stale', 'T', 1.0)",
            [],
        )?;
    }

    let connector: Arc<dyn NativeConnector> =
        Arc::new(SqliteConnector::new(SqliteOptions::new(path.clone())));
    let mut config = WorkloadConfig {
        mix: TxnMix::new(0, 50, 50, 0, 0)?,
        run_limit: RunLimit::Transactions(20),
        ..WorkloadConfig::default()
    };
    let cleared = clear_history(sqlite_options(), Arc::clone(&connector), &config).await?;
    assert_eq!(cleared, 1);
    config.clear_history = false;

    // the second worker starts after the first one has written its history
    let mut merged = Statistics::new();
    for worker in 0..2 {
        let mut workload = Workload::start(
            worker,
            sqlite_options(),
            Arc::clone(&connector),
            config.clone(),
            worker as u64,
        )
        .await?;
        assert_eq!(workload.run(&CancellationToken::new()).await, RunEnd::LimitReached);
        merged.merge(&workload.finish().await);
    }

    assert_eq!(merged.total.executed, 40);
    assert_eq!(merged.transaction_inserts, merged.total.charge + merged.total.topup);
    assert!(merged.transaction_inserts > 20);
    let check = rusqlite::Connection::open(&path)?;
    let rows: i64 = check.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
    assert_eq!(rows as u64, merged.transaction_inserts - merged.transaction_deletes);
    Ok(())
}

#[tokio::test]
async fn cancelled_workload_stops_before_running() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = seeded_db(&dir, 5).await?;
    let connector: Arc<dyn NativeConnector> =
        Arc::new(SqliteConnector::new(SqliteOptions::new(path)));
    let mut workload =
        Workload::start(1, sqlite_options(), connector, WorkloadConfig::default(), 1).await?;
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    assert_eq!(workload.run(&shutdown).await, RunEnd::Cancelled);
    assert_eq!(workload.finish().await.total.executed, 0);
    Ok(())
}

#[tokio::test]
async fn empty_tables_fail_startup() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = seeded_db(&dir, 0).await?;
    let connector: Arc<dyn NativeConnector> =
        Arc::new(SqliteConnector::new(SqliteOptions::new(path)));
    let err = Workload::start(0, sqlite_options(), connector, WorkloadConfig::default(), 1)
        .await
        .err();
    assert_eq!(err, Some(GridError::NoResults));
    Ok(())
}
