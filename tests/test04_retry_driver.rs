use std::time::Duration;

use grid_middleware::classify::RetryDelays;
use grid_middleware::config::{ConnectOptions, RetryConfig};
use grid_middleware::test_utils::{MockCall, MockDb, MockOp};
use grid_middleware::txn::{Authorize, Topup, Transaction};
use grid_middleware::types::{ConnectMode, RowValues};
use grid_middleware::{AttemptOutcome, GridConnection, GridError, NativeError, RetryDriver, Statistics};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

const BALANCE_QUERY: &str = "SELECT current_balance, prev_balance FROM accounts";
const BALANCE_UPDATE: &str = "UPDATE accounts SET prev_balance";

fn retry_config(grid_retry_limit: u32, failover_limit: u32) -> RetryConfig {
    RetryConfig {
        grid_retry_limit,
        grid_retry_delay: Duration::ZERO,
        failover_limit,
        failover_delay: Duration::ZERO,
    }
}

async fn topup_on(db: &MockDb, config: &RetryConfig) -> Result<(GridConnection, Topup), GridError> {
    db.set_rows(
        BALANCE_QUERY,
        vec![vec![
            RowValues::Decimal(Decimal::new(500, 2)),
            RowValues::Decimal(Decimal::new(500, 2)),
        ]],
    );
    let opts = ConnectOptions::builder("sampledb")
        .mode(ConnectMode::Direct)
        .delays(config.delays())
        .finish();
    let mut conn = GridConnection::new(opts, db.connector());
    conn.connect().await?;
    let mut topup = Topup::new();
    topup.init(&mut conn).await?;
    topup.set_account_id(42)?;
    topup.set_amount(Decimal::new(1000, 2))?;
    db.clear_calls();
    Ok((conn, topup))
}

fn transient() -> NativeError {
    NativeError::new(Some("TT005"), 0, "Transient transaction failure")
}

#[tokio::test]
async fn grid_retries_until_success_within_budget() -> Result<(), GridError> {
    let db = MockDb::new();
    let config = retry_config(5, 100);
    let (mut conn, mut topup) = topup_on(&db, &config).await?;
    db.fail_next(MockOp::Execute, Some(BALANCE_UPDATE), transient());
    db.fail_next(MockOp::Execute, Some(BALANCE_UPDATE), transient());

    let mut stats = Statistics::new();
    let report = RetryDriver::new(config)
        .run_attempt(&mut conn, &mut topup, &mut stats, &CancellationToken::new())
        .await;

    assert_eq!(report.outcome, AttemptOutcome::Succeeded { rows: 1 });
    assert_eq!(report.grid_retries, 2);
    assert_eq!(report.reprepares, 0);
    assert_eq!(stats.total.grid_retries, 2);
    assert_eq!(stats.total.topup, 1);
    assert_eq!(db.count(|c| matches!(c, MockCall::Prepare(_))), 0);
    assert_eq!(db.executions(BALANCE_UPDATE).len(), 3);
    assert_eq!(db.count(|c| *c == MockCall::Rollback), 2);
    assert_eq!(db.count(|c| *c == MockCall::Commit), 1);
    Ok(())
}

#[tokio::test]
async fn client_failover_reprepares_once_and_tracks_the_element() -> Result<(), GridError> {
    let db = MockDb::grid(1);
    let config = retry_config(30, 100);
    let (mut conn, mut topup) = topup_on(&db, &config).await?;
    assert_eq!(conn.element_id(), 1);
    db.fail_next(
        MockOp::Execute,
        Some(BALANCE_UPDATE),
        NativeError::new(Some("08006"), 47137, "client failover"),
    );
    db.set_element_id(2);

    let mut stats = Statistics::new();
    let report = RetryDriver::new(config)
        .run_attempt(&mut conn, &mut topup, &mut stats, &CancellationToken::new())
        .await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert_eq!(report.reprepares, 1);
    assert_eq!(report.failovers, 1);
    assert_eq!(report.element_changes, vec![(1, 2)]);
    assert_eq!(conn.element_id(), 2);
    assert_eq!(stats.total.failovers, 1);
    assert_eq!(stats.total.grid_retries, 0);

    // every statement is prepared again exactly once, before the retry runs
    let calls = db.calls();
    assert_eq!(db.prepares(BALANCE_UPDATE), 1);
    let reprepared = calls
        .iter()
        .position(|c| matches!(c, MockCall::Prepare(sql) if sql.contains(BALANCE_UPDATE)))
        .expect("reprepare");
    let executes: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, MockCall::Execute { sql, .. } if sql.contains(BALANCE_UPDATE)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(executes.len(), 2);
    assert!(executes[0] < reprepared && reprepared < executes[1]);
    Ok(())
}

#[tokio::test]
async fn exhausted_grid_retry_budget_fails_without_reprepare() -> Result<(), GridError> {
    let db = MockDb::new();
    let config = retry_config(1, 100);
    let (mut conn, mut topup) = topup_on(&db, &config).await?;
    db.fail_next(MockOp::Execute, Some(BALANCE_UPDATE), transient());
    db.fail_next(MockOp::Execute, Some(BALANCE_UPDATE), transient());

    let mut stats = Statistics::new();
    let report = RetryDriver::new(config)
        .run_attempt(&mut conn, &mut topup, &mut stats, &CancellationToken::new())
        .await;

    assert_eq!(report.outcome, AttemptOutcome::RetriesExhausted);
    assert!(!report.outcome.is_success());
    assert_eq!(report.grid_retries, 1);
    assert_eq!(report.reprepares, 0);
    assert_eq!(db.count(|c| matches!(c, MockCall::Prepare(_))), 0);
    assert_eq!(stats.total.topup, 0);
    assert!(conn.is_open());
    Ok(())
}

#[tokio::test]
async fn exhausted_failover_budget_stops_the_attempt() -> Result<(), GridError> {
    let db = MockDb::grid(1);
    let config = retry_config(30, 2);
    let (mut conn, mut topup) = topup_on(&db, &config).await?;
    for _ in 0..3 {
        db.fail_next(
            MockOp::Execute,
            Some(BALANCE_UPDATE),
            NativeError::with_code(47137, "client failover"),
        );
    }

    let mut stats = Statistics::new();
    let report = RetryDriver::new(config)
        .run_attempt(&mut conn, &mut topup, &mut stats, &CancellationToken::new())
        .await;
    assert_eq!(report.outcome, AttemptOutcome::RetriesExhausted);
    assert_eq!(report.reprepares, 1);
    Ok(())
}

#[tokio::test]
async fn ordinary_and_fatal_errors_are_not_retried() -> Result<(), GridError> {
    let db = MockDb::new();
    let config = retry_config(30, 100);
    let (mut conn, mut topup) = topup_on(&db, &config).await?;
    db.fail_next(
        MockOp::Execute,
        Some(BALANCE_UPDATE),
        NativeError::new(Some("23000"), 907, "unique constraint"),
    );
    let mut stats = Statistics::new();
    let driver = RetryDriver::new(config);
    let shutdown = CancellationToken::new();

    let report = driver.run_attempt(&mut conn, &mut topup, &mut stats, &shutdown).await;
    assert!(matches!(report.outcome, AttemptOutcome::Failed(GridError::Database(_))));
    assert_eq!(db.executions(BALANCE_UPDATE).len(), 1);

    db.fail_next(
        MockOp::Commit,
        None,
        NativeError::with_code(846, "element invalidated"),
    );
    let report = driver.run_attempt(&mut conn, &mut topup, &mut stats, &shutdown).await;
    assert!(report.outcome.is_connection_lost());
    assert!(!conn.is_open());
    Ok(())
}

#[tokio::test]
async fn cancelled_token_abandons_the_attempt_before_executing() -> Result<(), GridError> {
    let db = MockDb::new();
    let config = retry_config(30, 100);
    let (mut conn, mut topup) = topup_on(&db, &config).await?;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let report = RetryDriver::new(config)
        .run_attempt(&mut conn, &mut topup, &mut Statistics::new(), &shutdown)
        .await;
    assert_eq!(report.outcome, AttemptOutcome::Cancelled);
    assert!(db.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn read_only_rows_are_drained_and_optionally_committed() -> Result<(), GridError> {
    let db = MockDb::new();
    db.set_rows(
        "account_type",
        vec![vec![RowValues::Int(3), RowValues::Text("5550000001".into())]],
    );
    let mut conn = GridConnection::new(
        ConnectOptions::builder("sampledb")
            .delays(RetryDelays::default())
            .finish(),
        db.connector(),
    );
    conn.connect().await?;
    let mut auth = Authorize::new();
    auth.init(&mut conn).await?;
    auth.set_account_id(1)?;
    db.clear_calls();

    let mut stats = Statistics::new();
    let report = RetryDriver::new(RetryConfig::default())
        .commit_read_only(true)
        .run_attempt(&mut conn, &mut auth, &mut stats, &CancellationToken::new())
        .await;
    assert_eq!(report.outcome, AttemptOutcome::Succeeded { rows: 1 });
    assert_eq!(stats.total.authorize, 1);
    let calls = db.calls();
    let close = calls
        .iter()
        .position(|c| matches!(c, MockCall::CloseCursor(_)))
        .expect("cursor closed");
    let commit = calls
        .iter()
        .position(|c| *c == MockCall::Commit)
        .expect("committed");
    assert!(close < commit);
    Ok(())
}

#[tokio::test]
async fn failover_while_draining_rows_reprepares_and_retries() -> Result<(), GridError> {
    let db = MockDb::grid(1);
    db.set_rows(
        "account_type",
        vec![vec![RowValues::Int(3), RowValues::Text("5550000001".into())]],
    );
    let config = retry_config(30, 100);
    let mut conn = GridConnection::new(
        ConnectOptions::builder("sampledb")
            .delays(config.delays())
            .finish(),
        db.connector(),
    );
    conn.connect().await?;
    let mut auth = Authorize::new();
    auth.init(&mut conn).await?;
    auth.set_account_id(1)?;
    db.fail_next(
        MockOp::Fetch,
        None,
        NativeError::new(Some("08006"), 47137, "client failover"),
    );
    db.set_element_id(2);

    let mut stats = Statistics::new();
    let report = RetryDriver::new(config)
        .run_attempt(&mut conn, &mut auth, &mut stats, &CancellationToken::new())
        .await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert_eq!(report.failovers, 1);
    assert_eq!(report.reprepares, 1);
    assert_eq!(report.element_changes, vec![(1, 2)]);
    assert_eq!(conn.element_id(), 2);
    assert_eq!(stats.total.authorize, 1);
    assert_eq!(stats.total.failovers, 1);
    Ok(())
}
