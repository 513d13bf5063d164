use grid_middleware::config::ConnectOptions;
use grid_middleware::statement::StatementRole;
use grid_middleware::test_utils::{MockCall, MockDb, MockOp};
use grid_middleware::types::{ConnectMode, RowValues};
use grid_middleware::{GridConnection, GridError, NativeError};

fn options() -> ConnectOptions {
    ConnectOptions::new("sampledb", ConnectMode::Direct)
}

async fn connected(db: &MockDb) -> Result<GridConnection, GridError> {
    let mut conn = GridConnection::new(options(), db.connector());
    conn.connect().await?;
    Ok(conn)
}

#[tokio::test]
async fn connect_switches_off_auto_commit_and_detects_non_grid() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    assert!(conn.is_open());
    assert!(!conn.is_grid());
    assert_eq!(conn.element_id(), 0);
    assert_eq!(
        db.calls()[..2],
        [
            MockCall::Open("timesten:direct:DSN=sampledb;ConnectionName=GridSample".into()),
            MockCall::SetAutoCommit(false),
        ]
    );
    assert!(matches!(conn.connect().await, Err(GridError::AlreadyOpen)));
    assert!(matches!(
        conn.refresh_element_id().await,
        Err(GridError::NotGrid)
    ));
    Ok(())
}

#[tokio::test]
async fn grid_connect_reads_and_refreshes_the_element_id() -> Result<(), GridError> {
    let db = MockDb::grid(3);
    let mut conn = connected(&db).await?;
    assert!(conn.is_grid());
    assert_eq!(conn.element_id(), 3);
    assert_eq!(
        conn.statement_roles().collect::<Vec<_>>(),
        vec![StatementRole::ElementId]
    );

    db.set_element_id(5);
    assert_eq!(conn.refresh_element_id().await?, 5);
    assert_eq!(conn.element_id(), 5);
    Ok(())
}

#[tokio::test]
async fn client_server_mode_requires_both_credentials() {
    let db = MockDb::new();
    let opts = ConnectOptions::builder("sampledbCS")
        .mode(ConnectMode::ClientServer)
        .user(Some("appuser".into()))
        .password(None)
        .finish();
    let mut conn = GridConnection::new(opts, db.connector());
    assert!(matches!(conn.connect().await, Err(GridError::Parameter(_))));
    assert!(db.calls().is_empty(), "no native call before validation");
    assert!(!conn.is_open());
}

#[tokio::test]
async fn failed_open_is_reported_as_database_error() {
    let db = MockDb::new();
    db.fail_next(MockOp::Open, None, NativeError::with_code(12701, "no such DSN"));
    let mut conn = GridConnection::new(options(), db.connector());
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, GridError::Database(ref e) if e.code == 12701));
    assert_eq!(conn.last_error(), Some(&err));
    assert!(!conn.is_open());
}

#[tokio::test]
async fn label_can_be_reused_after_close_but_not_before() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);

    conn.prepare(role, "SELECT 1 FROM dual").await?;
    let err = conn.prepare(role, "SELECT 1 FROM dual").await.err();
    assert_eq!(err, Some(GridError::DuplicateLabel(role)));

    conn.close_statement(role).await;
    conn.close_statement(role).await;
    conn.prepare(role, "SELECT 1 FROM dual").await?;
    assert_eq!(db.prepares("SELECT 1 FROM dual"), 2);
    Ok(())
}

#[tokio::test]
async fn close_twice_succeeds_without_touching_the_driver() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    conn.prepare(StatementRole::Custom(1), "SELECT a FROM t").await?;

    assert!(conn.close(false).await);
    assert!(!conn.is_open());
    let after_first = db.calls().len();
    assert!(conn.close(false).await);
    assert_eq!(db.calls().len(), after_first);
    assert_eq!(conn.statement_roles().count(), 0);
    Ok(())
}

#[tokio::test]
async fn commit_closes_open_cursors_exactly_once_first() -> Result<(), GridError> {
    let db = MockDb::new();
    db.set_rows(
        "FROM t",
        vec![vec![RowValues::Int(1)], vec![RowValues::Int(2)]],
    );
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(7);
    {
        let mut stmt = conn.prepare(role, "SELECT a FROM t").await?;
        assert!(stmt.execute().await?);
        let mut rs = stmt.result_set()?;
        assert!(rs.next().await?);
        assert_eq!(rs.get_long(0)?, 1);
        assert_eq!(rs.position()?, 1);
    }

    db.clear_calls();
    conn.commit().await?;
    let calls = db.calls();
    assert_eq!(calls.len(), 2, "{calls:?}");
    assert!(matches!(calls[0], MockCall::CloseCursor(_)));
    assert_eq!(calls[1], MockCall::Commit);
    assert!(!conn.statement(role)?.has_result_set());
    Ok(())
}

#[tokio::test]
async fn reprepare_stops_at_the_first_failure() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    for (n, sql) in [(1, "SELECT one"), (2, "SELECT two"), (3, "SELECT three")] {
        conn.prepare(StatementRole::Custom(n), sql).await?;
    }

    db.fail_next(
        MockOp::Prepare,
        Some("two"),
        NativeError::with_code(2206, "table not found"),
    );
    db.clear_calls();
    assert!(!conn.reprepare_all().await);
    assert!(matches!(conn.last_error(), Some(GridError::Database(e)) if e.code == 2206));
    assert_eq!(db.prepares("SELECT one"), 1);
    assert_eq!(db.prepares("SELECT two"), 1);
    assert_eq!(db.prepares("SELECT three"), 0);

    // the statement before the failure is usable, the failed one is not
    assert!(conn.statement(StatementRole::Custom(1))?.execute().await?);
    let mut failed = conn.statement(StatementRole::Custom(2))?;
    assert!(matches!(failed.execute().await, Err(GridError::State(_))));
    assert!(failed.set_long(1, 1).is_err());
    assert!(conn.statement(StatementRole::Custom(3))?.execute().await?);

    assert!(conn.reprepare_all().await);
    assert!(conn.statement(StatementRole::Custom(2))?.execute().await?);
    Ok(())
}

#[tokio::test]
async fn retryable_execute_error_rolls_back_and_keeps_the_connection() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);
    conn.prepare(role, "UPDATE t SET a = 1").await?;
    db.fail_next(
        MockOp::Execute,
        None,
        NativeError::new(Some("TT005"), 0, "transient"),
    );
    db.clear_calls();

    let err = conn.statement(role)?.execute().await.unwrap_err();
    assert!(matches!(err, GridError::GridRetryable { .. }));
    assert_eq!(err.retry_delay(), Some(std::time::Duration::from_millis(5)));
    assert!(db.calls().contains(&MockCall::Rollback));
    assert!(conn.is_open());
    assert_eq!(conn.statement(role)?.last_error(), Some(&err));
    Ok(())
}

#[tokio::test]
async fn fatal_execute_error_closes_the_connection() -> Result<(), GridError> {
    let db = MockDb::grid(2);
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);
    conn.prepare(role, "UPDATE t SET a = 1").await?;
    db.fail_next(
        MockOp::Execute,
        None,
        NativeError::with_code(994, "element invalidated"),
    );

    let err = conn.statement(role)?.execute().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(!conn.is_open());
    assert!(!conn.is_grid());
    assert!(db.calls().contains(&MockCall::Close));
    assert!(matches!(conn.statement(role), Err(GridError::State(_))));
    Ok(())
}

#[tokio::test]
async fn ordinary_errors_are_recorded_and_returned() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);
    conn.prepare(role, "INSERT INTO t VALUES (1)").await?;
    db.fail_next(
        MockOp::Execute,
        None,
        NativeError::new(Some("23000"), 907, "unique constraint violated"),
    );
    db.clear_calls();

    let err = conn.statement(role)?.execute().await.unwrap_err();
    assert!(matches!(err, GridError::Database(ref e) if e.code == 907));
    assert!(!db.calls().contains(&MockCall::Rollback));
    assert_eq!(conn.last_error(), Some(&err));
    assert!(conn.rollback().await);
    Ok(())
}

#[tokio::test]
async fn parameters_are_bound_by_one_based_index() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);
    let mut stmt = conn.prepare(role, "UPDATE t SET a = ? WHERE b = ?").await?;
    assert!(matches!(stmt.set_int(0, 1), Err(GridError::Parameter(_))));
    stmt.set_string(2, "x")?;
    stmt.set_int(1, 9)?;
    assert!(!stmt.execute().await?);
    assert_eq!(stmt.update_count(), Some(1));
    assert_eq!(
        db.executions("UPDATE t"),
        vec![vec![RowValues::Int(9), RowValues::Text("x".into())]]
    );
    Ok(())
}

#[tokio::test]
async fn retryable_fetch_error_is_typed_and_rolls_back() -> Result<(), GridError> {
    let db = MockDb::new();
    db.set_rows("FROM t", vec![vec![RowValues::Int(1)]]);
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);
    db.fail_next(
        MockOp::Fetch,
        None,
        NativeError::new(Some("TT005"), 0, "transient"),
    );

    let err = {
        let mut stmt = conn.prepare(role, "SELECT a FROM t").await?;
        assert!(stmt.execute().await?);
        db.clear_calls();
        let mut rs = stmt.result_set()?;
        rs.next().await.unwrap_err()
    };
    assert!(matches!(err, GridError::GridRetryable { .. }));
    assert!(db.calls().contains(&MockCall::Rollback));
    assert!(conn.is_open());
    assert_eq!(conn.last_error(), Some(&err));
    assert!(!conn.statement(role)?.has_result_set());
    Ok(())
}

#[tokio::test]
async fn failover_during_fetch_is_typed() -> Result<(), GridError> {
    let db = MockDb::grid(1);
    db.set_rows("FROM t", vec![vec![RowValues::Int(1)]]);
    let mut conn = connected(&db).await?;
    let role = StatementRole::Custom(1);
    db.fail_next(
        MockOp::Fetch,
        None,
        NativeError::with_code(47137, "client failover"),
    );

    let err = {
        let mut stmt = conn.prepare(role, "SELECT a FROM t").await?;
        assert!(stmt.execute().await?);
        let mut rs = stmt.result_set()?;
        rs.next().await.unwrap_err()
    };
    assert!(matches!(err, GridError::ClientFailover { ref source, .. } if source.code == 47137));
    assert!(err.retry_delay().is_some());
    assert!(conn.is_open());
    Ok(())
}

#[tokio::test]
async fn transient_commit_failures_roll_back_and_keep_their_class() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    let faults = [
        NativeError::new(Some("08006"), 47137, "client failover"),
        NativeError::new(Some("TT005"), 0, "transient"),
    ];
    for fault in faults {
        db.fail_next(MockOp::Commit, None, fault);
        db.clear_calls();
        let err = conn.commit().await.unwrap_err();
        assert!(
            matches!(
                err,
                GridError::ClientFailover { .. } | GridError::GridRetryable { .. }
            ),
            "{err:?}"
        );
        assert_eq!(db.calls(), vec![MockCall::Commit, MockCall::Rollback]);
        assert!(conn.is_open());
    }
    conn.commit().await?;
    assert_eq!(conn.last_error(), None);
    Ok(())
}

#[tokio::test]
async fn fatal_rollback_failure_closes_the_connection() -> Result<(), GridError> {
    let db = MockDb::grid(2);
    let mut conn = connected(&db).await?;
    db.fail_next(
        MockOp::Rollback,
        None,
        NativeError::with_code(994, "element invalidated"),
    );

    assert!(!conn.rollback().await);
    assert!(!conn.is_open());
    assert!(!conn.is_grid());
    assert!(matches!(conn.last_error(), Some(e) if e.is_fatal()));
    assert!(db.calls().contains(&MockCall::Close));
    Ok(())
}

#[tokio::test]
async fn ordinary_rollback_failure_keeps_the_connection() -> Result<(), GridError> {
    let db = MockDb::new();
    let mut conn = connected(&db).await?;
    db.fail_next(
        MockOp::Rollback,
        None,
        NativeError::with_code(2206, "rollback refused"),
    );

    assert!(!conn.rollback().await);
    assert!(conn.is_open());
    assert!(matches!(conn.last_error(), Some(GridError::Database(e)) if e.code == 2206));
    assert!(conn.rollback().await);
    assert_eq!(conn.last_error(), None);
    Ok(())
}
