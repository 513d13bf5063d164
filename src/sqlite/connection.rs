use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::ErrorCode;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::error::NativeError;
use crate::native::{NativeConnection, NativeCursorId, NativeExecution, NativeStatementId};
use crate::types::RowValues;

use super::params::{Params, sqlite_value_to_row_value};

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

enum Executed {
    Rows(VecDeque<Vec<RowValues>>),
    Affected(u64),
}

/// Native code reported for `SQLite` busy/locked errors. It is the lock
/// timeout code of the grid database, so contention takes the retry path.
pub const SQLITE_LOCK_TIMEOUT_CODE: i32 = 6003;

/// Map a rusqlite error onto the native error triple.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> NativeError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => NativeError::new(
                Some("HY000"),
                SQLITE_LOCK_TIMEOUT_CODE,
                err.to_string(),
            ),
            _ => NativeError::with_code(failure.extended_code, err.to_string()),
        },
        _ => NativeError::with_code(0, err.to_string()),
    }
}

async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, NativeError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, rusqlite::Error> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard).map_err(map_sqlite_error)
    })
    .await
    .map_err(|e| NativeError::with_code(0, format!("sqlite spawn_blocking join error: {e}")))?
}

/// One rusqlite session.
///
/// Statements are kept as SQL text and run through rusqlite's statement
/// cache; cursors are materialized when the statement executes. With
/// auto-commit off, the first statement after a commit or rollback opens
/// a transaction.
pub struct SqliteNativeConnection {
    conn: SharedSqliteConnection,
    statements: HashMap<NativeStatementId, Arc<str>>,
    cursors: HashMap<NativeCursorId, VecDeque<Vec<RowValues>>>,
    next_id: u64,
    auto_commit: bool,
    in_transaction: bool,
    closed: bool,
}

impl fmt::Debug for SqliteNativeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteNativeConnection")
            .field("statements", &self.statements.len())
            .field("cursors", &self.cursors.len())
            .field("auto_commit", &self.auto_commit)
            .field("in_transaction", &self.in_transaction)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SqliteNativeConnection {
    pub(crate) fn new(conn: SharedSqliteConnection) -> Self {
        Self {
            conn,
            statements: HashMap::new(),
            cursors: HashMap::new(),
            next_id: 1,
            auto_commit: true,
            in_transaction: false,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), NativeError> {
        if self.closed {
            return Err(NativeError::with_code(0, "sqlite session is closed"));
        }
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn begin_if_needed(&mut self) -> Result<(), NativeError> {
        if self.auto_commit || self.in_transaction {
            return Ok(());
        }
        run_blocking(Arc::clone(&self.conn), |c| c.execute_batch("BEGIN")).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn finish_transaction(&mut self, sql: &'static str) -> Result<(), NativeError> {
        self.ensure_open()?;
        if !self.in_transaction {
            return Ok(());
        }
        self.cursors.clear();
        let result = run_blocking(Arc::clone(&self.conn), move |c| c.execute_batch(sql)).await;
        // A failed COMMIT leaves the transaction open for a rollback
        if result.is_ok() || sql == "ROLLBACK" {
            self.in_transaction = false;
        }
        result
    }
}

#[async_trait]
impl NativeConnection for SqliteNativeConnection {
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), NativeError> {
        self.ensure_open()?;
        if enabled && self.in_transaction {
            self.finish_transaction("COMMIT").await?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> Result<NativeStatementId, NativeError> {
        self.ensure_open()?;
        let sql: Arc<str> = Arc::from(sql);
        let check = Arc::clone(&sql);
        run_blocking(Arc::clone(&self.conn), move |c| {
            c.prepare_cached(&check).map(|_| ())
        })
        .await?;
        let id = NativeStatementId(self.next_id());
        self.statements.insert(id, sql);
        Ok(id)
    }

    async fn execute(
        &mut self,
        stmt: NativeStatementId,
        params: &[RowValues],
    ) -> Result<NativeExecution, NativeError> {
        self.ensure_open()?;
        let sql = self
            .statements
            .get(&stmt)
            .cloned()
            .ok_or_else(|| NativeError::with_code(0, format!("unknown statement {}", stmt.0)))?;
        self.begin_if_needed().await?;
        let params = Params::convert(params);
        let outcome = run_blocking(Arc::clone(&self.conn), move |c| {
            let mut prepared = c.prepare_cached(&sql)?;
            let refs = params.as_refs();
            let columns = prepared.column_count();
            if columns == 0 {
                let affected = prepared.execute(&refs[..])?;
                return Ok(Executed::Affected(affected as u64));
            }
            let mut rows = prepared.query(&refs[..])?;
            let mut buffered = VecDeque::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns);
                for i in 0..columns {
                    values.push(sqlite_value_to_row_value(row.get_ref(i)?));
                }
                buffered.push_back(values);
            }
            Ok(Executed::Rows(buffered))
        })
        .await?;
        match outcome {
            Executed::Rows(rows) => {
                let cursor = NativeCursorId(self.next_id());
                self.cursors.insert(cursor, rows);
                Ok(NativeExecution::Rows(cursor))
            }
            Executed::Affected(affected) => Ok(NativeExecution::UpdateCount(affected)),
        }
    }

    async fn fetch_next(
        &mut self,
        cursor: NativeCursorId,
    ) -> Result<Option<Vec<RowValues>>, NativeError> {
        self.ensure_open()?;
        let rows = self
            .cursors
            .get_mut(&cursor)
            .ok_or_else(|| NativeError::with_code(0, format!("cursor {} is closed", cursor.0)))?;
        Ok(rows.pop_front())
    }

    async fn close_cursor(&mut self, cursor: NativeCursorId) -> Result<(), NativeError> {
        self.cursors.remove(&cursor);
        Ok(())
    }

    async fn close_statement(&mut self, stmt: NativeStatementId) -> Result<(), NativeError> {
        self.statements.remove(&stmt);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        self.finish_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        self.finish_transaction("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        if self.closed {
            return Ok(());
        }
        let result = self.finish_transaction("ROLLBACK").await;
        self.statements.clear();
        self.cursors.clear();
        self.closed = true;
        result
    }
}
