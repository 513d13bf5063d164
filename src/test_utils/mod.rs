//! Scripted native driver for tests.
//!
//! [`MockDb`] is a handle onto shared driver state: tests script rows,
//! update counts and faults on it, hand [`MockDb::connector`] to a
//! `GridConnection`, and then inspect the log of native calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::NativeError;
use crate::native::{
    ConnectDescriptor, NativeConnection, NativeConnector, NativeCursorId, NativeExecution,
    NativeStatementId,
};
use crate::types::{Dialect, RowValues};

const DIALECTS: [Dialect; 2] = [Dialect::TimesTen, Dialect::Sqlite];

/// One native call, as seen by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Open(String),
    SetAutoCommit(bool),
    Prepare(String),
    Execute { sql: String, params: Vec<RowValues> },
    Fetch(NativeCursorId),
    CloseCursor(NativeCursorId),
    CloseStatement(String),
    Commit,
    Rollback,
    Close,
}

/// Native operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Open,
    Prepare,
    Execute,
    Fetch,
    Commit,
    Rollback,
}

#[derive(Debug)]
struct Fault {
    op: MockOp,
    pattern: Option<String>,
    error: NativeError,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    rows: Vec<(String, Vec<Vec<RowValues>>)>,
    update_counts: Vec<(String, u64)>,
    faults: VecDeque<Fault>,
    grid: bool,
    element_id: i32,
    next_id: u64,
    statements: HashMap<NativeStatementId, String>,
    cursors: HashMap<NativeCursorId, VecDeque<Vec<RowValues>>>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Remove and return the first fault queued for `op` whose pattern
    /// matches `sql`.
    fn take_fault(&mut self, op: MockOp, sql: &str) -> Option<NativeError> {
        let pos = self.faults.iter().position(|f| {
            f.op == op && f.pattern.as_deref().is_none_or(|p| sql.contains(p))
        })?;
        self.faults.remove(pos).map(|f| f.error)
    }

    fn execution_for(&mut self, sql: &str) -> NativeExecution {
        let rows = if DIALECTS.iter().any(|d| d.grid_check_sql() == sql) {
            let flag = if self.grid { "1" } else { "0" };
            Some(vec![vec![
                RowValues::Text("TTGridEnable".into()),
                RowValues::Text(flag.into()),
            ]])
        } else if DIALECTS.iter().any(|d| d.element_id_sql() == sql) {
            Some(vec![vec![RowValues::Int(i64::from(self.element_id))]])
        } else if let Some((_, rows)) = self.rows.iter().find(|(p, _)| sql.contains(p.as_str())) {
            Some(rows.clone())
        } else if let Some((_, n)) = self.update_counts.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return NativeExecution::UpdateCount(*n);
        } else if is_query(sql) {
            Some(Vec::new())
        } else {
            None
        };
        match rows {
            Some(rows) => {
                let cursor = NativeCursorId(self.next_id());
                self.cursors.insert(cursor, rows.into());
                NativeExecution::Rows(cursor)
            }
            None => NativeExecution::UpdateCount(1),
        }
    }
}

fn is_query(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_lowercase();
    head.starts_with("select") || head.starts_with("call")
}

/// Shared handle onto a scripted database.
#[derive(Debug, Clone, Default)]
pub struct MockDb {
    state: Arc<Mutex<MockState>>,
}

impl MockDb {
    /// A non-grid database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A grid database whose sessions report `element_id`.
    #[must_use]
    pub fn grid(element_id: i32) -> Self {
        let db = Self::default();
        {
            let mut state = db.lock();
            state.grid = true;
            state.element_id = element_id;
        }
        db
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn connector(&self) -> Arc<dyn NativeConnector> {
        Arc::new(MockConnector { db: self.clone() })
    }

    /// Element ID reported from now on, e.g. after a failover.
    pub fn set_element_id(&self, element_id: i32) {
        self.lock().element_id = element_id;
    }

    /// Rows returned by every statement whose SQL contains `pattern`.
    pub fn set_rows(&self, pattern: &str, rows: Vec<Vec<RowValues>>) {
        let mut state = self.lock();
        state.rows.retain(|(p, _)| p != pattern);
        state.rows.push((pattern.to_owned(), rows));
    }

    /// Update count returned by every DML statement whose SQL contains
    /// `pattern`.
    pub fn set_update_count(&self, pattern: &str, count: u64) {
        let mut state = self.lock();
        state.update_counts.retain(|(p, _)| p != pattern);
        state.update_counts.push((pattern.to_owned(), count));
    }

    /// Fail the next `op`, optionally only on SQL containing `pattern`.
    /// Faults are consumed in the order they were queued.
    pub fn fail_next(&self, op: MockOp, pattern: Option<&str>, error: NativeError) {
        self.lock().faults.push_back(Fault {
            op,
            pattern: pattern.map(str::to_owned),
            error,
        });
    }

    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Parameters of every execution of SQL containing `pattern`.
    #[must_use]
    pub fn executions(&self, pattern: &str) -> Vec<Vec<RowValues>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Execute { sql, params } if sql.contains(pattern) => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of logged calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Number of prepares of SQL containing `pattern`.
    #[must_use]
    pub fn prepares(&self, pattern: &str) -> usize {
        self.count(|c| matches!(c, MockCall::Prepare(sql) if sql.contains(pattern)))
    }
}

/// Connector handed out by [`MockDb::connector`].
#[derive(Debug)]
pub struct MockConnector {
    db: MockDb,
}

#[async_trait]
impl NativeConnector for MockConnector {
    async fn open(
        &self,
        descriptor: &ConnectDescriptor,
    ) -> Result<Box<dyn NativeConnection>, NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::Open(descriptor.url.clone()));
        if let Some(err) = state.take_fault(MockOp::Open, &descriptor.url) {
            return Err(err);
        }
        Ok(Box::new(MockConnection {
            db: self.db.clone(),
        }))
    }
}

struct MockConnection {
    db: MockDb,
}

#[async_trait]
impl NativeConnection for MockConnection {
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), NativeError> {
        self.db.lock().calls.push(MockCall::SetAutoCommit(enabled));
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> Result<NativeStatementId, NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::Prepare(sql.to_owned()));
        if let Some(err) = state.take_fault(MockOp::Prepare, sql) {
            return Err(err);
        }
        let id = NativeStatementId(state.next_id());
        state.statements.insert(id, sql.to_owned());
        Ok(id)
    }

    async fn execute(
        &mut self,
        stmt: NativeStatementId,
        params: &[RowValues],
    ) -> Result<NativeExecution, NativeError> {
        let mut state = self.db.lock();
        let sql = state
            .statements
            .get(&stmt)
            .cloned()
            .ok_or_else(|| NativeError::with_code(0, format!("unknown statement {}", stmt.0)))?;
        state.calls.push(MockCall::Execute {
            sql: sql.clone(),
            params: params.to_vec(),
        });
        if let Some(err) = state.take_fault(MockOp::Execute, &sql) {
            return Err(err);
        }
        Ok(state.execution_for(&sql))
    }

    async fn fetch_next(
        &mut self,
        cursor: NativeCursorId,
    ) -> Result<Option<Vec<RowValues>>, NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::Fetch(cursor));
        if let Some(err) = state.take_fault(MockOp::Fetch, "") {
            return Err(err);
        }
        let rows = state
            .cursors
            .get_mut(&cursor)
            .ok_or_else(|| NativeError::with_code(0, format!("cursor {} is closed", cursor.0)))?;
        Ok(rows.pop_front())
    }

    async fn close_cursor(&mut self, cursor: NativeCursorId) -> Result<(), NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::CloseCursor(cursor));
        state.cursors.remove(&cursor);
        Ok(())
    }

    async fn close_statement(&mut self, stmt: NativeStatementId) -> Result<(), NativeError> {
        let mut state = self.db.lock();
        let sql = state.statements.remove(&stmt).unwrap_or_default();
        state.calls.push(MockCall::CloseStatement(sql));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::Commit);
        match state.take_fault(MockOp::Commit, "") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::Rollback);
        match state.take_fault(MockOp::Rollback, "") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        let mut state = self.db.lock();
        state.calls.push(MockCall::Close);
        state.cursors.clear();
        Ok(())
    }
}
