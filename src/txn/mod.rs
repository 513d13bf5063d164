//! The sample's units of work.
//!
//! Every transaction follows the same lifecycle: `init` prepares the
//! statements it needs, input setters validate their arguments without
//! touching the database, `execute` runs one round inside a single native
//! transaction, `close` releases a result set between rounds and `cleanup`
//! releases the statements.

mod adjust;
mod authorize;
mod clear_history;
mod get_counts;
mod purge;
mod query;

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::connection::GridConnection;
use crate::error::GridError;
use crate::statement::StatementRole;

pub use adjust::{BalanceOp, Charge, Topup};
pub use authorize::{ACCOUNT_STATUS_ACTIVE, ACCOUNT_TYPE_PREPAID, Authorize};
pub use clear_history::ClearHistory;
pub use get_counts::{GetCounts, TableCounts};
pub use purge::Purge;
pub use query::Query;

/// The kinds of transaction the workload can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum TxnKind {
    GetCounts,
    ClearHistory,
    Authorize,
    Query,
    Charge,
    Topup,
    Purge,
}

impl TxnKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TxnKind::GetCounts => "GetCounts",
            TxnKind::ClearHistory => "ClearHistory",
            TxnKind::Authorize => "Authorize",
            TxnKind::Query => "Query",
            TxnKind::Charge => "Charge",
            TxnKind::Topup => "Topup",
            TxnKind::Purge => "Purge",
        }
    }
}

impl fmt::Display for TxnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a successful round produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutput {
    /// The round finished; `rows` is the DML row count, if any
    Done { rows: u64 },
    /// The round left a result set open on this statement for the caller to drain
    Rows(StatementRole),
}

/// Lifecycle of a transaction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Uninitialized,
    Ready,
    Executing,
    Closed,
}

/// Bookkeeping every transaction carries.
#[derive(Debug, Clone)]
pub struct TxnStatus {
    pub state: TxnState,
    pub row_count: u64,
    pub last_error: Option<GridError>,
}

impl Default for TxnStatus {
    fn default() -> Self {
        Self {
            state: TxnState::Uninitialized,
            row_count: 0,
            last_error: None,
        }
    }
}

#[async_trait]
pub trait Transaction: Send {
    fn kind(&self) -> TxnKind;

    /// Statements prepared by `init`, in preparation order.
    fn roles(&self) -> Vec<StatementRole>;

    fn status(&self) -> &TxnStatus;

    fn status_mut(&mut self) -> &mut TxnStatus;

    /// Run one round. Called by [`Transaction::execute`] once the
    /// transaction is ready.
    async fn run(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError>;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Whether `execute` leaves a result set open for the caller.
    fn returns_rows(&self) -> bool {
        false
    }

    fn row_count(&self) -> u64 {
        self.status().row_count
    }

    fn last_error(&self) -> Option<&GridError> {
        self.status().last_error.as_ref()
    }

    fn state(&self) -> TxnState {
        self.status().state
    }

    /// (Re)prepare every statement. Statements held from an earlier `init`
    /// are released first; a partial failure releases what was prepared.
    async fn init(&mut self, conn: &mut GridConnection) -> Result<(), GridError> {
        let roles = self.roles();
        release_all(conn, &roles).await;
        let result = prepare_all(conn, &roles).await;
        let status = self.status_mut();
        match result {
            Ok(()) => {
                status.state = TxnState::Ready;
                status.last_error = None;
                Ok(())
            }
            Err(e) => {
                status.state = TxnState::Uninitialized;
                status.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Execute one round, recording the outcome.
    async fn execute(&mut self, conn: &mut GridConnection) -> Result<TxnOutput, GridError> {
        if !matches!(self.state(), TxnState::Ready) {
            let err = GridError::State(format!("{} is not initialized", self.name()));
            self.status_mut().last_error = Some(err.clone());
            return Err(err);
        }
        self.status_mut().state = TxnState::Executing;
        self.status_mut().last_error = None;
        let result = self.run(conn).await;
        let name = self.name();
        let status = self.status_mut();
        status.state = TxnState::Ready;
        match &result {
            Ok(TxnOutput::Done { rows }) => status.row_count = *rows,
            Ok(TxnOutput::Rows(_)) => status.row_count = 0,
            Err(e) => {
                debug!(txn = name, error = %e, "transaction round failed");
                status.last_error = Some(e.clone());
            }
        }
        result
    }

    /// Release an open result set without discarding statements.
    async fn close(&mut self, conn: &mut GridConnection) {
        for role in self.roles() {
            conn.close_result_set(role).await;
        }
    }

    /// Release every statement. Safe to call repeatedly.
    async fn cleanup(&mut self, conn: &mut GridConnection) {
        release_all(conn, &self.roles()).await;
        self.status_mut().state = TxnState::Closed;
    }
}

/// Prepare `roles` in order; on failure release the ones already prepared.
pub(crate) async fn prepare_all(
    conn: &mut GridConnection,
    roles: &[StatementRole],
) -> Result<(), GridError> {
    let dialect = conn.dialect();
    for (i, role) in roles.iter().enumerate() {
        let Some(sql) = role.sql(dialect) else {
            release_all(conn, &roles[..i]).await;
            return Err(GridError::Parameter(format!("no SQL text for {role}")));
        };
        if let Err(e) = conn.prepare(*role, sql).await {
            debug!(statement = %role, error = %e, "init failed; releasing prepared statements");
            release_all(conn, &roles[..i]).await;
            return Err(e);
        }
    }
    Ok(())
}

pub(crate) async fn release_all(conn: &mut GridConnection, roles: &[StatementRole]) {
    for role in roles {
        conn.close_statement(*role).await;
    }
}

/// Execute a DML statement and check it touched exactly one row.
pub(crate) async fn execute_single_row(
    conn: &mut GridConnection,
    role: StatementRole,
) -> Result<(), GridError> {
    let mut stmt = conn.statement(role)?;
    stmt.execute().await?;
    let actual = stmt.update_count().unwrap_or(0);
    if actual != 1 {
        return Err(GridError::RowCountMismatch {
            expected: 1,
            actual,
        });
    }
    Ok(())
}

/// Roll back after a failed round. Recoverable and fatal errors already
/// had their side effects applied at the point they were raised.
pub(crate) async fn rollback_on_failure(conn: &mut GridConnection, err: &GridError) {
    if !err.is_recoverable() && !err.is_fatal() && conn.is_open() {
        conn.rollback().await;
    }
}
