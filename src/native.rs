//! The seam between the grid wrappers and a concrete database driver.
//!
//! Drivers own their native statements and cursors; the wrappers only hold
//! the opaque IDs handed out here. Every failure is reported as a
//! [`NativeError`] triple.

use async_trait::async_trait;

use crate::error::NativeError;
use crate::types::RowValues;

/// Opaque handle to a statement prepared on a [`NativeConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeStatementId(pub u64);

/// Opaque handle to an open cursor on a [`NativeConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeCursorId(pub u64);

/// What a statement execution produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeExecution {
    /// The statement produced rows, readable through the cursor
    Rows(NativeCursorId),
    /// The statement modified this many rows
    UpdateCount(u64),
}

/// Everything a driver needs to open a session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectDescriptor {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectDescriptor")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Opens native sessions.
#[async_trait]
pub trait NativeConnector: Send + Sync {
    async fn open(
        &self,
        descriptor: &ConnectDescriptor,
    ) -> Result<Box<dyn NativeConnection>, NativeError>;
}

/// One native session. Used strictly sequentially by its owner.
#[async_trait]
pub trait NativeConnection: Send {
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), NativeError>;

    async fn prepare(&mut self, sql: &str) -> Result<NativeStatementId, NativeError>;

    /// Execute a prepared statement with the given positional parameters.
    async fn execute(
        &mut self,
        stmt: NativeStatementId,
        params: &[RowValues],
    ) -> Result<NativeExecution, NativeError>;

    /// Next row of a cursor, `None` once exhausted.
    async fn fetch_next(
        &mut self,
        cursor: NativeCursorId,
    ) -> Result<Option<Vec<RowValues>>, NativeError>;

    async fn close_cursor(&mut self, cursor: NativeCursorId) -> Result<(), NativeError>;

    async fn close_statement(&mut self, stmt: NativeStatementId) -> Result<(), NativeError>;

    async fn commit(&mut self) -> Result<(), NativeError>;

    async fn rollback(&mut self) -> Result<(), NativeError>;

    async fn close(&mut self) -> Result<(), NativeError>;
}
