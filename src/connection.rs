//! Grid-aware connection: statement registry, grid detection, element
//! tracking and the classification side effects shared by every
//! database-facing call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::classify::ErrorClass;
use crate::config::ConnectOptions;
use crate::error::{GridError, NativeError};
use crate::native::{NativeConnection, NativeConnector, NativeExecution};
use crate::statement::{Statement, StatementRef, StatementRole};
use crate::types::Dialect;

/// Column of the grid check row that carries the setting value.
const GRID_CHECK_VALUE_COLUMN: usize = 1;

/// One session against a (possibly) grid database.
///
/// A connection is used by a single worker at a time; parallelism comes
/// from opening more connections.
pub struct GridConnection {
    pub(crate) options: ConnectOptions,
    connector: Arc<dyn NativeConnector>,
    pub(crate) native: Option<Box<dyn NativeConnection>>,
    grid: bool,
    element_id: i32,
    pub(crate) statements: BTreeMap<StatementRole, Statement>,
    last_error: Option<GridError>,
}

impl fmt::Debug for GridConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridConnection")
            .field("options", &self.options)
            .field("open", &self.native.is_some())
            .field("grid", &self.grid)
            .field("element_id", &self.element_id)
            .field("statements", &self.statements.keys().collect::<Vec<_>>())
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl GridConnection {
    #[must_use]
    pub fn new(options: ConnectOptions, connector: Arc<dyn NativeConnector>) -> Self {
        Self {
            options,
            connector,
            native: None,
            grid: false,
            element_id: 0,
            statements: BTreeMap::new(),
            last_error: None,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.options.dialect
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.native.is_some()
    }

    #[must_use]
    pub fn is_grid(&self) -> bool {
        self.grid
    }

    /// ID of the element this session is attached to; 0 when not a grid.
    #[must_use]
    pub fn element_id(&self) -> i32 {
        self.element_id
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&GridError> {
        self.last_error.as_ref()
    }

    /// Registered statement roles, in registry order.
    pub fn statement_roles(&self) -> impl Iterator<Item = StatementRole> + '_ {
        self.statements.keys().copied()
    }

    pub(crate) fn record(&mut self, err: GridError) -> GridError {
        self.last_error = Some(err.clone());
        err
    }

    /// Open the native session, switch off auto-commit and detect the grid.
    ///
    /// Bootstrap failures are not classified: any native error closes the
    /// partially opened session and is returned as `Database`.
    ///
    /// # Errors
    /// `AlreadyOpen`, `Parameter` for bad credentials, or `Database`.
    pub async fn connect(&mut self) -> Result<(), GridError> {
        self.last_error = None;
        if self.native.is_some() {
            return Err(self.record(GridError::AlreadyOpen));
        }
        let descriptor = match self.options.descriptor() {
            Ok(d) => d,
            Err(e) => return Err(self.record(e)),
        };
        debug!(url = %descriptor.url, "opening connection");
        let native = match self.connector.open(&descriptor).await {
            Ok(native) => native,
            Err(e) => {
                warn!(url = %descriptor.url, error = %e, "connect failed");
                return Err(self.record(GridError::Database(e)));
            }
        };
        self.native = Some(native);

        if let Err(e) = self.bootstrap().await {
            warn!(url = %descriptor.url, error = %e, "connection bootstrap failed");
            self.teardown_after_failed_connect().await;
            return Err(self.record(GridError::Database(e)));
        }
        info!(
            url = %descriptor.url,
            grid = self.grid,
            element_id = self.element_id,
            "connected"
        );
        Ok(())
    }

    async fn bootstrap(&mut self) -> Result<(), NativeError> {
        let dialect = self.dialect();
        let native = self
            .native
            .as_mut()
            .ok_or_else(|| NativeError::with_code(0, "connection not open"))?;
        native.set_auto_commit(false).await?;

        let check = native.prepare(dialect.grid_check_sql()).await?;
        let execution = native.execute(check, &[]).await;
        let grid = match execution {
            Ok(NativeExecution::Rows(cursor)) => {
                let row = native.fetch_next(cursor).await;
                let _ = native.close_cursor(cursor).await;
                row?.and_then(|r| r.get(GRID_CHECK_VALUE_COLUMN).and_then(|v| v.as_text()))
                    .is_some_and(|v| v.trim() == "1")
            }
            Ok(NativeExecution::UpdateCount(_)) => false,
            Err(e) => {
                let _ = native.close_statement(check).await;
                return Err(e);
            }
        };
        native.close_statement(check).await?;

        if grid {
            let sql = dialect.element_id_sql();
            let handle = native.prepare(sql).await?;
            self.statements.insert(
                StatementRole::ElementId,
                Statement::new(StatementRole::ElementId, sql.to_owned(), handle),
            );
            self.grid = true;
            self.element_id = self.query_element_id().await?;
        }
        Ok(())
    }

    async fn query_element_id(&mut self) -> Result<i32, NativeError> {
        let native = self
            .native
            .as_mut()
            .ok_or_else(|| NativeError::with_code(0, "connection not open"))?;
        let handle = self
            .statements
            .get(&StatementRole::ElementId)
            .and_then(|s| s.native)
            .ok_or_else(|| NativeError::with_code(0, "element id statement not prepared"))?;
        let NativeExecution::Rows(cursor) = native.execute(handle, &[]).await? else {
            return Err(NativeError::with_code(0, "element id query returned no rows"));
        };
        let row = native.fetch_next(cursor).await;
        let _ = native.close_cursor(cursor).await;
        row?.and_then(|r| r.first().and_then(|v| v.as_int()))
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| NativeError::with_code(0, "element id query returned no value"))
    }

    async fn teardown_after_failed_connect(&mut self) {
        if let Some(mut native) = self.native.take() {
            for stmt in std::mem::take(&mut self.statements).into_values() {
                if let Some(handle) = stmt.native {
                    let _ = native.close_statement(handle).await;
                }
            }
            let _ = native.close().await;
        }
        self.grid = false;
        self.element_id = 0;
    }

    /// Re-read the element ID after a failover.
    ///
    /// # Errors
    /// `NotOpen`, `NotGrid`, or a classified native error.
    pub async fn refresh_element_id(&mut self) -> Result<i32, GridError> {
        if self.native.is_none() {
            return Err(self.record(GridError::NotOpen));
        }
        if !self.grid {
            return Err(self.record(GridError::NotGrid));
        }
        let mut stmt = self.statement(StatementRole::ElementId)?;
        stmt.execute().await?;
        let mut rs = stmt.result_set()?;
        if !rs.next().await? {
            rs.close().await;
            return Err(self.record(GridError::NoResults));
        }
        let id = rs.get_int(0);
        rs.close().await;
        let id = match id {
            Ok(id) => id,
            Err(e) => return Err(self.record(e)),
        };
        self.element_id = id;
        Ok(id)
    }

    /// Prepare `sql` and register it under `role`.
    ///
    /// # Errors
    /// `DuplicateLabel` while `role` is registered, `NotOpen`, or a
    /// classified native error.
    pub async fn prepare(
        &mut self,
        role: StatementRole,
        sql: &str,
    ) -> Result<StatementRef<'_>, GridError> {
        self.last_error = None;
        if self.statements.contains_key(&role) {
            return Err(self.record(GridError::DuplicateLabel(role)));
        }
        let Some(native) = self.native.as_mut() else {
            return Err(self.record(GridError::NotOpen));
        };
        match native.prepare(sql).await {
            Ok(handle) => {
                self.statements
                    .insert(role, Statement::new(role, sql.to_owned(), handle));
                Ok(StatementRef { conn: self, role })
            }
            Err(e) => {
                debug!(statement = %role, error = %e, "prepare failed");
                Err(self.absorb(e).await)
            }
        }
    }

    /// Access a registered statement.
    ///
    /// # Errors
    /// `State` if `role` is not registered.
    pub fn statement(&mut self, role: StatementRole) -> Result<StatementRef<'_>, GridError> {
        if !self.statements.contains_key(&role) {
            return Err(self.record(GridError::State(format!(
                "statement {role} is not registered"
            ))));
        }
        Ok(StatementRef { conn: self, role })
    }

    /// Release a statement and remove it from the registry. Idempotent.
    pub async fn close_statement(&mut self, role: StatementRole) {
        let Some(stmt) = self.statements.remove(&role) else {
            return;
        };
        if let Some(native) = self.native.as_mut() {
            if let Some(rs) = stmt.result {
                let _ = native.close_cursor(rs.cursor).await;
            }
            if let Some(handle) = stmt.native {
                if let Err(e) = native.close_statement(handle).await {
                    debug!(statement = %role, error = %e, "close statement failed");
                }
            }
        }
    }

    /// Re-prepare every registered statement from its stored SQL.
    ///
    /// Stops at the first failure and returns `false`. The failed statement
    /// is left without a native handle; statements after it keep their
    /// previous handle until the next reprepare.
    pub async fn reprepare_all(&mut self) -> bool {
        self.last_error = None;
        if self.native.is_none() {
            self.record(GridError::NotOpen);
            return false;
        }
        let roles: Vec<StatementRole> = self.statements.keys().copied().collect();
        for role in roles {
            let Some(native) = self.native.as_mut() else {
                self.record(GridError::NotOpen);
                return false;
            };
            let Some(stmt) = self.statements.get_mut(&role) else {
                continue;
            };
            if let Some(rs) = stmt.result.take() {
                let _ = native.close_cursor(rs.cursor).await;
            }
            if let Some(handle) = stmt.native.take() {
                let _ = native.close_statement(handle).await;
            }
            stmt.update_count = None;
            match native.prepare(&stmt.sql).await {
                Ok(handle) => stmt.native = Some(handle),
                Err(e) => {
                    warn!(statement = %role, error = %e, "reprepare failed");
                    let err = self.absorb(e).await;
                    if let Some(stmt) = self.statements.get_mut(&role) {
                        stmt.last_error = Some(err);
                    }
                    return false;
                }
            }
        }
        debug!(count = self.statements.len(), "statements reprepared");
        true
    }

    pub(crate) async fn close_result_set(&mut self, role: StatementRole) {
        let Some(rs) = self
            .statements
            .get_mut(&role)
            .and_then(|s| s.result.take())
        else {
            return;
        };
        if let Some(native) = self.native.as_mut() {
            if let Err(e) = native.close_cursor(rs.cursor).await {
                debug!(statement = %role, error = %e, "close cursor failed");
            }
        }
    }

    /// Close every open result set; commit and rollback invalidate cursors.
    pub(crate) async fn close_all_result_sets(&mut self) {
        let Some(native) = self.native.as_mut() else {
            return;
        };
        for stmt in self.statements.values_mut() {
            if let Some(rs) = stmt.result.take() {
                let _ = native.close_cursor(rs.cursor).await;
            }
        }
    }

    /// Commit the current transaction.
    ///
    /// Open result sets are closed before the native commit.
    ///
    /// # Errors
    /// `NotOpen`, or a classified native error: retryable and failover
    /// errors roll back, fatal errors close the connection.
    pub async fn commit(&mut self) -> Result<(), GridError> {
        self.last_error = None;
        if self.native.is_none() {
            return Err(self.record(GridError::NotOpen));
        }
        self.close_all_result_sets().await;
        let Some(native) = self.native.as_mut() else {
            return Err(self.record(GridError::NotOpen));
        };
        match native.commit().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "commit failed");
                Err(self.absorb(e).await)
            }
        }
    }

    /// Commit, reporting only success; the error stays in `last_error`.
    pub async fn commit_quietly(&mut self) -> bool {
        self.commit().await.is_ok()
    }

    /// Roll back the current transaction, swallowing errors.
    ///
    /// A fatal rollback failure still closes the connection.
    pub async fn rollback(&mut self) -> bool {
        self.last_error = None;
        if self.native.is_none() {
            self.record(GridError::NotOpen);
            return false;
        }
        self.close_all_result_sets().await;
        let Some(native) = self.native.as_mut() else {
            return false;
        };
        match native.rollback().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "rollback failed");
                if e.class() == ErrorClass::Fatal {
                    self.close(true).await;
                    self.record(GridError::Fatal { source: e });
                } else {
                    self.record(GridError::Database(e));
                }
                false
            }
        }
    }

    /// Close the connection, optionally rolling back first.
    ///
    /// Idempotent: closing a closed connection succeeds without touching
    /// the driver.
    pub async fn close(&mut self, rollback_first: bool) -> bool {
        let Some(mut native) = self.native.take() else {
            return true;
        };
        if rollback_first {
            for stmt in self.statements.values_mut() {
                if let Some(rs) = stmt.result.take() {
                    let _ = native.close_cursor(rs.cursor).await;
                }
            }
            if let Err(e) = native.rollback().await {
                debug!(error = %e, "rollback before close failed");
            }
        }
        for stmt in std::mem::take(&mut self.statements).into_values() {
            if let Some(rs) = stmt.result {
                let _ = native.close_cursor(rs.cursor).await;
            }
            if let Some(handle) = stmt.native {
                let _ = native.close_statement(handle).await;
            }
        }
        self.grid = false;
        self.element_id = 0;
        match native.close().await {
            Ok(()) => {
                debug!("connection closed");
                true
            }
            Err(e) => {
                debug!(error = %e, "close failed");
                self.record(GridError::Database(e));
                false
            }
        }
    }

    /// Apply the side effects of a native error's class and wrap it.
    ///
    /// Fatal errors tear the connection down; retryable and failover errors
    /// roll the current transaction back; ordinary errors are only recorded.
    pub(crate) async fn absorb(&mut self, err: NativeError) -> GridError {
        let delays = self.options.delays;
        let wrapped = match err.class() {
            ErrorClass::Fatal => {
                error!(error = %err, element_id = self.element_id, "element invalidated; closing connection");
                self.close(true).await;
                GridError::Fatal { source: err }
            }
            ErrorClass::ClientFailover => {
                info!(error = %err, "client connection failover");
                self.rollback_after_error().await;
                GridError::ClientFailover {
                    source: err,
                    delay: delays.failover,
                }
            }
            ErrorClass::GridRetryable => {
                info!(error = %err, "grid retryable error");
                self.rollback_after_error().await;
                GridError::GridRetryable {
                    source: err,
                    delay: delays.grid_retry,
                }
            }
            ErrorClass::Ordinary => GridError::Database(err),
        };
        self.record(wrapped)
    }

    async fn rollback_after_error(&mut self) {
        self.close_all_result_sets().await;
        if let Some(native) = self.native.as_mut() {
            if let Err(e) = native.rollback().await {
                debug!(error = %e, "rollback after error failed");
            }
        }
    }
}
