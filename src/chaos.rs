//! Fault injection around any native driver.
//!
//! [`ChaosConnector`] makes an ordinary database look like a grid that is
//! busy reconfiguring: it answers the grid check as "grid", reports an
//! element ID, and fails executes and commits with grid-retryable,
//! client-failover and element-invalidation errors at configured rates.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

use crate::error::{GridError, NativeError};
use crate::native::{
    ConnectDescriptor, NativeConnection, NativeConnector, NativeCursorId, NativeExecution,
    NativeStatementId,
};
use crate::types::{Dialect, RowValues};

const DIALECTS: [Dialect; 2] = [Dialect::TimesTen, Dialect::Sqlite];

const TRANSIENT_STATE: &str = "TT005";
const DEADLOCK_CODE: i32 = 6002;
const LOCK_TIMEOUT_CODE: i32 = 6003;
const FAILOVER_CODE: i32 = 47137;
const INVALIDATED_CODE: i32 = 994;

/// Injection rates, each a probability per execute or commit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChaosOptions {
    pub seed: u64,
    pub grid_retry_rate: f64,
    pub failover_rate: f64,
    pub fatal_rate: f64,
    /// Number of elements the session rotates through on failover
    pub elements: i32,
}

impl Default for ChaosOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            grid_retry_rate: 0.02,
            failover_rate: 0.002,
            fatal_rate: 0.0,
            elements: 3,
        }
    }
}

impl ChaosOptions {
    /// # Errors
    /// `Parameter` if a rate is outside `0..=1`, the rates sum past 1, or
    /// there are no elements.
    pub fn validate(&self) -> Result<(), GridError> {
        let rates = [self.grid_retry_rate, self.failover_rate, self.fatal_rate];
        if rates.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(GridError::Parameter(
                "chaos rates must be between 0 and 1".into(),
            ));
        }
        if rates.iter().sum::<f64>() > 1.0 {
            return Err(GridError::Parameter(
                "chaos rates must not sum past 1".into(),
            ));
        }
        if self.elements < 1 {
            return Err(GridError::Parameter(
                "chaos needs at least one element".into(),
            ));
        }
        Ok(())
    }
}

/// Wraps a connector so every session it opens injects faults.
pub struct ChaosConnector {
    inner: Arc<dyn NativeConnector>,
    opts: ChaosOptions,
    sessions: AtomicU64,
}

impl ChaosConnector {
    /// # Errors
    /// See [`ChaosOptions::validate`].
    pub fn new(inner: Arc<dyn NativeConnector>, opts: ChaosOptions) -> Result<Self, GridError> {
        opts.validate()?;
        Ok(Self {
            inner,
            opts,
            sessions: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn options(&self) -> &ChaosOptions {
        &self.opts
    }
}

#[async_trait]
impl NativeConnector for ChaosConnector {
    async fn open(
        &self,
        descriptor: &ConnectDescriptor,
    ) -> Result<Box<dyn NativeConnection>, NativeError> {
        let inner = self.inner.open(descriptor).await?;
        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        let element_id = i32::try_from(session % self.opts.elements.unsigned_abs() as u64)
            .unwrap_or(0)
            + 1;
        debug!(session, element_id, "chaos session opened");
        Ok(Box::new(ChaosConnection {
            inner,
            opts: self.opts,
            rng: ChaCha8Rng::seed_from_u64(self.opts.seed.wrapping_add(session)),
            statements: HashMap::new(),
            cursors: HashMap::new(),
            next_id: 1,
            element_id,
            generation: 0,
            invalidated: false,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum ChaosStatement {
    Inner {
        handle: NativeStatementId,
        generation: u64,
    },
    GridCheck,
    ElementId,
}

#[derive(Debug)]
enum ChaosCursor {
    Inner(NativeCursorId),
    Synthetic(VecDeque<Vec<RowValues>>),
}

enum Fault {
    Retry(NativeError),
    Failover,
    Fatal,
}

struct ChaosConnection {
    inner: Box<dyn NativeConnection>,
    opts: ChaosOptions,
    rng: ChaCha8Rng,
    statements: HashMap<NativeStatementId, ChaosStatement>,
    cursors: HashMap<NativeCursorId, ChaosCursor>,
    next_id: u64,
    element_id: i32,
    generation: u64,
    invalidated: bool,
}

fn invalidated_error(element_id: i32) -> NativeError {
    NativeError::with_code(
        INVALIDATED_CODE,
        format!("element {element_id} has been invalidated"),
    )
}

fn failover_error(element_id: i32) -> NativeError {
    NativeError::new(
        Some("08006"),
        FAILOVER_CODE,
        format!("client connection failed over to element {element_id}"),
    )
}

impl ChaosConnection {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_valid(&self) -> Result<(), NativeError> {
        if self.invalidated {
            return Err(invalidated_error(self.element_id));
        }
        Ok(())
    }

    fn roll_fault(&mut self) -> Option<Fault> {
        let roll: f64 = self.rng.random();
        let mut bound = self.opts.fatal_rate;
        if roll < bound {
            return Some(Fault::Fatal);
        }
        bound += self.opts.failover_rate;
        if roll < bound {
            return Some(Fault::Failover);
        }
        bound += self.opts.grid_retry_rate;
        if roll < bound {
            let err = match self.rng.random_range(0..3) {
                0 => NativeError::new(Some(TRANSIENT_STATE), 0, "transient grid error"),
                1 => NativeError::with_code(DEADLOCK_CODE, "deadlock detected"),
                _ => NativeError::with_code(LOCK_TIMEOUT_CODE, "lock request timed out"),
            };
            return Some(Fault::Retry(err));
        }
        None
    }

    /// Apply a rolled fault; the session's open work is lost either way.
    async fn inject(&mut self) -> Result<(), NativeError> {
        let Some(fault) = self.roll_fault() else {
            return Ok(());
        };
        match fault {
            Fault::Retry(err) => {
                debug!(error = %err, "injecting grid retryable error");
                Err(err)
            }
            Fault::Failover => {
                let _ = self.inner.rollback().await;
                self.drop_cursors().await;
                self.generation += 1;
                self.element_id = self.element_id % self.opts.elements + 1;
                debug!(element_id = self.element_id, "injecting client failover");
                Err(failover_error(self.element_id))
            }
            Fault::Fatal => {
                let _ = self.inner.rollback().await;
                self.drop_cursors().await;
                self.invalidated = true;
                debug!(element_id = self.element_id, "injecting element invalidation");
                Err(invalidated_error(self.element_id))
            }
        }
    }

    async fn drop_cursors(&mut self) {
        for (_, cursor) in self.cursors.drain() {
            if let ChaosCursor::Inner(handle) = cursor {
                let _ = self.inner.close_cursor(handle).await;
            }
        }
    }

    fn synthetic_rows(&mut self, rows: Vec<Vec<RowValues>>) -> NativeExecution {
        let cursor = NativeCursorId(self.next_id());
        self.cursors
            .insert(cursor, ChaosCursor::Synthetic(rows.into()));
        NativeExecution::Rows(cursor)
    }
}

#[async_trait]
impl NativeConnection for ChaosConnection {
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), NativeError> {
        self.check_valid()?;
        self.inner.set_auto_commit(enabled).await
    }

    async fn prepare(&mut self, sql: &str) -> Result<NativeStatementId, NativeError> {
        self.check_valid()?;
        let stmt = if DIALECTS.iter().any(|d| d.grid_check_sql() == sql) {
            ChaosStatement::GridCheck
        } else if DIALECTS.iter().any(|d| d.element_id_sql() == sql) {
            ChaosStatement::ElementId
        } else {
            ChaosStatement::Inner {
                handle: self.inner.prepare(sql).await?,
                generation: self.generation,
            }
        };
        let id = NativeStatementId(self.next_id());
        self.statements.insert(id, stmt);
        Ok(id)
    }

    async fn execute(
        &mut self,
        stmt: NativeStatementId,
        params: &[RowValues],
    ) -> Result<NativeExecution, NativeError> {
        self.check_valid()?;
        let Some(target) = self.statements.get(&stmt).copied() else {
            return Err(NativeError::with_code(0, format!("unknown statement {}", stmt.0)));
        };
        match target {
            ChaosStatement::GridCheck => Ok(self.synthetic_rows(vec![vec![
                RowValues::Text("TTGridEnable".into()),
                RowValues::Text("1".into()),
            ]])),
            ChaosStatement::ElementId => {
                let id = i64::from(self.element_id);
                Ok(self.synthetic_rows(vec![vec![RowValues::Int(id)]]))
            }
            ChaosStatement::Inner { handle, generation } => {
                if generation != self.generation {
                    return Err(failover_error(self.element_id));
                }
                self.inject().await?;
                match self.inner.execute(handle, params).await? {
                    NativeExecution::Rows(inner) => {
                        let cursor = NativeCursorId(self.next_id());
                        self.cursors.insert(cursor, ChaosCursor::Inner(inner));
                        Ok(NativeExecution::Rows(cursor))
                    }
                    count @ NativeExecution::UpdateCount(_) => Ok(count),
                }
            }
        }
    }

    async fn fetch_next(
        &mut self,
        cursor: NativeCursorId,
    ) -> Result<Option<Vec<RowValues>>, NativeError> {
        self.check_valid()?;
        match self.cursors.get_mut(&cursor) {
            Some(ChaosCursor::Synthetic(rows)) => Ok(rows.pop_front()),
            Some(ChaosCursor::Inner(handle)) => {
                let handle = *handle;
                self.inner.fetch_next(handle).await
            }
            None => Err(NativeError::with_code(0, format!("cursor {} is closed", cursor.0))),
        }
    }

    async fn close_cursor(&mut self, cursor: NativeCursorId) -> Result<(), NativeError> {
        match self.cursors.remove(&cursor) {
            Some(ChaosCursor::Inner(handle)) => self.inner.close_cursor(handle).await,
            _ => Ok(()),
        }
    }

    async fn close_statement(&mut self, stmt: NativeStatementId) -> Result<(), NativeError> {
        match self.statements.remove(&stmt) {
            Some(ChaosStatement::Inner { handle, .. }) => self.inner.close_statement(handle).await,
            _ => Ok(()),
        }
    }

    async fn commit(&mut self) -> Result<(), NativeError> {
        self.check_valid()?;
        self.inject().await?;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), NativeError> {
        self.check_valid()?;
        self.inner.rollback().await
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        self.cursors.clear();
        self.statements.clear();
        self.inner.close().await
    }
}
