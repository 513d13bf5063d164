//! Bounded retry of one transaction attempt.
//!
//! Grid-retryable errors are retried on the same connection; client
//! failovers re-prepare every statement before the next try. Both have
//! their own budget, reset at the start of every attempt. Everything else
//! ends the attempt.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::stats::Statistics;
use crate::txn::{Transaction, TxnOutput};

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The transaction completed; `rows` is its DML row count or the
    /// number of rows drained from its result set
    Succeeded { rows: u64 },
    /// A non-retryable error ended the attempt
    Failed(GridError),
    /// One of the retry budgets ran out
    RetriesExhausted,
    /// Statements could not be re-prepared after a failover
    ReprepareFailed(Option<GridError>),
    /// The element was invalidated and the connection closed
    ConnectionLost(GridError),
    /// Shutdown was requested before the attempt could finish
    Cancelled,
}

impl AttemptOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded { .. })
    }

    /// Whether the connection can no longer be used.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::ConnectionLost(_) | AttemptOutcome::ReprepareFailed(_)
        )
    }
}

/// Outcome of an attempt plus what it took to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub outcome: AttemptOutcome,
    pub grid_retries: u32,
    pub failovers: u32,
    pub reprepares: u32,
    /// `(from, to)` element IDs observed after each successful reprepare
    pub element_changes: Vec<(i32, i32)>,
}

impl AttemptReport {
    fn new() -> Self {
        Self {
            outcome: AttemptOutcome::RetriesExhausted,
            grid_retries: 0,
            failovers: 0,
            reprepares: 0,
            element_changes: Vec::new(),
        }
    }

    fn finish(mut self, outcome: AttemptOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Runs transaction attempts under the configured retry budgets.
#[derive(Debug, Clone)]
pub struct RetryDriver {
    config: RetryConfig,
    commit_read_only: bool,
}

impl RetryDriver {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            commit_read_only: false,
        }
    }

    /// Commit after draining the result set of a read-only transaction.
    #[must_use]
    pub fn commit_read_only(mut self, enabled: bool) -> Self {
        self.commit_read_only = enabled;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run one top-level attempt of `txn`, whose inputs must already be set.
    pub async fn run_attempt(
        &self,
        conn: &mut GridConnection,
        txn: &mut dyn Transaction,
        stats: &mut Statistics,
        shutdown: &CancellationToken,
    ) -> AttemptReport {
        let mut report = AttemptReport::new();
        let mut grid_retries_left = self.config.grid_retry_limit;
        let mut failovers_left = self.config.failover_limit;
        let mut delay = Duration::ZERO;
        let mut need_reprepare = false;

        while grid_retries_left > 0 && failovers_left > 0 {
            if shutdown.is_cancelled() {
                debug!(txn = txn.name(), "shutdown requested; abandoning attempt");
                return report.finish(AttemptOutcome::Cancelled);
            }
            if !delay.is_zero() {
                debug!(txn = txn.name(), ?delay, "retry delay");
                tokio::time::sleep(delay).await;
            }

            if need_reprepare {
                report.reprepares += 1;
                if !conn.reprepare_all().await {
                    let cause = conn.last_error().cloned();
                    error!(txn = txn.name(), error = ?cause, "reprepare after failover failed");
                    return report.finish(AttemptOutcome::ReprepareFailed(cause));
                }
                need_reprepare = false;
                report.failovers += 1;
                stats.record_failover();
            }

            let result = match self.element_refresh(conn, &mut report).await {
                Ok(()) => self.execute_once(conn, txn).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(rows) => {
                    stats.record_success(txn.kind(), rows);
                    return report.finish(AttemptOutcome::Succeeded { rows });
                }
                Err(e @ GridError::ClientFailover { .. }) => {
                    failovers_left -= 1;
                    delay = e.retry_delay().unwrap_or(self.config.failover_delay);
                    need_reprepare = true;
                    txn.close(conn).await;
                    info!(txn = txn.name(), error = %e, failovers_left, "client failover; will reprepare");
                }
                Err(e @ GridError::GridRetryable { .. }) => {
                    grid_retries_left -= 1;
                    report.grid_retries += 1;
                    stats.record_grid_retry();
                    delay = e.retry_delay().unwrap_or(self.config.grid_retry_delay);
                    txn.close(conn).await;
                    info!(txn = txn.name(), error = %e, grid_retries_left, "grid retry");
                }
                Err(e @ GridError::Fatal { .. }) => {
                    error!(txn = txn.name(), error = %e, "connection lost");
                    return report.finish(AttemptOutcome::ConnectionLost(e));
                }
                Err(e) => {
                    warn!(txn = txn.name(), error = %e, "transaction failed");
                    txn.close(conn).await;
                    return report.finish(AttemptOutcome::Failed(e));
                }
            }
        }

        error!(
            txn = txn.name(),
            grid_retries = report.grid_retries,
            failovers = report.failovers,
            "retries exhausted"
        );
        report.finish(AttemptOutcome::RetriesExhausted)
    }

    /// After a reprepare, re-read the element ID and log the move.
    async fn element_refresh(
        &self,
        conn: &mut GridConnection,
        report: &mut AttemptReport,
    ) -> Result<(), GridError> {
        let pending = report.reprepares as usize > report.element_changes.len();
        if !pending || !conn.is_grid() {
            return Ok(());
        }
        let from = conn.element_id();
        let to = conn.refresh_element_id().await?;
        report.element_changes.push((from, to));
        info!(from, to, "Failover from element {from} to element {to}");
        Ok(())
    }

    /// Execute the transaction once, draining any result set it returns.
    async fn execute_once(
        &self,
        conn: &mut GridConnection,
        txn: &mut dyn Transaction,
    ) -> Result<u64, GridError> {
        match txn.execute(conn).await? {
            TxnOutput::Done { rows } => Ok(rows),
            TxnOutput::Rows(role) => {
                let mut rs = conn.statement(role)?.result_set()?;
                let mut rows = 0;
                while rs.next().await? {
                    rows += 1;
                }
                rs.close().await;
                txn.close(conn).await;
                if self.commit_read_only {
                    conn.commit().await?;
                }
                Ok(rows)
            }
        }
    }
}
