//! One worker of the sample workload: a connection, its transactions, a
//! random input stream and its own statistics.

use std::sync::Arc;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectOptions, RunLimit, TxnMix, WorkloadConfig};
use crate::connection::GridConnection;
use crate::error::GridError;
use crate::native::NativeConnector;
use crate::retry::{AttemptOutcome, RetryDriver};
use crate::stats::Statistics;
use crate::txn::{
    Authorize, Charge, ClearHistory, GetCounts, Purge, Query, TableCounts, Topup, Transaction,
    TxnKind,
};

/// Pick a transaction kind from a roll in `0..100` using the cumulative mix.
#[must_use]
pub fn choose_kind(mix: &TxnMix, roll: u32) -> TxnKind {
    let mut bound = u32::from(mix.authorize);
    if roll < bound {
        return TxnKind::Authorize;
    }
    bound += u32::from(mix.charge);
    if roll < bound {
        return TxnKind::Charge;
    }
    bound += u32::from(mix.topup);
    if roll < bound {
        return TxnKind::Topup;
    }
    bound += u32::from(mix.query);
    if roll < bound {
        return TxnKind::Query;
    }
    TxnKind::Purge
}

/// Why a worker's run loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEnd {
    /// The configured transaction count or duration was reached
    LimitReached,
    /// Shutdown was requested
    Cancelled,
    /// An attempt failed and the run does not continue on errors
    Aborted(AttemptOutcome),
}

struct TxnSet {
    authorize: Authorize,
    query: Query,
    charge: Charge,
    topup: Topup,
    purge: Purge,
}

impl TxnSet {
    fn get(&mut self, kind: TxnKind) -> Option<&mut dyn Transaction> {
        match kind {
            TxnKind::Authorize => Some(&mut self.authorize),
            TxnKind::Query => Some(&mut self.query),
            TxnKind::Charge => Some(&mut self.charge),
            TxnKind::Topup => Some(&mut self.topup),
            TxnKind::Purge => Some(&mut self.purge),
            TxnKind::GetCounts | TxnKind::ClearHistory => None,
        }
    }

    fn all(&mut self) -> [&mut dyn Transaction; 5] {
        [
            &mut self.authorize,
            &mut self.query,
            &mut self.charge,
            &mut self.topup,
            &mut self.purge,
        ]
    }
}

/// A single worker.
pub struct Workload {
    worker: usize,
    config: WorkloadConfig,
    conn: GridConnection,
    driver: RetryDriver,
    rng: ChaCha8Rng,
    counts: TableCounts,
    txns: TxnSet,
    stats: Statistics,
    attempts: u64,
}

impl Workload {
    /// Connect, prepare every transaction, read the key ranges and
    /// optionally clear the history table.
    ///
    /// # Errors
    /// Connection, preparation or startup transaction failures.
    pub async fn start(
        worker: usize,
        options: ConnectOptions,
        connector: Arc<dyn NativeConnector>,
        config: WorkloadConfig,
        seed: u64,
    ) -> Result<Self, GridError> {
        let mut purge = Purge::new();
        purge.set_age(config.purge_age_secs)?;

        let mut options = options;
        options.delays = config.retry.delays();
        let mut conn = GridConnection::new(options, connector);
        conn.connect().await?;
        if conn.is_grid() {
            info!(worker, element_id = conn.element_id(), "attached to grid element");
        } else {
            info!(worker, "attached to a non-grid database");
        }

        let driver = RetryDriver::new(config.retry).commit_read_only(config.commit_read_only);
        let shutdown = CancellationToken::new();
        let mut stats = Statistics::new();

        let counts = match startup(&mut conn, &driver, &config, &mut stats, &shutdown).await {
            Ok(counts) => counts,
            Err(e) => {
                conn.close(true).await;
                return Err(e);
            }
        };
        info!(worker, counts = ?counts, "key ranges");

        let mut txns = TxnSet {
            authorize: Authorize::new(),
            query: Query::new(),
            charge: Charge::new(),
            topup: Topup::new(),
            purge,
        };
        for txn in txns.all() {
            if let Err(e) = txn.init(&mut conn).await {
                error!(worker, txn = txn.name(), error = %e, "init failed");
                conn.close(true).await;
                return Err(e);
            }
        }

        Ok(Self {
            worker,
            config,
            conn,
            driver,
            rng: ChaCha8Rng::seed_from_u64(seed),
            counts,
            txns,
            stats,
            attempts: 0,
        })
    }

    #[must_use]
    pub fn worker(&self) -> usize {
        self.worker
    }

    #[must_use]
    pub fn counts(&self) -> TableCounts {
        self.counts
    }

    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    #[must_use]
    pub fn connection(&self) -> &GridConnection {
        &self.conn
    }

    fn limit_reached(&self, started: Instant) -> bool {
        match self.config.run_limit {
            RunLimit::Transactions(n) => self.attempts >= n,
            RunLimit::Duration(d) => started.elapsed() >= d,
            RunLimit::Unbounded => false,
        }
    }

    fn random_amount(&mut self) -> Decimal {
        let to_cents = |d: Decimal| (d * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0);
        let lo = to_cents(self.config.charge_min).max(1);
        let hi = to_cents(self.config.charge_max).max(lo + 1);
        Decimal::new(self.rng.random_range(lo..hi), 2)
    }

    /// Choose the next transaction and set random, valid inputs on it.
    fn prepare_next(&mut self) -> Result<TxnKind, GridError> {
        let kind = choose_kind(&self.config.mix, self.rng.random_range(0..100));
        let counts = self.counts;
        match kind {
            TxnKind::Authorize => {
                let id = self
                    .rng
                    .random_range(counts.min_account_id..=counts.max_account_id);
                self.txns.authorize.set_account_id(id)?;
            }
            TxnKind::Query => {
                let id = self
                    .rng
                    .random_range(counts.min_cust_id..=counts.max_cust_id);
                self.txns.query.set_cust_id(id)?;
            }
            TxnKind::Charge => {
                let id = self
                    .rng
                    .random_range(counts.min_account_id..=counts.max_account_id);
                let amount = self.random_amount();
                self.txns.charge.set_account_id(id)?;
                self.txns.charge.set_amount(amount)?;
            }
            TxnKind::Topup => {
                let id = self
                    .rng
                    .random_range(counts.min_account_id..=counts.max_account_id);
                self.txns.topup.set_account_id(id)?;
                self.txns.topup.set_amount(self.config.topup_amount)?;
            }
            TxnKind::Purge | TxnKind::GetCounts | TxnKind::ClearHistory => {}
        }
        Ok(kind)
    }

    /// Run transactions until the run limit, shutdown, or an abort.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> RunEnd {
        let started = Instant::now();
        let mut interval_start = started;
        let worker = self.worker;

        let end = loop {
            if shutdown.is_cancelled() {
                break RunEnd::Cancelled;
            }
            if self.limit_reached(started) {
                break RunEnd::LimitReached;
            }

            let kind = match self.prepare_next() {
                Ok(kind) => kind,
                Err(e) => break RunEnd::Aborted(AttemptOutcome::Failed(e)),
            };
            let Some(txn) = self.txns.get(kind) else {
                continue;
            };
            self.attempts += 1;
            let report = self
                .driver
                .run_attempt(&mut self.conn, txn, &mut self.stats, shutdown)
                .await;

            match report.outcome {
                AttemptOutcome::Succeeded { .. } => {}
                AttemptOutcome::Cancelled => break RunEnd::Cancelled,
                outcome @ (AttemptOutcome::ConnectionLost(_)
                | AttemptOutcome::ReprepareFailed(_)) => {
                    self.stats.record_failure();
                    error!(worker, ?outcome, "connection unusable; ending run");
                    break RunEnd::Aborted(outcome);
                }
                AttemptOutcome::RetriesExhausted => {
                    self.stats.record_exhausted();
                    if !self.config.continue_on_error {
                        break RunEnd::Aborted(AttemptOutcome::RetriesExhausted);
                    }
                }
                AttemptOutcome::Failed(e) => {
                    self.stats.record_failure();
                    if !self.config.continue_on_error {
                        break RunEnd::Aborted(AttemptOutcome::Failed(e));
                    }
                    warn!(worker, txn = %kind, error = %e, "continuing after failure");
                }
            }

            let elapsed = interval_start.elapsed();
            if elapsed >= self.config.report_interval {
                self.stats.report_interval(worker, elapsed);
                interval_start = Instant::now();
            }
        };
        debug!(worker, attempts = self.attempts, end = ?end, "run loop finished");
        end
    }

    /// Release every statement, close the connection and hand back the
    /// worker's statistics.
    pub async fn finish(mut self) -> Statistics {
        for txn in self.txns.all() {
            txn.cleanup(&mut self.conn).await;
        }
        self.conn.close(true).await;
        self.stats
    }
}

async fn startup(
    conn: &mut GridConnection,
    driver: &RetryDriver,
    config: &WorkloadConfig,
    stats: &mut Statistics,
    shutdown: &CancellationToken,
) -> Result<TableCounts, GridError> {
    let mut get_counts = GetCounts::new();
    get_counts.init(conn).await?;
    let report = driver.run_attempt(conn, &mut get_counts, stats, shutdown).await;
    get_counts.cleanup(conn).await;
    let counts = match report.outcome {
        AttemptOutcome::Succeeded { .. } => get_counts.counts().ok_or(GridError::NoResults)?,
        other => return Err(startup_error(other)),
    };

    if config.clear_history {
        run_clear_history(conn, driver, config, stats, shutdown).await?;
    }
    Ok(counts)
}

async fn run_clear_history(
    conn: &mut GridConnection,
    driver: &RetryDriver,
    config: &WorkloadConfig,
    stats: &mut Statistics,
    shutdown: &CancellationToken,
) -> Result<u64, GridError> {
    let mut clear = ClearHistory::new(config.use_truncate);
    clear.init(conn).await?;
    let report = driver.run_attempt(conn, &mut clear, stats, shutdown).await;
    clear.cleanup(conn).await;
    match report.outcome {
        AttemptOutcome::Succeeded { rows } => {
            info!(rows, "transaction history cleared");
            Ok(rows)
        }
        other => Err(startup_error(other)),
    }
}

/// Empty the transaction history once, on a connection of its own.
///
/// Runs that start several workers on one database call this before
/// starting them, with `clear_history` switched off in the workers'
/// config, so no worker deletes rows another one already counted.
///
/// # Errors
/// Connection failures, or the error that ended the ClearHistory attempt.
pub async fn clear_history(
    options: ConnectOptions,
    connector: Arc<dyn NativeConnector>,
    config: &WorkloadConfig,
) -> Result<u64, GridError> {
    let mut options = options;
    options.delays = config.retry.delays();
    let mut conn = GridConnection::new(options, connector);
    conn.connect().await?;
    let driver = RetryDriver::new(config.retry);
    let mut stats = Statistics::new();
    let result =
        run_clear_history(&mut conn, &driver, config, &mut stats, &CancellationToken::new()).await;
    conn.close(result.is_err()).await;
    result
}

fn startup_error(outcome: AttemptOutcome) -> GridError {
    match outcome {
        AttemptOutcome::Failed(e) | AttemptOutcome::ConnectionLost(e) => e,
        AttemptOutcome::ReprepareFailed(Some(e)) => e,
        AttemptOutcome::ReprepareFailed(None) => {
            GridError::State("reprepare after failover failed".into())
        }
        AttemptOutcome::RetriesExhausted => GridError::State("retries exhausted".into()),
        AttemptOutcome::Cancelled => GridError::State("cancelled during startup".into()),
        AttemptOutcome::Succeeded { .. } => GridError::State("unexpected startup outcome".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_selection_is_cumulative_in_declared_order() {
        let mix = TxnMix::default();
        assert_eq!(choose_kind(&mix, 0), TxnKind::Authorize);
        assert_eq!(choose_kind(&mix, 69), TxnKind::Authorize);
        assert_eq!(choose_kind(&mix, 70), TxnKind::Charge);
        assert_eq!(choose_kind(&mix, 84), TxnKind::Charge);
        assert_eq!(choose_kind(&mix, 85), TxnKind::Topup);
        assert_eq!(choose_kind(&mix, 90), TxnKind::Query);
        assert_eq!(choose_kind(&mix, 95), TxnKind::Purge);
        assert_eq!(choose_kind(&mix, 99), TxnKind::Purge);
    }

    #[test]
    fn zero_weight_kinds_are_never_chosen() {
        let mix = TxnMix::new(0, 0, 100, 0, 0).unwrap();
        for roll in 0..100 {
            assert_eq!(choose_kind(&mix, roll), TxnKind::Topup);
        }
    }
}
