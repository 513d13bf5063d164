//! Workload counters. Each worker owns one [`Statistics`]; the runner
//! merges them once the workers finish.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::txn::TxnKind;

/// Counters for one window of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub executed: u64,
    pub authorize: u64,
    pub query: u64,
    pub charge: u64,
    pub topup: u64,
    pub purge: u64,
    pub grid_retries: u64,
    pub failovers: u64,
}

impl Counters {
    fn count_kind(&mut self, kind: TxnKind) {
        match kind {
            TxnKind::Authorize => self.authorize += 1,
            TxnKind::Query => self.query += 1,
            TxnKind::Charge => self.charge += 1,
            TxnKind::Topup => self.topup += 1,
            TxnKind::Purge => self.purge += 1,
            TxnKind::GetCounts | TxnKind::ClearHistory => return,
        }
        self.executed += 1;
    }

    fn merge(&mut self, other: &Counters) {
        self.executed += other.executed;
        self.authorize += other.authorize;
        self.query += other.query;
        self.charge += other.charge;
        self.topup += other.topup;
        self.purge += other.purge;
        self.grid_retries += other.grid_retries;
        self.failovers += other.failovers;
    }

    /// Transactions per second over `elapsed`.
    #[must_use]
    pub fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.executed as f64 / secs
    }
}

/// Running totals plus the counters of the current report interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: Counters,
    pub interval: Counters,
    pub account_updates: u64,
    pub transaction_inserts: u64,
    pub transaction_deletes: u64,
    pub failed: u64,
    pub retries_exhausted: u64,
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful transaction; `rows` is its DML row count.
    ///
    /// Only the five mix transactions are counted; the startup
    /// transactions (`GetCounts`, `ClearHistory`) are not part of the run.
    pub fn record_success(&mut self, kind: TxnKind, rows: u64) {
        if matches!(kind, TxnKind::GetCounts | TxnKind::ClearHistory) {
            return;
        }
        self.total.count_kind(kind);
        self.interval.count_kind(kind);
        match kind {
            TxnKind::Charge | TxnKind::Topup => {
                self.account_updates += 1;
                self.transaction_inserts += 1;
            }
            TxnKind::Purge => self.transaction_deletes += rows,
            _ => {}
        }
    }

    pub fn record_grid_retry(&mut self) {
        self.total.grid_retries += 1;
        self.interval.grid_retries += 1;
    }

    pub fn record_failover(&mut self) {
        self.total.failovers += 1;
        self.interval.failovers += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn record_exhausted(&mut self) {
        self.retries_exhausted += 1;
        self.failed += 1;
    }

    /// Fold another worker's totals into these.
    pub fn merge(&mut self, other: &Statistics) {
        self.total.merge(&other.total);
        self.interval.merge(&other.interval);
        self.account_updates += other.account_updates;
        self.transaction_inserts += other.transaction_inserts;
        self.transaction_deletes += other.transaction_deletes;
        self.failed += other.failed;
        self.retries_exhausted += other.retries_exhausted;
    }

    /// Close the current interval and return its counters.
    pub fn take_interval(&mut self) -> Counters {
        std::mem::take(&mut self.interval)
    }

    /// Log the interval counters and start a new interval.
    pub fn report_interval(&mut self, worker: usize, elapsed: Duration) {
        let c = self.take_interval();
        info!(
            worker,
            tps = c.rate(elapsed),
            executed = c.executed,
            authorize = c.authorize,
            query = c.query,
            charge = c.charge,
            topup = c.topup,
            purge = c.purge,
            grid_retries = c.grid_retries,
            failovers = c.failovers,
            "interval report"
        );
    }

    /// Log the run totals.
    pub fn report_summary(&self, elapsed: Duration) {
        let c = &self.total;
        info!(
            elapsed = %humanize(elapsed),
            tps = c.rate(elapsed),
            executed = c.executed,
            authorize = c.authorize,
            query = c.query,
            charge = c.charge,
            topup = c.topup,
            purge = c.purge,
            account_updates = self.account_updates,
            transaction_inserts = self.transaction_inserts,
            transaction_deletes = self.transaction_deletes,
            grid_retries = c.grid_retries,
            failovers = c.failovers,
            failed = self.failed,
            retries_exhausted = self.retries_exhausted,
            "run summary"
        );
    }
}

fn humanize(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
}
