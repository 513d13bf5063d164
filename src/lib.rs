//! Grid-aware database access layer.
//!
//! Wraps a native database driver with connections, prepared statements
//! and result sets that classify every driver error as fatal, client
//! failover, grid retryable or ordinary, and applies the matching side
//! effects (teardown, rollback, recording). On top of that sit the sample
//! transactions, a bounded retry driver and a multi-transaction workload.

pub mod chaos;
pub mod classify;
pub mod config;
pub mod connection;
pub mod error;
pub mod native;
pub mod prelude;
pub mod result_set;
pub mod retry;
pub mod statement;
pub mod stats;
pub mod txn;
pub mod types;
pub mod workload;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use classify::{ErrorClass, RetryDelays, classify};
pub use config::{ConnectOptions, ConnectOptionsBuilder, RetryConfig, RunLimit, TxnMix, WorkloadConfig};
pub use connection::GridConnection;
pub use error::{GridError, NativeError};
pub use retry::{AttemptOutcome, AttemptReport, RetryDriver};
pub use stats::Statistics;
pub use types::{ConnectMode, Dialect, RowValues};
pub use workload::{RunEnd, Workload, clear_history};
