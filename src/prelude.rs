//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so a caller can
//! open a connection, run the sample transactions and drive them through
//! the retry loop with a single `use`.

pub use crate::classify::{ErrorClass, RetryDelays};
pub use crate::config::{ConnectOptions, RetryConfig, RunLimit, TxnMix, WorkloadConfig};
pub use crate::connection::GridConnection;
pub use crate::error::{GridError, NativeError};
pub use crate::native::{NativeConnection, NativeConnector};
pub use crate::result_set::ResultSetRef;
pub use crate::retry::{AttemptOutcome, RetryDriver};
pub use crate::statement::{StatementRef, StatementRole};
pub use crate::stats::Statistics;
pub use crate::txn::{
    Authorize, Charge, ClearHistory, GetCounts, Purge, Query, Topup, Transaction, TxnKind,
    TxnOutput,
};
pub use crate::types::{ConnectMode, Dialect, RowValues};
pub use crate::workload::{RunEnd, Workload, clear_history};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnector, create_sample_database};
