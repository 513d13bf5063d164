use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::classify::{ErrorClass, classify};
use crate::statement::StatementRole;

/// Error triple reported by a native database driver.
///
/// The state code, numeric code and message are kept exactly as the driver
/// reported them; they are the only input to [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// SQLSTATE-style code, if the driver supplied one
    pub sql_state: Option<String>,
    /// Driver specific numeric error code
    pub code: i32,
    /// Human readable message
    pub message: String,
}

impl NativeError {
    #[must_use]
    pub fn new(sql_state: Option<&str>, code: i32, message: impl Into<String>) -> Self {
        Self {
            sql_state: sql_state.map(str::to_owned),
            code,
            message: message.into(),
        }
    }

    /// Error with a numeric code and no state code.
    #[must_use]
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self::new(None, code, message)
    }

    /// Classify this error against the fixed code tables.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        classify(self.sql_state.as_deref(), self.code)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.sql_state.as_deref().unwrap_or("null"),
            self.code,
            self.message
        )
    }
}

impl std::error::Error for NativeError {}

/// Every failure the grid access layer can report.
///
/// `GridRetryable` and `ClientFailover` require the caller to act (retry,
/// or re-prepare and retry); everything else is terminal for the call that
/// produced it. `Fatal` additionally means the owning connection has been
/// torn down.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("state error: {0}")]
    State(String),

    #[error("duplicate statement label: {0}")]
    DuplicateLabel(StatementRole),

    #[error("database connection not open")]
    NotOpen,

    #[error("database connection already open")]
    AlreadyOpen,

    #[error("not a grid database")]
    NotGrid,

    #[error("no input value: {0}")]
    NoInput(&'static str),

    #[error("no rows found")]
    NoResults,

    #[error("too few/many rows modified ({actual}, expected {expected})")]
    RowCountMismatch { expected: u64, actual: u64 },

    #[error("data error: {0}")]
    Data(String),

    #[error("grid retryable error: {source}")]
    GridRetryable { source: NativeError, delay: Duration },

    #[error("client connection failover: {source}")]
    ClientFailover { source: NativeError, delay: Duration },

    #[error("database connection lost: {source}")]
    Fatal { source: NativeError },

    #[error("{0}")]
    Database(NativeError),
}

impl GridError {
    /// The native error triple behind this error, if it came from the driver.
    #[must_use]
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::GridRetryable { source, .. }
            | Self::ClientFailover { source, .. }
            | Self::Fatal { source } => Some(source),
            Self::Database(source) => Some(source),
            _ => None,
        }
    }

    /// Class of the error; logical and misuse errors are `Ordinary`.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::GridRetryable { .. } => ErrorClass::GridRetryable,
            Self::ClientFailover { .. } => ErrorClass::ClientFailover,
            Self::Fatal { .. } => ErrorClass::Fatal,
            _ => ErrorClass::Ordinary,
        }
    }

    /// Suggested wait before retrying, for the two recoverable classes.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::GridRetryable { delay, .. } | Self::ClientFailover { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GridRetryable { .. } | Self::ClientFailover { .. }
        )
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
