//! Mapping of native (state-code, numeric-code) pairs onto error classes.
//!
//! Each class owns a small table of patterns. A pattern field that is `None`
//! is a wildcard; a pattern matches when every non-wildcard field equals the
//! corresponding field of the error. Tables are checked in priority order
//! `Fatal`, `ClientFailover`, `GridRetryable`; anything unmatched is
//! `Ordinary`.

use std::time::Duration;

/// Outcome of classifying a native error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The connected element was invalidated; the connection is unusable.
    Fatal,
    /// The client session was moved to another element; re-prepare and retry.
    ClientFailover,
    /// Transient cluster-wide condition; retry on the same connection.
    GridRetryable,
    /// Anything else; surfaced to the caller, never retried.
    Ordinary,
}

/// One row of a classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePattern {
    pub sql_state: Option<&'static str>,
    pub code: Option<i32>,
}

impl CodePattern {
    #[must_use]
    pub const fn state(sql_state: &'static str) -> Self {
        Self {
            sql_state: Some(sql_state),
            code: None,
        }
    }

    #[must_use]
    pub const fn code(code: i32) -> Self {
        Self {
            sql_state: None,
            code: Some(code),
        }
    }

    #[must_use]
    pub fn matches(&self, sql_state: Option<&str>, code: i32) -> bool {
        let state_ok = match self.sql_state {
            None => true,
            Some(expected) => sql_state == Some(expected),
        };
        let code_ok = match self.code {
            None => true,
            Some(expected) => code == expected,
        };
        state_ok && code_ok
    }
}

/// Element invalidation.
pub const FATAL_PATTERNS: &[CodePattern] = &[CodePattern::code(846), CodePattern::code(994)];

/// Client connection transparently moved to a different element.
pub const CLIENT_FAILOVER_PATTERNS: &[CodePattern] = &[CodePattern::code(47137)];

/// Transient grid error, deadlock, lock wait timeout.
pub const GRID_RETRYABLE_PATTERNS: &[CodePattern] = &[
    CodePattern::state("TT005"),
    CodePattern::code(6002),
    CodePattern::code(6003),
];

pub const DEFAULT_GRID_RETRY_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_FAILOVER_DELAY: Duration = Duration::from_millis(100);

fn any_match(table: &[CodePattern], sql_state: Option<&str>, code: i32) -> bool {
    table.iter().any(|p| p.matches(sql_state, code))
}

/// Classify a native error pair.
#[must_use]
pub fn classify(sql_state: Option<&str>, code: i32) -> ErrorClass {
    if any_match(FATAL_PATTERNS, sql_state, code) {
        ErrorClass::Fatal
    } else if any_match(CLIENT_FAILOVER_PATTERNS, sql_state, code) {
        ErrorClass::ClientFailover
    } else if any_match(GRID_RETRYABLE_PATTERNS, sql_state, code) {
        ErrorClass::GridRetryable
    } else {
        ErrorClass::Ordinary
    }
}

/// Suggested delays attached to the recoverable classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RetryDelays {
    pub grid_retry: Duration,
    pub failover: Duration,
}

impl Default for RetryDelays {
    fn default() -> Self {
        Self {
            grid_retry: DEFAULT_GRID_RETRY_DELAY,
            failover: DEFAULT_FAILOVER_DELAY,
        }
    }
}
