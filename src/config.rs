use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::classify::{DEFAULT_FAILOVER_DELAY, DEFAULT_GRID_RETRY_DELAY, RetryDelays};
use crate::error::GridError;
use crate::native::ConnectDescriptor;
use crate::types::{ConnectMode, Dialect};

pub const DEFAULT_DSN: &str = "sampledb";
pub const DEFAULT_CS_DSN: &str = "sampledbCS";
pub const DEFAULT_USER: &str = "appuser";
pub const DEFAULT_CONNECTION_NAME: &str = "GridSample";

const URL_PREFIX: &str = "timesten:";

/// Options for opening a [`GridConnection`](crate::connection::GridConnection).
#[derive(Clone, Serialize)]
pub struct ConnectOptions {
    pub dsn: String,
    pub mode: ConnectMode,
    pub user: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    pub connection_name: Option<String>,
    pub dialect: Dialect,
    pub delays: RetryDelays,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("dsn", &self.dsn)
            .field("mode", &self.mode)
            .field("user", &self.user)
            .field("connection_name", &self.connection_name)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(dsn: impl Into<String>, mode: ConnectMode) -> Self {
        Self {
            dsn: dsn.into(),
            mode,
            user: Some(DEFAULT_USER.to_string()),
            password: None,
            connection_name: Some(DEFAULT_CONNECTION_NAME.to_string()),
            dialect: Dialect::TimesTen,
            delays: RetryDelays::default(),
        }
    }

    #[must_use]
    pub fn builder(dsn: impl Into<String>) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(dsn)
    }

    /// Assemble the connection URL: `timesten:<direct|client>:DSN=<dsn>[;ConnectionName=<name>]`.
    ///
    /// # Errors
    /// Returns `GridError::Parameter` for an empty DSN.
    pub fn url(&self) -> Result<String, GridError> {
        if self.dsn.trim().is_empty() {
            return Err(GridError::Parameter("DSN must not be empty".into()));
        }
        let mode = match self.mode {
            ConnectMode::Direct => "direct:",
            ConnectMode::ClientServer => "client:",
        };
        let mut url = format!("{URL_PREFIX}{mode}DSN={}", self.dsn);
        if let Some(name) = &self.connection_name {
            url.push_str(";ConnectionName=");
            url.push_str(name);
        }
        Ok(url)
    }

    /// Build the driver descriptor, applying the credential rules for the mode.
    ///
    /// Direct mode accepts a user without a password but not the reverse;
    /// client/server mode needs both.
    ///
    /// # Errors
    /// Returns `GridError::Parameter` if the credentials do not fit the mode.
    pub fn descriptor(&self) -> Result<ConnectDescriptor, GridError> {
        let url = self.url()?;
        match self.mode {
            ConnectMode::Direct => {
                if self.password.is_some() && self.user.is_none() {
                    return Err(GridError::Parameter(
                        "password supplied without a user".into(),
                    ));
                }
            }
            ConnectMode::ClientServer => {
                if self.user.is_none() || self.password.is_none() {
                    return Err(GridError::Parameter(
                        "client/server mode needs both user and password".into(),
                    ));
                }
            }
        }
        Ok(ConnectDescriptor {
            url,
            user: self.user.clone(),
            password: self.password.clone(),
        })
    }
}

/// Fluent builder for [`ConnectOptions`].
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    opts: ConnectOptions,
}

impl ConnectOptionsBuilder {
    #[must_use]
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            opts: ConnectOptions::new(dsn, ConnectMode::Direct),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: ConnectMode) -> Self {
        self.opts.mode = mode;
        self
    }

    #[must_use]
    pub fn user(mut self, user: Option<String>) -> Self {
        self.opts.user = user;
        self
    }

    #[must_use]
    pub fn password(mut self, password: Option<String>) -> Self {
        self.opts.password = password;
        self
    }

    #[must_use]
    pub fn connection_name(mut self, name: Option<String>) -> Self {
        self.opts.connection_name = name;
        self
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.opts.dialect = dialect;
        self
    }

    #[must_use]
    pub fn delays(mut self, delays: RetryDelays) -> Self {
        self.opts.delays = delays;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectOptions {
        self.opts
    }
}

/// Retry budgets and delays for the retry driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryConfig {
    pub grid_retry_limit: u32,
    pub grid_retry_delay: Duration,
    pub failover_limit: u32,
    pub failover_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            grid_retry_limit: 30,
            grid_retry_delay: DEFAULT_GRID_RETRY_DELAY,
            failover_limit: 100,
            failover_delay: DEFAULT_FAILOVER_DELAY,
        }
    }
}

impl RetryConfig {
    /// Delays to attach to classified errors.
    #[must_use]
    pub fn delays(&self) -> RetryDelays {
        RetryDelays {
            grid_retry: self.grid_retry_delay,
            failover: self.failover_delay,
        }
    }
}

/// Percentage mix of workload transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxnMix {
    pub authorize: u8,
    pub charge: u8,
    pub topup: u8,
    pub query: u8,
    pub purge: u8,
}

impl Default for TxnMix {
    fn default() -> Self {
        Self {
            authorize: 70,
            charge: 15,
            topup: 5,
            query: 5,
            purge: 5,
        }
    }
}

impl TxnMix {
    /// Build a mix; the five percentages must add up to 100.
    ///
    /// # Errors
    /// Returns `GridError::Parameter` if the total is not 100.
    pub fn new(authorize: u8, charge: u8, topup: u8, query: u8, purge: u8) -> Result<Self, GridError> {
        let total = u32::from(authorize)
            + u32::from(charge)
            + u32::from(topup)
            + u32::from(query)
            + u32::from(purge);
        if total != 100 {
            return Err(GridError::Parameter(format!(
                "transaction mix must total 100, got {total}"
            )));
        }
        Ok(Self {
            authorize,
            charge,
            topup,
            query,
            purge,
        })
    }
}

/// Parses `"A,C,T,Q,P"`, e.g. `"70,15,5,5,5"`.
impl FromStr for TxnMix {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| {
                part.trim().parse::<u8>().map_err(|_| {
                    GridError::Parameter(format!("invalid transaction mix value '{part}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        match values.as_slice() {
            [a, c, t, q, p] => TxnMix::new(*a, *c, *t, *q, *p),
            _ => Err(GridError::Parameter(format!(
                "transaction mix needs five values, got {}",
                values.len()
            ))),
        }
    }
}

/// When a workload run stops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunLimit {
    Transactions(u64),
    Duration(Duration),
    Unbounded,
}

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Settings for one workload worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadConfig {
    pub mix: TxnMix,
    pub retry: RetryConfig,
    pub purge_age_secs: i64,
    pub topup_amount: Decimal,
    pub charge_min: Decimal,
    pub charge_max: Decimal,
    pub commit_read_only: bool,
    pub clear_history: bool,
    pub use_truncate: bool,
    pub run_limit: RunLimit,
    pub report_interval: Duration,
    pub continue_on_error: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            mix: TxnMix::default(),
            retry: RetryConfig::default(),
            purge_age_secs: 30,
            topup_amount: Decimal::new(1000, 2),
            charge_min: Decimal::new(10, 2),
            charge_max: Decimal::new(100, 2),
            commit_read_only: false,
            clear_history: true,
            use_truncate: false,
            run_limit: RunLimit::Unbounded,
            report_interval: DEFAULT_REPORT_INTERVAL,
            continue_on_error: false,
        }
    }
}

impl WorkloadConfig {
    /// Clamp the report interval to its minimum.
    #[must_use]
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval.max(MIN_REPORT_INTERVAL);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_reflects_mode_and_connection_name() {
        let opts = ConnectOptions::builder("sampledb").finish();
        assert_eq!(
            opts.url().unwrap(),
            "timesten:direct:DSN=sampledb;ConnectionName=GridSample"
        );
        let opts = ConnectOptions::builder(DEFAULT_CS_DSN)
            .mode(ConnectMode::ClientServer)
            .connection_name(None)
            .finish();
        assert_eq!(opts.url().unwrap(), "timesten:client:DSN=sampledbCS");
    }

    #[test]
    fn credential_rules_follow_mode() {
        let direct_no_user = ConnectOptions::builder("db")
            .user(None)
            .password(Some("pw".into()))
            .finish();
        assert!(matches!(
            direct_no_user.descriptor(),
            Err(GridError::Parameter(_))
        ));

        let direct_user_only = ConnectOptions::builder("db").finish();
        assert!(direct_user_only.descriptor().is_ok());

        let cs_missing_password = ConnectOptions::builder("db")
            .mode(ConnectMode::ClientServer)
            .finish();
        assert!(matches!(
            cs_missing_password.descriptor(),
            Err(GridError::Parameter(_))
        ));

        let cs = ConnectOptions::builder("db")
            .mode(ConnectMode::ClientServer)
            .password(Some("pw".into()))
            .finish();
        let descriptor = cs.descriptor().unwrap();
        assert_eq!(descriptor.password.as_deref(), Some("pw"));
    }

    #[test]
    fn txn_mix_parses_and_validates_total() {
        let mix: TxnMix = "50,20,10,10,10".parse().unwrap();
        assert_eq!(mix.authorize, 50);
        assert_eq!(mix.purge, 10);
        assert!("50,20,10,10".parse::<TxnMix>().is_err());
        assert!("50,20,10,10,11".parse::<TxnMix>().is_err());
        assert!("50,x,10,10,10".parse::<TxnMix>().is_err());
    }

    #[test]
    fn report_interval_is_clamped() {
        let cfg = WorkloadConfig::default().with_report_interval(Duration::from_secs(1));
        assert_eq!(cfg.report_interval, MIN_REPORT_INTERVAL);
    }
}
