use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use grid_middleware::chaos::ChaosOptions;
use grid_middleware::config::{
    ConnectOptions, DEFAULT_CS_DSN, DEFAULT_DSN, RetryConfig, RunLimit, TxnMix, WorkloadConfig,
};
use grid_middleware::types::{ConnectMode, Dialect};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-worker sample workload for grid-middleware")]
pub(crate) struct Args {
    /// SQLite file the workload runs against; created and seeded if empty
    #[arg(long, default_value = "grid_sample.db")]
    pub(crate) db: PathBuf,
    /// Customers to seed into an empty database (two accounts each)
    #[arg(long, default_value_t = 1000)]
    pub(crate) customers: u32,
    /// How long a statement waits on a locked SQLite file before failing
    #[arg(long, value_parser = humantime::parse_duration, default_value = "250ms")]
    pub(crate) busy_timeout: Duration,
    #[arg(long)]
    pub(crate) dsn: Option<String>,
    #[arg(long, value_enum, default_value = "direct")]
    pub(crate) mode: ConnectMode,
    #[arg(long)]
    pub(crate) user: Option<String>,
    /// Read from GRID_WORKLOAD_PASSWORD when the flag is absent. There is
    /// no interactive prompt, so prefer the variable over the flag.
    #[arg(long, env = "GRID_WORKLOAD_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    #[arg(long)]
    pub(crate) connection_name: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub(crate) workers: usize,
    /// Stop each worker after this many transactions
    #[arg(long)]
    pub(crate) transactions: Option<u64>,
    /// Stop each worker after this long, e.g. `5m`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    /// Percentages for authorize,charge,topup,query,purge
    #[arg(long, default_value = "70,15,5,5,5")]
    pub(crate) mix: TxnMix,
    #[arg(long, default_value_t = 30)]
    pub(crate) purge_age: i64,
    #[arg(long, default_value = "10.00")]
    pub(crate) topup_amount: Decimal,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub(crate) report_interval: Duration,
    #[arg(long, default_value_t = 30)]
    pub(crate) grid_retry_limit: u32,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5ms")]
    pub(crate) grid_retry_delay: Duration,
    #[arg(long, default_value_t = 100)]
    pub(crate) failover_limit: u32,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "100ms")]
    pub(crate) failover_delay: Duration,
    /// Commit after reading the rows of authorize and query
    #[arg(long)]
    pub(crate) commit_read_only: bool,
    /// Keep the transaction history instead of clearing it at start
    #[arg(long)]
    pub(crate) keep_history: bool,
    /// Clear the history with TRUNCATE instead of DELETE
    #[arg(long)]
    pub(crate) truncate: bool,
    #[arg(long)]
    pub(crate) continue_on_error: bool,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Inject grid retryable errors at this rate per execute/commit
    #[arg(long, default_value_t = 0.0)]
    pub(crate) grid_retry_rate: f64,
    /// Inject client failovers at this rate per execute/commit
    #[arg(long, default_value_t = 0.0)]
    pub(crate) failover_rate: f64,
    /// Inject element invalidation at this rate per execute/commit
    #[arg(long, default_value_t = 0.0)]
    pub(crate) fatal_rate: f64,
    #[arg(long, default_value_t = 3)]
    pub(crate) elements: i32,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(short, long)]
    pub(crate) verbose: bool,
    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    pub(crate) silent: bool,
    #[arg(long)]
    pub(crate) debug: bool,
}

impl Args {
    pub(crate) fn level(&self) -> Level {
        if self.debug {
            Level::TRACE
        } else if self.verbose {
            Level::DEBUG
        } else if self.silent {
            Level::ERROR
        } else {
            Level::INFO
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RunConfig {
    pub(crate) db: PathBuf,
    pub(crate) customers: u32,
    pub(crate) busy_timeout: Duration,
    pub(crate) workers: usize,
    pub(crate) seed: u64,
    pub(crate) connect: ConnectOptions,
    pub(crate) workload: WorkloadConfig,
    pub(crate) chaos: Option<ChaosOptions>,
    pub(crate) log: Option<PathBuf>,
}

impl RunConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let seed = args.seed.unwrap_or_else(rand::random);
        let dsn = args.dsn.unwrap_or_else(|| match args.mode {
            ConnectMode::Direct => DEFAULT_DSN.to_string(),
            ConnectMode::ClientServer => DEFAULT_CS_DSN.to_string(),
        });
        let mut connect = ConnectOptions::builder(dsn)
            .mode(args.mode)
            .dialect(Dialect::Sqlite)
            .password(args.password);
        if args.user.is_some() {
            connect = connect.user(args.user);
        }
        if args.connection_name.is_some() {
            connect = connect.connection_name(args.connection_name);
        }

        let run_limit = match (args.transactions, args.duration) {
            (Some(n), _) => RunLimit::Transactions(n),
            (None, Some(d)) => RunLimit::Duration(d),
            (None, None) => RunLimit::Unbounded,
        };
        let workload = WorkloadConfig {
            mix: args.mix,
            retry: RetryConfig {
                grid_retry_limit: args.grid_retry_limit,
                grid_retry_delay: args.grid_retry_delay,
                failover_limit: args.failover_limit,
                failover_delay: args.failover_delay,
            },
            purge_age_secs: args.purge_age,
            topup_amount: args.topup_amount,
            commit_read_only: args.commit_read_only,
            clear_history: !args.keep_history,
            use_truncate: args.truncate,
            run_limit,
            continue_on_error: args.continue_on_error,
            ..WorkloadConfig::default()
        }
        .with_report_interval(args.report_interval);

        let rates = [args.grid_retry_rate, args.failover_rate, args.fatal_rate];
        let chaos = rates.iter().any(|r| *r > 0.0).then(|| ChaosOptions {
            seed,
            grid_retry_rate: clamp_rate(args.grid_retry_rate),
            failover_rate: clamp_rate(args.failover_rate),
            fatal_rate: clamp_rate(args.fatal_rate),
            elements: args.elements.max(1),
        });

        RunConfig {
            db: args.db,
            customers: args.customers,
            busy_timeout: args.busy_timeout,
            workers: args.workers.max(1),
            seed,
            connect: connect.finish(),
            workload,
            chaos,
            log: args.log,
        }
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
