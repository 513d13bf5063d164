mod args;
mod logging;
mod runner;

use clap::Parser;

use crate::args::{Args, RunConfig};

fn main() {
    let args = Args::parse();
    let level = args.level();
    let config = RunConfig::from_args(args);
    let writer = logging::make_writer(config.log.as_deref()).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(config.log.is_none())
        .with_target(level >= tracing::Level::DEBUG)
        .with_max_level(level)
        .init();

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|err| {
        eprintln!("failed to start tokio runtime: {err}");
        std::process::exit(1);
    });
    match runtime.block_on(runner::run(config)) {
        Ok(summary) => {
            tracing::info!(
                executed = summary.stats.total.executed,
                failed_workers = summary.failed_workers,
                "workload complete"
            );
            if summary.failed_workers > 0 {
                std::process::exit(1);
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "workload failed");
            std::process::exit(1);
        }
    }
}
