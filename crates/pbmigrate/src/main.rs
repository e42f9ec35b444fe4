mod cli;
mod commands;

use std::fs;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use config::{ConfigStore, LogConfig, MigratorConfig};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = init_logger(&config.log);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to create tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(commands::run(cli.command, &config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// File, then environment, then command line flags.
fn load_config(cli: &Cli) -> Result<MigratorConfig> {
    let store = match &cli.config {
        Some(path) => ConfigStore::from_file(path),
        None => ConfigStore::from_default_location()?,
    };
    let mut config = store.load_or_init()?;
    config.apply_env();
    cli.apply_to(&mut config);
    Ok(config)
}

fn init_logger(log: &LogConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let Some(log_dir) = &log.dir else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    };

    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "pbmigrate.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    Some(guard)
}
