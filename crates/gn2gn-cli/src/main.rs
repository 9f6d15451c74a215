//! gn2gn - main entry point

use anyhow::Context;
use clap::Parser;
use gn2gn_cli::{commands, Cli, Commands};
use gn2gn_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use gn2gn_sync::RunMode;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let base = LogConfig::builder()
        .level(LogLevel::from_flags(cli.verbose, cli.quiet))
        .output(LogOutput::Console)
        .log_file_prefix("gn2gn")
        .build();
    // Environment variables take precedence over flags
    let log_config = match base.clone().with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {e}");
            base
        },
    };
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {e}");
            None
        },
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            on_interrupt.cancel();
        }
    });

    match execute_command(&cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn execute_command(cli: &Cli, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Init { file, force } => {
            commands::init::run(file, *force)?;
        },

        Commands::DbInit { file } => {
            commands::db_init::run(file)
                .await
                .context("schema creation failed")?;
        },

        Commands::Full { file, run } | Commands::Update { file, run } => {
            let mode = match cli.command {
                Commands::Full { .. } => RunMode::Full,
                _ => RunMode::Incremental,
            };
            let report = commands::sync::run(file, mode, run, cancel)
                .await
                .with_context(|| format!("{} sync could not start", mode.as_str()))?;
            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        },

        Commands::Status { file } => {
            commands::status::run(file).await.context("status lookup failed")?;
        },
    }
    Ok(ExitCode::SUCCESS)
}
