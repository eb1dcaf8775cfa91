//! lofi-worker: generate lo-fi music videos and upload them to YouTube.
//!
//! Reads credentials and tuning from the environment (a `.env` file is
//! loaded first, see [`lofi_worker::config::WorkerConfig::from_env`]) and
//! batch options from the command line. Logs go to stdout and to
//! `automation.log` in the output directory.
//!
//! Exit status: 0 when every run completed, 1 when a run failed, the
//! batch was aborted, or startup or upload authorization failed, 130
//! when interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lofi_worker::app::{self, Outcome};
use lofi_worker::cli::Cli;
use lofi_worker::config::WorkerConfig;
use lofi_worker::logging;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();

    let log_dir = config
        .as_ref()
        .map_or_else(|_| PathBuf::from("."), |config| config.output_dir.clone());
    let _log_guard = logging::init(&log_dir);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration, check your .env file");
            return ExitCode::FAILURE;
        }
    };

    let mut pipeline = match app::build_pipeline(&config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize pipeline");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        output_dir = %config.output_dir.display(),
        count = cli.count,
        "Worker starting",
    );

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn(app::cancel_on_signal(cancel.clone()));

    let outcome = app::run_batch_until_cancelled(&mut pipeline, &cli.batch_options(), &cancel).await;
    signal_task.abort();
    drop(pipeline);

    match &outcome {
        Outcome::Finished(summary) if !summary.all_succeeded() => {
            tracing::warn!(failed_runs = ?summary.failed_run_ids, "Worker finished with failures");
        }
        Outcome::Finished(_) => tracing::info!("Worker finished"),
        Outcome::Unauthorized(_) => tracing::warn!("Worker stopped before the first run"),
        Outcome::Interrupted => tracing::info!("Worker stopped by signal"),
    }

    ExitCode::from(outcome.exit_code())
}
