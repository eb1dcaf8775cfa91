//! Subscriber setup: console output plus a persistent `automation.log`.

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "automation.log";

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "lofi_worker=info,lofi_pipeline=info,lofi_core=info,lofi_suno=info,lofi_openai=info,lofi_youtube=info";

/// A plain-text layer appending to `<log_dir>/automation.log`.
///
/// Writes go through a background thread; keep the guard alive for as
/// long as events should reach the file.
pub fn file_layer<S>(log_dir: &Path) -> anyhow::Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .boxed();
    Ok((layer, guard))
}

/// Install the global subscriber. Falls back to console-only output when
/// the log file cannot be opened.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
    let (file, guard) = match file_layer(log_dir) {
        Ok((layer, guard)) => (Some(layer), Some(guard)),
        Err(e) => {
            eprintln!(
                "Warning: cannot write {} in {}: {e}",
                LOG_FILE_NAME,
                log_dir.display()
            );
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(file)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_to_the_log_file_without_ansi() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("output");
        let (layer, guard) = file_layer(&log_dir).unwrap();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(run_id = "20261016_093000", "Run started");
            tracing::warn!("Using templated metadata");
        });
        drop(guard);

        let contents = std::fs::read_to_string(log_dir.join(LOG_FILE_NAME)).unwrap();
        assert!(contents.contains("Run started"));
        assert!(contents.contains("20261016_093000"));
        assert!(contents.contains("Using templated metadata"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn unusable_log_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("output");
        std::fs::write(&blocker, b"not a directory").unwrap();

        assert!(file_layer::<tracing_subscriber::Registry>(&blocker).is_err());
    }
}
