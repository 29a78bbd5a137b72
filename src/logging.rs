//! Tracing subscriber setup.
//!
//! Installs an `EnvFilter` (config `level`, overridden by `RUST_LOG`), a
//! console layer on stderr (stdout is reserved for command output) and,
//! when `log_dir` is configured, a daily-rolling file layer. The file
//! writer's guard is parked in a static so buffered lines are flushed for
//! the life of the process.

use std::path::Path;
use std::sync::OnceLock;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_PREFIX: &str = "ragctx.log";

pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    // The subscriber is not installed yet, so a failure here is reported
    // once it is.
    let mut dir_error = None;
    let file_layer = config.log_dir.as_ref().and_then(|dir| {
        if let Err(message) = prepare_log_dir(dir) {
            dir_error = Some(message);
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
    });

    // A second init (tests, embedding in another binary) is not an error.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Some(message) = dir_error {
        warn!("{}, logging to console only", message);
    }
}

fn prepare_log_dir(dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create log_dir {}: {}", dir.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_log_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("logs");
        prepare_log_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_prepare_log_dir_reports_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let err = prepare_log_dir(&file.join("logs")).unwrap_err();
        assert!(err.starts_with("cannot create log_dir"), "{}", err);
    }
}
