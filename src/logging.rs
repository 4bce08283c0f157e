//! # Structured Logging Module
//!
//! Environment-aware structured logging. Console output always goes to stderr,
//! since a worker's stdout carries the pool protocol. When `POOL_LOG_DIR` is set a
//! JSON file layer is added as well.

use chrono::Utc;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants::env;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Default level for worker processes, whose stderr is shared with the parent.
pub const WORKER_LOG_LEVEL: &str = "info";

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    init_logging(None);
}

/// Initialize logging inside a worker process. `RUST_LOG` still overrides the level.
pub fn init_worker_logging() {
    init_logging(Some(WORKER_LOG_LEVEL));
}

fn init_logging(level_override: Option<&str>) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = resolve_log_level(level_override, &environment);
        let pid = process::id();

        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_filter(env_filter(&log_level));

        let (file_layer, log_path) = match std::env::var(env::LOG_DIR).ok().map(PathBuf::from) {
            Some(log_dir) => {
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
                let log_filename = format!("{environment}.{pid}.{timestamp}.log");
                let log_path = log_dir.join(&log_filename);

                let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                // Logging lives for the whole process.
                std::mem::forget(guard);

                let layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(env_filter(&log_level));
                (Some(layer), Some(log_path))
            }
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry().with(console).with(file_layer);
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid,
            environment = %environment,
            log_file = ?log_path,
            "Structured logging initialized"
        );
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env::ENVIRONMENT)
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn resolve_log_level(level_override: Option<&str>, environment: &str) -> String {
    level_override
        .map(str::to_string)
        .unwrap_or_else(|| get_log_level(environment))
}

/// Log structured data for slot lifecycle operations
pub fn log_slot_operation(
    operation: &str,
    slot_index: usize,
    pid: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        slot_index,
        pid,
        status = %status,
        details,
        timestamp = %Utc::now().to_rfc3339(),
        "SLOT_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
    }

    #[test]
    fn test_worker_level_ignores_environment() {
        assert_eq!(resolve_log_level(Some(WORKER_LOG_LEVEL), "development"), "info");
        assert_eq!(resolve_log_level(Some(WORKER_LOG_LEVEL), "test"), "info");
        assert_eq!(resolve_log_level(None, "development"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_slot_operation("spawn", 0, Some(1), "ok", None);
    }
}
