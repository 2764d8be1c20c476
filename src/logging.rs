//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and,
//! optionally, to a JSON log file for debugging long-running orchestration
//! flows after the fact.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        if std::env::var("FLOWLINE_LOG_TO_FILE").is_ok() {
            let log_dir = PathBuf::from("log");
            if !log_dir.exists() {
                if let Err(e) = fs::create_dir_all(&log_dir) {
                    eprintln!("Failed to create log directory: {e}");
                    return;
                }
            }

            let pid = process::id();
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let file_appender = tracing_appender::rolling::never(
                &log_dir,
                format!("{environment}.{pid}.{timestamp}.log"),
            );
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

            let subscriber = tracing_subscriber::registry().with(console_layer).with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level)),
            );

            if subscriber.try_init().is_err() {
                tracing::debug!("Global tracing subscriber already initialized");
            }

            // The guard must outlive the process for the non-blocking writer
            // to keep flushing.
            std::mem::forget(guard);
        } else {
            let subscriber = tracing_subscriber::registry().with(console_layer);
            if subscriber.try_init().is_err() {
                tracing::debug!("Global tracing subscriber already initialized");
            }
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("FLOWLINE_ENV")
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

/// Log structured data for job lifecycle operations
pub fn log_job_operation(
    operation: &str,
    job_id: Option<i64>,
    owner_ref: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id,
        owner_ref = owner_ref,
        status = %status,
        details = details,
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for step invocations
pub fn log_step_operation(
    operation: &str,
    job_id: Option<i64>,
    step_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id,
        step_id = step_id,
        status = %status,
        details = details,
        "🔧 STEP_OPERATION"
    );
}
