use std::{fs, path::Path};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::{AppConfig, DiagnosticsConfig};

pub const DEFAULT_LOG_FILTER: &str = "info,varitrack_core=debug";

/// Keeps the session's JSON log flushing until dropped.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_file: String,
    _file_guard: WorkerGuard,
}

/// Installs stdout and JSON-file logging for one CLI session and records
/// where the session reads its library and settings from.
pub fn init_tracing(config: &AppConfig) -> anyhow::Result<TelemetryGuard> {
    let diagnostics = &config.diagnostics;
    let log_dir = diagnostics.logs_directory.as_path();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let log_file = session_log_name(diagnostics, Utc::now());
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &log_file));

    let installed = tracing_subscriber::registry()
        .with(session_filter(diagnostics))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_thread_names(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_names(true)
                .with_writer(file_writer),
        )
        .try_init();

    match installed {
        Ok(()) => log_session_start(config, session_id, log_dir),
        Err(error) => warn!(?error, "tracing subscriber already installed, keeping it"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _file_guard: file_guard,
    })
}

fn session_filter(diagnostics: &DiagnosticsConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&diagnostics.rust_log_filter))
        .unwrap_or_else(|error| {
            eprintln!(
                "invalid log filter {:?} ({error}), using {DEFAULT_LOG_FILTER}",
                diagnostics.rust_log_filter
            );
            EnvFilter::new(DEFAULT_LOG_FILTER)
        })
}

fn session_log_name(diagnostics: &DiagnosticsConfig, started: DateTime<Utc>) -> String {
    let prefix = diagnostics.trace_file_prefix.trim();
    let prefix = if prefix.is_empty() { "varitrack" } else { prefix };
    format!("{prefix}-{}.log", started.format("%Y%m%d-%H%M%S"))
}

fn log_session_start(config: &AppConfig, session_id: Uuid, log_dir: &Path) {
    info!(
        %session_id,
        log_dir = %log_dir.display(),
        library = %config.library.directory.display(),
        settings = %config.settings.path.display(),
        exports = %config.export.output_directory.display(),
        "varitrack session started"
    );
}
