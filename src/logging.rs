use std::{
    fs::{self, File, OpenOptions},
    path::Path,
    sync::Mutex,
};

use chrono::Local;
use tracing_subscriber::{
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Copy)]
struct LocalTimestamp;

impl FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

pub(crate) fn open_log_file(log_path: &Path) -> Result<File, String> {
    if let Some(parent_dir) = log_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|error| {
            format!(
                "Failed to create log directory {}: {}",
                parent_dir.display(),
                error
            )
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|error| format!("Failed to open log file {}: {}", log_path.display(), error))
}

/// Installs the global subscriber: stderr plus an append-only log file.
///
/// A log file that cannot be opened is reported once and otherwise ignored.
pub(crate) fn init_logging(log_path: &Path) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_timer(LocalTimestamp)
        .with_writer(std::io::stderr);

    let (file_layer, file_error) = match open_log_file(log_path) {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_timer(LocalTimestamp)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(error) => (None, Some(error)),
    };

    if let Err(error) = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("failed to install log subscriber: {error}");
        return;
    }

    if let Some(error) = file_error {
        tracing::warn!("{error}; logging to stderr only");
    }
}

pub(crate) fn append_desktop_log(message: &str) {
    tracing::info!("[desktop] {message}");
}

pub(crate) fn append_startup_log(message: &str) {
    tracing::info!("[startup] {message}");
}

pub(crate) fn append_shutdown_log(message: &str) {
    tracing::info!("[shutdown] {message}");
}

pub(crate) fn append_rpc_log(message: &str) {
    tracing::info!("[rpc] {message}");
}

pub(crate) fn append_lifecycle_log(message: &str) {
    tracing::info!("[lifecycle] {message}");
}
