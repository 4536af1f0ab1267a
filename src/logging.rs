//! Logging configuration with journald support on Linux.
//!
//! Logs go to the systemd journal when it is reachable, otherwise to a daily
//! rolling file. Interactive runs can ask for stderr output instead.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// Log level is read from `PIXSEE_LOG` (e.g. `PIXSEE_LOG=debug`,
/// `PIXSEE_LOG=pixsee::ingest=trace`) and defaults to `info`.
///
/// With `stderr` set, logs are written to the terminal and neither journald
/// nor the log file is used.
pub fn init(log_dir: Option<PathBuf>, stderr: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("PIXSEE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    if stderr {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?;
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer.with_syslog_identifier("pixsee".to_string()))
                .try_init()?;

            tracing::debug!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pixsee")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pixsee.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer flushes only while its guard is alive.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::debug!(dir = ?log_dir, "Logging initialized with file backend");
    Ok(())
}
