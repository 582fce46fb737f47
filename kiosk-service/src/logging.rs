// SPDX-License-Identifier: GPL-3.0-only

//! Dual-sink logging: stdout always, plus a non-blocking file appender
//! when a log path is configured and usable.
//!
//! The file sink rolls daily: the configured path is the base name and
//! each day's file carries a date suffix. Rolled files older than the
//! retention window are pruned at startup.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Initializes tracing. `RUST_LOG` overrides the default `info`
/// filter. A failure to open the log file downgrades to stdout-only
/// logging; the service keeps running.
pub fn init(log_file: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let Some(log_file) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .init();
        return;
    };

    match file_writer(log_file) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_timer(tracing_subscriber::fmt::time::SystemTime);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();

            // The non-blocking writer flushes only while its guard lives.
            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("usb-kiosk-service: file log sink unavailable, continuing on stdout: {e:#}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
        }
    }
}

fn file_writer(
    log_file: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let (dir, prefix) = split_log_path(log_file);

    fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("could not create log directory {}: {e}", dir.display()))?;

    cleanup_old_logs(&dir, &prefix);

    let appender = tracing_appender::rolling::daily(&dir, &prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, guard))
}

/// Splits the configured file path into the rolling appender's
/// directory and file-name prefix.
fn split_log_path(log_file: &Path) -> (PathBuf, OsString) {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = log_file
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("usb-kiosk.log"));
    (dir, prefix)
}

/// Removes rolled log files older than the retention window.
/// Best-effort; every failure is ignored.
fn cleanup_old_logs(dir: &Path, prefix: &OsString) {
    let Some(cutoff) = SystemTime::now().checked_sub(LOG_RETENTION) else {
        return;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let prefix = prefix.to_string_lossy();
    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        // Files without the log prefix are not ours to delete.
        if !entry.file_name().to_string_lossy().starts_with(&*prefix) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if stale {
            let _ = fs::remove_file(entry.path());
        }
    }
}
