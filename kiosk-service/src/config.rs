// SPDX-License-Identifier: GPL-3.0-only

//! Service configuration: documented defaults, an optional TOML file,
//! and CLI flags, merged in that order (CLI wins).

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use kiosk_core::{
    DEFAULT_VIEWER_ARGS, DispatcherConfig, MountConfig, PresenterConfig, ViewerCommand,
};

pub const DEFAULT_MOUNT_BASE: &str = "/mnt/kiosk";
pub const DEFAULT_MARKER_FILE: &str = "index.html";
pub const DEFAULT_LOG_FILE: &str = "/var/log/usb-kiosk/usb-kiosk.log";
pub const DEFAULT_DISPLAY: &str = ":0";

#[derive(Debug, Parser)]
#[command(
    name = "usb-kiosk-service",
    about = "Mounts inserted USB media and presents marked content full screen",
    version
)]
pub struct Args {
    /// TOML configuration file; flags given here override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory under which devices are mounted.
    #[arg(long)]
    pub mount_base: Option<PathBuf>,

    /// Marker filename that triggers presentation.
    #[arg(long)]
    pub marker_file: Option<String>,

    /// Base path for the daily-rolled log file (stdout is always logged as well).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Disable the file log sink entirely.
    #[arg(long)]
    pub no_log_file: bool,

    /// X display the viewer is started on.
    #[arg(long)]
    pub display: Option<String>,

    /// Seconds to wait after insertion before mounting.
    #[arg(long)]
    pub settle_delay_secs: Option<u64>,

    /// Seconds between viewer dismissal and unmounting.
    #[arg(long)]
    pub unmount_grace_secs: Option<u64>,

    /// Seconds between clearing old viewers and launching the new one.
    #[arg(long)]
    pub launch_settle_secs: Option<u64>,

    /// Per-unmount time budget during shutdown cleanup, in seconds.
    #[arg(long)]
    pub cleanup_timeout_secs: Option<u64>,

    /// Viewer binary; autodetected when omitted.
    #[arg(long)]
    pub viewer_command: Option<PathBuf>,

    /// Substring identifying viewer processes for broad termination.
    #[arg(long)]
    pub viewer_pattern: Option<String>,
}

/// Keys accepted in the TOML config file. `viewer_args` has no CLI
/// counterpart; flag lists belong in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    mount_base: Option<PathBuf>,
    marker_file: Option<String>,
    /// Base path; the file sink starts a dated file each day.
    log_file: Option<PathBuf>,
    display: Option<String>,
    settle_delay_secs: Option<u64>,
    unmount_grace_secs: Option<u64>,
    launch_settle_secs: Option<u64>,
    cleanup_timeout_secs: Option<u64>,
    viewer_command: Option<PathBuf>,
    viewer_args: Option<Vec<String>>,
    viewer_pattern: Option<String>,
}

/// Effective service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mount_base: PathBuf,
    pub marker_file: String,
    pub log_file: Option<PathBuf>,
    pub display: String,
    pub settle_delay: Duration,
    pub unmount_grace: Duration,
    pub launch_settle: Duration,
    pub cleanup_timeout: Duration,
    pub viewer_command: Option<PathBuf>,
    pub viewer_args: Vec<String>,
    pub viewer_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_base: PathBuf::from(DEFAULT_MOUNT_BASE),
            marker_file: DEFAULT_MARKER_FILE.to_string(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            display: DEFAULT_DISPLAY.to_string(),
            settle_delay: Duration::from_secs(2),
            unmount_grace: Duration::from_secs(2),
            launch_settle: Duration::from_secs(1),
            cleanup_timeout: Duration::from_secs(10),
            viewer_command: None,
            viewer_args: DEFAULT_VIEWER_ARGS.iter().map(|s| s.to_string()).collect(),
            viewer_pattern: "chromium".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the config file (if any), then CLI flags.
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = &args.config {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let file: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            config.apply_file(file);
        }
        config.apply_args(args);
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.mount_base {
            self.mount_base = v;
        }
        if let Some(v) = file.marker_file {
            self.marker_file = v;
        }
        if let Some(v) = file.log_file {
            self.log_file = Some(v);
        }
        if let Some(v) = file.display {
            self.display = v;
        }
        if let Some(v) = file.settle_delay_secs {
            self.settle_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.unmount_grace_secs {
            self.unmount_grace = Duration::from_secs(v);
        }
        if let Some(v) = file.launch_settle_secs {
            self.launch_settle = Duration::from_secs(v);
        }
        if let Some(v) = file.cleanup_timeout_secs {
            self.cleanup_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.viewer_command {
            self.viewer_command = Some(v);
        }
        if let Some(v) = file.viewer_args {
            self.viewer_args = v;
        }
        if let Some(v) = file.viewer_pattern {
            self.viewer_pattern = v;
        }
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(v) = &args.mount_base {
            self.mount_base = v.clone();
        }
        if let Some(v) = &args.marker_file {
            self.marker_file = v.clone();
        }
        if let Some(v) = &args.log_file {
            self.log_file = Some(v.clone());
        }
        if args.no_log_file {
            self.log_file = None;
        }
        if let Some(v) = &args.display {
            self.display = v.clone();
        }
        if let Some(v) = args.settle_delay_secs {
            self.settle_delay = Duration::from_secs(v);
        }
        if let Some(v) = args.unmount_grace_secs {
            self.unmount_grace = Duration::from_secs(v);
        }
        if let Some(v) = args.launch_settle_secs {
            self.launch_settle = Duration::from_secs(v);
        }
        if let Some(v) = args.cleanup_timeout_secs {
            self.cleanup_timeout = Duration::from_secs(v);
        }
        if let Some(v) = &args.viewer_command {
            self.viewer_command = Some(v.clone());
        }
        if let Some(v) = &args.viewer_pattern {
            self.viewer_pattern = v.clone();
        }
    }

    pub fn mount_config(&self) -> MountConfig {
        MountConfig {
            mount_base: self.mount_base.clone(),
            unmount_grace: self.unmount_grace,
            cleanup_timeout: self.cleanup_timeout,
        }
    }

    pub fn presenter_config(&self) -> PresenterConfig {
        PresenterConfig {
            marker_file: self.marker_file.clone(),
            launch_settle: self.launch_settle,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            settle_delay: self.settle_delay,
        }
    }

    pub fn viewer(&self) -> ViewerCommand {
        ViewerCommand {
            program: self.viewer_command.clone(),
            args: self.viewer_args.clone(),
            display: self.display.clone(),
            pattern: self.viewer_pattern.clone(),
        }
    }
}
