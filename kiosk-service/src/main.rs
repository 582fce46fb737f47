// SPDX-License-Identifier: GPL-3.0-only

//! USB hotplug kiosk daemon.
//!
//! Watches for USB block partitions, mounts them, and presents media
//! carrying the marker file full screen through an external viewer.

mod config;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use kiosk_core::{
    Dispatcher, HotplugMonitor, KioskViewer, MountManager, Presenter, SystemMounter,
};

use config::{Args, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;
    logging::init(config.log_file.as_deref());

    info!("starting usb-kiosk-service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        mount_base = %config.mount_base.display(),
        marker_file = %config.marker_file,
        display = %config.display,
        "effective configuration"
    );

    if unsafe { libc::geteuid() } != 0 {
        warn!("not running as root; mount and unmount operations will likely fail");
    }

    if let Err(e) = std::fs::create_dir_all(&config.mount_base) {
        warn!(
            mount_base = %config.mount_base.display(),
            "could not create mount base directory: {e}"
        );
    }

    // The only fatal failure: without the subscription no event will
    // ever arrive, so there is nothing to supervise.
    let monitor = match HotplugMonitor::subscribe() {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("cannot subscribe to USB hotplug events: {e}");
            return Err(e).context("hotplug subscription failed");
        }
    };

    let presenter = Presenter::new(
        config.presenter_config(),
        Arc::new(KioskViewer::new(config.viewer())),
    );
    let mounts = MountManager::new(config.mount_config(), Arc::new(SystemMounter::new()));
    let mut dispatcher = Dispatcher::new(config.dispatcher_config(), mounts, presenter);

    dispatcher.run(monitor, shutdown_signal()).await;

    info!("usb-kiosk-service stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => info!("received interrupt signal"),
                _ = terminate.recv() => info!("received terminate signal"),
            }
        }
        Err(e) => {
            warn!("could not install SIGTERM handler: {e}");
            if ctrl_c.await.is_ok() {
                info!("received interrupt signal");
            }
        }
    }
}
