// SPDX-License-Identifier: GPL-3.0-only

//! Event loop tying hotplug notifications to mounting and
//! presentation.
//!
//! Every per-event failure ends as a log line, never as loop
//! termination; the only fatal error in the system is a failed
//! subscription, which happens before a dispatcher exists.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::device::{BlockDeviceEvent, DeviceAction, DeviceIdentity};
use crate::monitor::HotplugMonitor;
use crate::mounts::MountManager;
use crate::presentation::Presenter;

/// Tunables for event handling.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Wait after an add event before mounting, so the kernel can
    /// finish bringing the partition up.
    pub settle_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Routes add/remove events to the mount manager and presenter.
pub struct Dispatcher {
    config: DispatcherConfig,
    mounts: MountManager,
    presenter: Presenter,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, mounts: MountManager, presenter: Presenter) -> Self {
        Self {
            config,
            mounts,
            presenter,
        }
    }

    /// Mount state, for inspection.
    pub fn mounts(&self) -> &MountManager {
        &self.mounts
    }

    /// Consumes events until `shutdown` completes, then dismisses the
    /// viewer and unmounts everything still recorded.
    ///
    /// The in-flight event finishes before a shutdown signal takes
    /// effect; monitor read errors are logged and the loop carries on.
    pub async fn run<S>(&mut self, mut monitor: HotplugMonitor, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!("watching for USB storage events");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                event = monitor.next_event() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(e) => error!("hotplug monitor read failed: {e}"),
                },
            }
        }
        self.shutdown().await;
    }

    /// Handles one classified event. Public so the lifecycle can be
    /// driven without a udev socket.
    pub async fn handle_event(&mut self, event: BlockDeviceEvent) {
        match event.action {
            DeviceAction::Add => self.handle_add(event.identity).await,
            DeviceAction::Remove => self.handle_remove(event.identity).await,
        }
    }

    async fn handle_add(&mut self, identity: DeviceIdentity) {
        info!(
            device = %identity.device_path.display(),
            label = %identity.label,
            "USB device inserted"
        );
        tokio::time::sleep(self.config.settle_delay).await;

        match self.mounts.mount(&identity).await {
            Ok(mount_point) => {
                // Launch on its own task so a slow viewer start cannot
                // stall event handling.
                let presenter = self.presenter.clone();
                tokio::spawn(async move {
                    if let Err(e) = presenter.present(&mount_point).await {
                        warn!(
                            mount_point = %mount_point.display(),
                            "presentation failed: {e}"
                        );
                    }
                });
            }
            Err(e) => {
                error!(device = %identity.device_path.display(), "mount failed: {e}");
            }
        }
    }

    async fn handle_remove(&mut self, identity: DeviceIdentity) {
        info!(device = %identity.device_path.display(), "USB device removed");

        match self.mounts.unmount(&identity, &self.presenter).await {
            Ok(Some(mount_point)) => {
                debug!(mount_point = %mount_point.display(), "removal handled");
            }
            Ok(None) => {
                debug!(
                    device = %identity.device_path.display(),
                    "device was not mounted by this service"
                );
            }
            Err(e) => {
                error!(device = %identity.device_path.display(), "unmount failed: {e}");
                // The device is gone; keeping the record would only make
                // every future remove fail the same way.
                if let Some(stale) = self.mounts.forget(&identity.device_path) {
                    warn!(
                        mount_point = %stale.display(),
                        "dropped record for removed device, mount point may need manual cleanup"
                    );
                }
            }
        }
    }

    /// Final teardown: viewer first, then best-effort unmounts.
    pub async fn shutdown(&mut self) {
        self.presenter.dismiss().await;
        self.mounts.shutdown_cleanup().await;
        info!("shutdown complete");
    }
}
