// SPDX-License-Identifier: GPL-3.0-only

//! Device lifecycle core for the USB kiosk service
//!
//! This crate implements the event-driven lifecycle of removable
//! presentation media:
//! - Classification of udev hotplug events down to USB block partitions
//! - Mount/unmount orchestration through the system mount utilities
//! - Supervision of a single full-screen viewer process
//! - The dispatch loop tying hotplug events to the above
//!
//! The service binary wires these together with configuration and
//! logging and owns the process lifecycle.

pub mod device;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod mounts;
pub mod presentation;
pub mod process;

pub use device::{BlockDeviceEvent, DeviceAction, DeviceIdentity};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{KioskError, Result};
pub use monitor::HotplugMonitor;
pub use mounts::{MountConfig, MountManager, Mounter, SystemMounter};
pub use presentation::{
    DEFAULT_VIEWER_ARGS, KioskViewer, Presenter, PresenterConfig, ViewerCommand, ViewerInstance,
    ViewerLauncher,
};
