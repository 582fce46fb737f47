// SPDX-License-Identifier: GPL-3.0-only

//! Classification of udev block events and extraction of device
//! identity.
//!
//! Everything here is read-only with respect to the system: the
//! classifier inspects the event's device tree and properties and
//! produces the value types the dispatcher routes on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Hotplug action the dispatcher acts on. All other udev actions
/// (change, bind, unbind) are dropped at classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceAction {
    Add,
    Remove,
}

/// Stable identity of a USB block partition, derived once per event.
///
/// `device_path` is the join key between mount records and removal
/// events. `label` is always non-empty and safe to use as a directory
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_path: PathBuf,
    pub label: String,
    pub uuid: Option<String>,
    pub fs_type: Option<String>,
}

/// A hotplug notification after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceEvent {
    pub action: DeviceAction,
    pub identity: DeviceIdentity,
}

/// True iff the device or any ancestor in its parent chain belongs to
/// the `usb` subsystem.
pub fn is_usb_device(device: &udev::Device) -> bool {
    chain_contains_usb(subsystem_chain(device).iter().map(|s| s.as_str()))
}

/// Subsystem names along the device's parent chain, device first.
///
/// Entries whose subsystem cannot be read are dropped; an unreadable
/// device tree must never take the event loop down, it just fails to
/// match.
fn subsystem_chain(device: &udev::Device) -> Vec<String> {
    let mut chain = Vec::new();
    if let Some(subsystem) = device.subsystem() {
        chain.push(subsystem.to_string_lossy().into_owned());
    }
    let mut ancestor = device.parent();
    while let Some(current) = ancestor {
        if let Some(subsystem) = current.subsystem() {
            chain.push(subsystem.to_string_lossy().into_owned());
        }
        ancestor = current.parent();
    }
    chain
}

fn chain_contains_usb<'a>(subsystems: impl IntoIterator<Item = &'a str>) -> bool {
    subsystems.into_iter().any(|subsystem| subsystem == "usb")
}

/// Reads the identity of a partition device. `None` when the event
/// carries no device node to act on.
pub fn identify(device: &udev::Device) -> Option<DeviceIdentity> {
    let device_path = device.devnode()?.to_path_buf();
    let label = match property_string(device, "ID_FS_LABEL") {
        Some(raw) => effective_label(&raw, &device_path),
        None => fallback_label(&device_path),
    };
    Some(DeviceIdentity {
        label,
        uuid: property_string(device, "ID_FS_UUID"),
        fs_type: property_string(device, "ID_FS_TYPE"),
        device_path,
    })
}

fn property_string(device: &udev::Device, key: &str) -> Option<String> {
    device
        .property_value(key)
        .map(|value| value.to_string_lossy().into_owned())
}

/// Translates a raw udev event into the dispatcher's model. `None` for
/// ignored actions, non-USB devices, and nodeless devices.
pub fn classify_event(event: &udev::Event) -> Option<BlockDeviceEvent> {
    let action = classify_action(event.event_type())?;
    let device = event.device();
    if !is_usb_device(&device) {
        return None;
    }
    let identity = identify(&device)?;
    Some(BlockDeviceEvent { action, identity })
}

/// Routes only add and remove; change, bind, unbind, and unknown
/// actions never reach mount logic.
fn classify_action(event_type: udev::EventType) -> Option<DeviceAction> {
    match event_type {
        udev::EventType::Add => Some(DeviceAction::Add),
        udev::EventType::Remove => Some(DeviceAction::Remove),
        _ => None,
    }
}

/// Label actually used for the mount-point directory: the sanitized
/// filesystem label, or the device-derived fallback when sanitizing
/// leaves nothing usable.
pub fn effective_label(raw_label: &str, device_path: &Path) -> String {
    match sanitize_label(raw_label) {
        Some(label) => label,
        None => fallback_label(device_path),
    }
}

/// Reduces a filesystem label to a safe directory name.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`. Labels that end up
/// empty, all underscores, or pure dot sequences are rejected so the
/// mount point can never escape or shadow its base directory.
pub fn sanitize_label(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty()
        || cleaned.chars().all(|c| c == '_')
        || cleaned.chars().all(|c| c == '.')
    {
        return None;
    }
    Some(cleaned)
}

/// `usb_<node basename>`, e.g. `/dev/sdb1` becomes `usb_sdb1`.
pub fn fallback_label(device_path: &Path) -> String {
    let base = device_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device".to_string());
    format!("usb_{base}")
}
