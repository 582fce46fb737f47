// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use thiserror::Error;

/// Errors produced by the device lifecycle core.
#[derive(Debug, Error)]
pub enum KioskError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to run {command}: {source}")]
    CommandSpawn { command: String, source: io::Error },

    #[error("mount of {device} at {target} failed: {stderr}")]
    MountFailed {
        device: String,
        target: String,
        stderr: String,
    },

    #[error("unmount of {target} failed: {stderr}")]
    UnmountFailed { target: String, stderr: String },

    #[error("viewer launch failed: {0}")]
    ViewerSpawn(#[source] io::Error),

    #[error("no viewer binary found (tried {tried})")]
    ViewerNotFound { tried: String },
}

pub type Result<T> = std::result::Result<T, KioskError>;
