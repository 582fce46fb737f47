// SPDX-License-Identifier: GPL-3.0-only

//! Async hotplug event source over the udev monitor socket.

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

use crate::device::{self, BlockDeviceEvent};
use crate::error::Result;

/// Streams classified block-partition hotplug events.
///
/// Wraps a udev monitor socket registered with the tokio reactor.
/// Events that do not concern USB block partitions are consumed and
/// dropped inside [`HotplugMonitor::next_event`].
pub struct HotplugMonitor {
    socket: AsyncFd<udev::MonitorSocket>,
}

impl HotplugMonitor {
    /// Opens the udev monitor filtered to block-device partitions.
    ///
    /// This is the one fatal initialization point of the service: a
    /// failure here means no events will ever arrive. Must be called
    /// from within a tokio runtime.
    pub fn subscribe() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("block", "partition")?
            .listen()?;
        let socket = AsyncFd::with_interest(socket, Interest::READABLE)?;
        debug!("subscribed to udev block partition events");
        Ok(Self { socket })
    }

    /// Waits for the next relevant event. Irrelevant events are
    /// consumed and skipped.
    pub async fn next_event(&mut self) -> Result<BlockDeviceEvent> {
        loop {
            let mut guard = self.socket.readable().await?;
            if let Some(event) = self.next_buffered() {
                return Ok(event);
            }
            guard.clear_ready();
        }
    }

    /// Drains buffered socket events until one classifies.
    fn next_buffered(&self) -> Option<BlockDeviceEvent> {
        for event in self.socket.get_ref().iter() {
            match device::classify_event(&event) {
                Some(classified) => return Some(classified),
                None => trace!(
                    action = ?event.event_type(),
                    syspath = %event.syspath().display(),
                    "ignoring hotplug event"
                ),
            }
        }
        None
    }
}
