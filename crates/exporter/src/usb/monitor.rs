//! Hotplug listener thread
//!
//! Receives hidraw add/remove events from the udev netlink monitor and feeds
//! them to the collector one at a time. udev handles cannot leave the thread
//! that created them, so the monitor socket is opened inside [`run`] and
//! readiness is reported back over a channel; coldplug enumeration must wait
//! for it.
//!
//! The thread blocks in `poll(2)` on the monitor socket and on one end of a
//! socketpair. Writing a byte to the other end ([`HotplugStopHandle`]) wakes
//! it up for shutdown.
//!
//! [`run`]: HotplugListener::run

use super::device::{HIDRAW_SUBSYSTEM, action_for, capture};
use crate::collector::SensorCollector;
use async_channel::Sender;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct HotplugListener {
    collector: SensorCollector,
    wake_rx: UnixStream,
    wake_tx: Arc<UnixStream>,
}

/// Wakes a [`HotplugListener`] so that it exits
#[derive(Debug, Clone)]
pub struct HotplugStopHandle {
    wake_tx: Arc<UnixStream>,
}

impl HotplugStopHandle {
    pub fn send_stop(&self) {
        if let Err(e) = (&*self.wake_tx).write_all(&[1]) {
            warn!("Failed to wake hotplug listener: {}", e);
        }
    }
}

impl HotplugListener {
    pub fn new(collector: SensorCollector) -> io::Result<Self> {
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        Ok(Self {
            collector,
            wake_rx,
            wake_tx: Arc::new(wake_tx),
        })
    }

    pub fn stop_handle(&self) -> HotplugStopHandle {
        HotplugStopHandle {
            wake_tx: Arc::clone(&self.wake_tx),
        }
    }

    /// Listen for events until stopped
    ///
    /// `ready` receives `Ok(())` once events are being buffered, or the
    /// error that prevented opening the monitor (in which case this returns
    /// immediately).
    pub fn run(&self, ready: Sender<io::Result<()>>) {
        let socket = match open_monitor() {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to open udev monitor: {}", e);
                let _ = ready.send_blocking(Err(e));
                return;
            }
        };
        info!("Listening for {} hotplug events", HIDRAW_SUBSYSTEM);
        let _ = ready.send_blocking(Ok(()));

        loop {
            let mut fds = [
                PollFd::new(socket.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("poll on udev monitor failed: {}", e);
                    break;
                }
            }

            if fired(&fds[1]) {
                debug!("Hotplug listener woken for shutdown");
                break;
            }
            if fired(&fds[0]) {
                self.drain(&socket);
            }
        }

        info!("Hotplug listener stopped");
    }

    /// Handle every event currently queued on the monitor socket
    fn drain(&self, socket: &udev::MonitorSocket) {
        for event in socket.iter() {
            let Some(action) = action_for(event.event_type()) else {
                continue;
            };
            let device = capture(&event, action);
            debug!("udev {} event for {}", action, device);

            let collector = &self.collector;
            if let Err(e) =
                panic::catch_unwind(AssertUnwindSafe(|| collector.handle_device_event(&device)))
            {
                error!(
                    "Panic while handling {} of {}: {}",
                    action,
                    device,
                    crate::health::panic_message(e.as_ref())
                );
            }
        }
    }
}

fn fired(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| !events.is_empty())
}

fn open_monitor() -> io::Result<udev::MonitorSocket> {
    udev::MonitorBuilder::new()?
        .match_subsystem(HIDRAW_SUBSYSTEM)?
        .listen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::Matcher;

    fn listener() -> HotplugListener {
        HotplugListener::new(SensorCollector::new(Matcher::new())).unwrap()
    }

    #[test]
    fn test_idle_wake_socket_does_not_fire() {
        let listener = listener();
        let mut fds = [PollFd::new(listener.wake_rx.as_fd(), PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 0);
        assert!(!fired(&fds[0]));
    }

    #[test]
    fn test_stop_handle_wakes_poll() {
        let listener = listener();
        listener.stop_handle().send_stop();

        let mut fds = [PollFd::new(listener.wake_rx.as_fd(), PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 1);
        assert!(fired(&fds[0]));
    }
}
