//! Test utilities for temper-exporter
//!
//! Provides a scripted stand-in for a hidraw node and helpers for building
//! device handles, shared by the unit and integration tests of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::FakeHidraw;
//! use protocol::{READ_TEMPER, TEMPER_REPLY, request};
//!
//! let mut dev = FakeHidraw::new()
//!     .with_response(&READ_TEMPER.bytes, &[&[0x80, 0x04, 0x0c, 0x80, 0x0c, 0x80, 0, 0][..]]);
//! let payload = request(&mut dev, &READ_TEMPER, TEMPER_REPLY).unwrap();
//! assert_eq!(payload, vec![0x0c, 0x80, 0x0c, 0x80]);
//! ```

use crate::hid_types::HidrawDevice;
use protocol::{GET_VERSION, REPORT_LEN, Transport};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Version reported by a fresh [`FakeHidraw`]
pub const FAKE_VERSION: &str = "mock_temper_devi";

#[derive(Debug, Default)]
struct FakeState {
    replies: HashMap<[u8; REPORT_LEN], Vec<Vec<u8>>>,
    pending: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    short_writes: bool,
    disconnected: bool,
    fail_close: bool,
    closed: bool,
}

/// Scripted hidraw node
///
/// Writing a known command queues its canned reports, each read pops one.
/// Writing a command with no scripted reply fails like an unplugged device,
/// and reading with nothing queued fails with `WouldBlock`. Clones share
/// state, so a test can keep a handle after giving one to a driver.
#[derive(Debug, Clone)]
pub struct FakeHidraw {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeHidraw {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHidraw {
    /// A device that answers `get_version` with [`FAKE_VERSION`]
    pub fn new() -> Self {
        let (first, second) = FAKE_VERSION.as_bytes().split_at(REPORT_LEN);
        Self::silent().with_response(&GET_VERSION.bytes, &[first, second])
    }

    /// A device with no scripted replies at all
    pub fn silent() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    /// Answer `command` with `reports`, replacing any previous script
    pub fn with_response(self, command: &[u8; REPORT_LEN], reports: &[&[u8]]) -> Self {
        self.lock()
            .replies
            .insert(*command, reports.iter().map(|r| r.to_vec()).collect());
        self
    }

    /// Accept only part of every further write
    pub fn truncate_writes(&self) {
        self.lock().short_writes = true;
    }

    /// Make `close` report an error
    pub fn fail_close(self) -> Self {
        self.lock().fail_close = true;
        self
    }

    /// Fail all further I/O, as if the device had been pulled
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Every frame written so far, report id included
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for FakeHidraw {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed || state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        state.written.push(buf.to_vec());

        if buf.len() != REPORT_LEN + 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad report size"));
        }
        let mut key = [0u8; REPORT_LEN];
        key.copy_from_slice(&buf[1..]);
        let reports = state
            .replies
            .get(&key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "unknown command"))?;
        state.pending.extend(reports);

        if state.short_writes {
            Ok(buf.len() / 2)
        } else {
            Ok(buf.len())
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for FakeHidraw {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed || state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        let report = state
            .pending
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no report queued"))?;
        let n = report.len().min(buf.len());
        buf[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }
}

impl Transport for FakeHidraw {
    fn close(self: Box<Self>) -> io::Result<()> {
        let mut state = self.lock();
        state.closed = true;
        if state.fail_close {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}

/// Build a device handle as udev would report it for `syspath`
///
/// The device node is `/dev/<last path component>`.
pub fn mock_hidraw_device(syspath: &str, modalias: Option<&str>) -> HidrawDevice {
    let mut device = HidrawDevice::new(syspath).with_hid_phys(format!("{syspath}/phys"));
    if let Some(name) = Path::new(syspath).file_name() {
        device = device.with_devnode(Path::new("/dev").join(name));
    }
    if let Some(modalias) = modalias {
        device = device.with_interface_modalias(modalias);
    }
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::read_version;

    #[test]
    fn test_fake_reports_version() {
        let mut dev = FakeHidraw::new();
        assert_eq!(read_version(&mut dev).unwrap(), FAKE_VERSION);
        assert_eq!(dev.written().len(), 1);
    }

    #[test]
    fn test_unknown_command_fails() {
        let mut dev = FakeHidraw::silent();
        assert!(dev.write(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_close_is_observable_through_clones() {
        let dev = FakeHidraw::new().fail_close();
        let handle = dev.clone();
        assert!(Box::new(dev).close().is_err());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_mock_device_devnode() {
        let device = mock_hidraw_device("/sys/class/hidraw/hidraw7", Some("usb:v0C45p7401"));
        assert_eq!(device.devnode.as_deref(), Some(Path::new("/dev/hidraw7")));
        assert_eq!(device.interface_modalias.as_deref(), Some("usb:v0C45p7401"));
    }
}
