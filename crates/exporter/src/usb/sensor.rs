//! Sensor driver plumbing
//!
//! A [`HidSensor`] owns one open report channel to a hidraw node and speaks
//! one [`SensorProtocol`] over it. The channel is opened and the firmware
//! version read once at construction; a sensor that fails the handshake
//! never exists, and its channel is closed before the error is returned.

use common::HidrawDevice;
use protocol::{ProtocolError, Reading, Result, Transport, read_version};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::IntoRawFd;
use tracing::{debug, warn};

/// A live, opened sensor
///
/// The collector only sees this trait, so adding a sensor family never
/// touches collection code.
pub trait Sensor: Send {
    /// Device the sensor was opened from
    fn device(&self) -> &HidrawDevice;

    /// Firmware version read at construction
    fn version(&self) -> &str;

    /// Physical port (`HID_PHYS`), empty if unknown
    fn phy(&self) -> &str {
        self.device().phys()
    }

    /// Read every value the device reports
    fn read_sensor(&mut self) -> Result<Vec<Reading>>;

    /// Read the device's stored correction offsets, in degrees
    fn read_calibration(&mut self) -> Result<Vec<f64>> {
        Err(ProtocolError::NotImplemented("read_calibration"))
    }

    /// Release the channel; later calls are no-ops
    fn close(&mut self) -> io::Result<()>;
}

/// Command set and decoding of one sensor family
pub trait SensorProtocol: Send + 'static {
    /// Family name used in logs
    const NAME: &'static str;

    fn read_sensor(&self, transport: &mut dyn Transport) -> Result<Vec<Reading>>;

    fn read_calibration(&self, _transport: &mut dyn Transport) -> Result<Vec<f64>> {
        Err(ProtocolError::NotImplemented("read_calibration"))
    }
}

/// hidraw-backed sensor speaking protocol `P`
pub struct HidSensor<P> {
    protocol: P,
    device: HidrawDevice,
    transport: Option<Box<dyn Transport>>,
    version: String,
}

impl<P: SensorProtocol> HidSensor<P> {
    /// Perform the version handshake over an already-open channel
    ///
    /// On failure the channel is closed (a close error is only logged) and
    /// the handshake error is returned.
    pub fn open(
        protocol: P,
        device: HidrawDevice,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self> {
        match read_version(transport.as_mut()) {
            Ok(version) => {
                debug!("Opened {} at {} (version {:?})", P::NAME, device, version);
                Ok(Self {
                    protocol,
                    device,
                    transport: Some(transport),
                    version,
                })
            }
            Err(e) => {
                if let Err(close_err) = transport.close() {
                    warn!("Failed to close {} after failed open: {}", device, close_err);
                }
                Err(e)
            }
        }
    }

    /// Open the device node of `device` and perform the handshake
    pub fn open_device(protocol: P, device: HidrawDevice) -> Result<Self> {
        let transport = HidrawFile::open(&device)?;
        Self::open(protocol, device, Box::new(transport))
    }

    pub(crate) fn transport(&mut self) -> Result<&mut dyn Transport> {
        match self.transport.as_mut() {
            Some(transport) => Ok(transport.as_mut()),
            None => Err(ProtocolError::Closed),
        }
    }
}

impl<P: SensorProtocol> Sensor for HidSensor<P> {
    fn device(&self) -> &HidrawDevice {
        &self.device
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn read_sensor(&mut self) -> Result<Vec<Reading>> {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport.as_mut(),
            None => return Err(ProtocolError::Closed),
        };
        self.protocol.read_sensor(transport)
    }

    fn read_calibration(&mut self) -> Result<Vec<f64>> {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport.as_mut(),
            None => return Err(ProtocolError::Closed),
        };
        self.protocol.read_calibration(transport)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.transport.take() {
            Some(transport) => transport.close(),
            None => Ok(()),
        }
    }
}

impl<P> std::fmt::Debug for HidSensor<P>
where
    P: SensorProtocol,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(P::NAME)
            .field("device", &self.device.syspath)
            .field("version", &self.version)
            .field("open", &self.transport.is_some())
            .finish()
    }
}

impl<P> Drop for HidSensor<P> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("Error closing {} on drop: {}", self.device, e);
            }
        }
    }
}

/// Read/write handle on a `/dev/hidrawN` node
#[derive(Debug)]
pub struct HidrawFile(File);

impl HidrawFile {
    pub fn open(device: &HidrawDevice) -> io::Result<Self> {
        let devnode = device.devnode.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no device node", device),
            )
        })?;
        let file = OpenOptions::new().read(true).write(true).open(devnode)?;
        Ok(Self(file))
    }
}

impl Read for HidrawFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for HidrawFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Transport for HidrawFile {
    fn close(self: Box<Self>) -> io::Result<()> {
        // Dropping a File discards the close(2) result
        let fd = self.0.into_raw_fd();
        nix::unistd::close(fd).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{FAKE_VERSION, FakeHidraw, mock_hidraw_device};

    struct Echo;

    impl SensorProtocol for Echo {
        const NAME: &'static str = "echo";

        fn read_sensor(&self, _transport: &mut dyn Transport) -> Result<Vec<Reading>> {
            Ok(vec![Reading::temperature("", 1.0)])
        }
    }

    #[test]
    fn test_open_reads_version() {
        let fake = FakeHidraw::new();
        let sensor = HidSensor::open(
            Echo,
            mock_hidraw_device("/sys/foo/hidraw0", None),
            Box::new(fake.clone()),
        )
        .unwrap();
        assert_eq!(sensor.version(), FAKE_VERSION);
        assert_eq!(sensor.phy(), "/sys/foo/hidraw0/phys");
        assert!(!fake.is_closed());
    }

    #[test]
    fn test_failed_handshake_closes_channel() {
        let fake = FakeHidraw::silent().fail_close();
        let result = HidSensor::open(
            Echo,
            mock_hidraw_device("/sys/foo/hidraw0", None),
            Box::new(fake.clone()),
        );
        assert!(result.is_err());
        assert!(fake.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let fake = FakeHidraw::new();
        let mut sensor = HidSensor::open(
            Echo,
            mock_hidraw_device("/sys/foo/hidraw0", None),
            Box::new(fake.clone()),
        )
        .unwrap();

        sensor.close().unwrap();
        assert!(fake.is_closed());
        sensor.close().unwrap();
        assert!(matches!(sensor.read_sensor(), Err(ProtocolError::Closed)));
    }

    #[test]
    fn test_calibration_defaults_to_not_implemented() {
        let mut sensor = HidSensor::open(
            Echo,
            mock_hidraw_device("/sys/foo/hidraw0", None),
            Box::new(FakeHidraw::new()),
        )
        .unwrap();
        assert!(matches!(
            sensor.read_calibration(),
            Err(ProtocolError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_missing_devnode() {
        let device = HidrawDevice::new("/sys/foo/hidraw0");
        let err = HidrawFile::open(&device).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
