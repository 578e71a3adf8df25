//! Device classification
//!
//! Maps a hidraw device to the sensor family that can drive it, based on the
//! `MODALIAS` of its parent USB interface. The table is walked in
//! registration order and the first accepting entry wins.

use super::sensor::{HidSensor, Sensor, SensorProtocol};
use super::variants::{Temper, Temper2, Temper2Hum};
use common::HidrawDevice;
use protocol::ProtocolError;
use std::fmt;
use std::sync::Arc;

/// Interface MODALIAS of the original TEMPer
pub const TEMPER_MODALIAS: &str = "usb:v1130p660Cd0150dc00dsc00dp00ic03isc00ip00in01";
/// Interface MODALIAS of the TEMPer2
pub const TEMPER2_MODALIAS: &str = "usb:v0C45p7401d0001dc00dsc00dp00ic03isc01ip02in01";
/// Interface MODALIAS of the TEMPer2HUM
pub const TEMPER2HUM_MODALIAS: &str = "usb:v0C45p7402d0001dc00dsc00dp00ic03isc01ip02in01";

pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type Opener =
    Arc<dyn Fn(&HidrawDevice) -> Result<Box<dyn Sensor>, ProtocolError> + Send + Sync>;

/// One row of the classification table
#[derive(Clone)]
pub struct Variant {
    pub name: &'static str,
    pub predicate: Predicate,
    pub open: Opener,
}

impl Variant {
    pub fn new<F, O>(name: &'static str, predicate: F, open: O) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
        O: Fn(&HidrawDevice) -> Result<Box<dyn Sensor>, ProtocolError> + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Arc::new(predicate),
            open: Arc::new(open),
        }
    }

    /// A hidraw-backed variant selected by an exact interface MODALIAS
    pub fn hidraw<P>(modalias: &'static str, protocol: P) -> Self
    where
        P: SensorProtocol + Clone + Sync,
    {
        Self::new(
            P::NAME,
            move |candidate| candidate == modalias,
            move |device| {
                HidSensor::open_device(protocol.clone(), device.clone())
                    .map(|sensor| Box::new(sensor) as Box<dyn Sensor>)
            },
        )
    }

    /// Open a driver for `device`
    pub fn open(&self, device: &HidrawDevice) -> Result<Box<dyn Sensor>, ProtocolError> {
        (self.open)(device)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant").field("name", &self.name).finish()
    }
}

/// Ordered classification table
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    variants: Vec<Variant>,
}

impl Matcher {
    /// An empty table that matches nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// The three supported TEMPer families
    pub fn builtin() -> Self {
        let mut matcher = Self::new();
        matcher.register(Variant::hidraw(TEMPER_MODALIAS, Temper));
        matcher.register(Variant::hidraw(TEMPER2_MODALIAS, Temper2));
        matcher.register(Variant::hidraw(TEMPER2HUM_MODALIAS, Temper2Hum));
        matcher
    }

    /// Append a variant; earlier entries take precedence
    pub fn register(&mut self, variant: Variant) -> &mut Self {
        self.variants.push(variant);
        self
    }

    /// First variant accepting the device, if any
    ///
    /// Devices without a USB interface ancestor never match.
    pub fn find(&self, device: &HidrawDevice) -> Option<&Variant> {
        let modalias = device.interface_modalias.as_deref()?;
        self.variants.iter().find(|v| (v.predicate)(modalias))
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::mock_hidraw_device;

    #[test]
    fn test_builtin_matches_each_family() {
        let matcher = Matcher::builtin();
        let cases = [
            (TEMPER_MODALIAS, "temper"),
            (TEMPER2_MODALIAS, "temper2"),
            (TEMPER2HUM_MODALIAS, "temper2hum"),
        ];
        for (modalias, name) in cases {
            let device = mock_hidraw_device("/sys/foo/hidraw0", Some(modalias));
            assert_eq!(matcher.find(&device).map(|v| v.name), Some(name));
        }
    }

    #[test]
    fn test_no_interface_no_match() {
        let matcher = Matcher::builtin();
        assert!(matcher.find(&mock_hidraw_device("/sys/foo/hidraw0", None)).is_none());
    }

    #[test]
    fn test_unknown_modalias_no_match() {
        let matcher = Matcher::builtin();
        let device = mock_hidraw_device(
            "/sys/foo/hidraw0",
            Some("usb:v046DpC52Bd1211dc00dsc00dp00ic03isc01ip01in00"),
        );
        assert!(matcher.find(&device).is_none());
    }

    #[test]
    fn test_first_registered_wins() {
        let mut matcher = Matcher::new();
        matcher
            .register(Variant::new("first", |_| true, |_| {
                Err(ProtocolError::NotImplemented("first"))
            }))
            .register(Variant::new("second", |_| true, |_| {
                Err(ProtocolError::NotImplemented("second"))
            }));

        let device = mock_hidraw_device("/sys/foo/hidraw0", Some("usb:anything"));
        assert_eq!(matcher.find(&device).map(|v| v.name), Some("first"));
        assert_eq!(matcher.len(), 2);
    }
}
