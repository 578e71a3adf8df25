//! USB subsystem
//!
//! Discovers TEMPer sensors behind hidraw nodes and keeps them open.
//!
//! - [`device`]: udev enumeration and event capture
//! - [`matcher`]: MODALIAS to protocol variant lookup
//! - [`sensor`]: the [`Sensor`] abstraction over an open hidraw node
//! - [`variants`]: the supported wire protocols
//! - [`monitor`]: the hotplug listener thread

pub mod device;
pub mod matcher;
pub mod monitor;
pub mod sensor;
pub mod variants;

pub use device::enumerate_hidraw;
pub use matcher::{Matcher, TEMPER_MODALIAS, TEMPER2_MODALIAS, TEMPER2HUM_MODALIAS, Variant};
pub use monitor::{HotplugListener, HotplugStopHandle};
pub use sensor::{HidSensor, HidrawFile, Sensor, SensorProtocol};
pub use variants::{Temper, Temper2, Temper2Hum};
