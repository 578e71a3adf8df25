//! udev device capture
//!
//! Converts `udev::Device` objects, which are tied to the thread that created
//! them, into plain [`HidrawDevice`] snapshots that can cross threads.

use common::{DeviceAction, Error, HidrawDevice, Result};
use std::ffi::OsStr;
use tracing::debug;

/// udev subsystem of raw HID nodes
pub const HIDRAW_SUBSYSTEM: &str = "hidraw";

/// Snapshot the properties the exporter needs from a hidraw udev device
pub fn capture(device: &udev::Device, action: DeviceAction) -> HidrawDevice {
    let mut captured = HidrawDevice::new(device.syspath()).with_action(action);

    if let Some(devnode) = device.devnode() {
        captured = captured.with_devnode(devnode);
    }

    match device.parent_with_subsystem_devtype("usb", "usb_interface") {
        Ok(Some(interface)) => {
            if let Some(modalias) = interface.property_value("MODALIAS") {
                captured = captured.with_interface_modalias(lossy(modalias));
            }
        }
        Ok(None) => {}
        Err(e) => debug!("No usb_interface parent for {}: {}", captured, e),
    }

    match device.parent_with_subsystem("hid") {
        Ok(Some(hid)) => {
            if let Some(phys) = hid.property_value("HID_PHYS") {
                captured = captured.with_hid_phys(lossy(phys));
            }
        }
        Ok(None) => {}
        Err(e) => debug!("No hid parent for {}: {}", captured, e),
    }

    captured
}

/// Map a udev event type to the actions the collector acts on
///
/// Anything other than add and remove is ignored.
pub fn action_for(event_type: udev::EventType) -> Option<DeviceAction> {
    match event_type {
        udev::EventType::Add => Some(DeviceAction::Add),
        udev::EventType::Remove => Some(DeviceAction::Remove),
        _ => None,
    }
}

/// Snapshot every hidraw device currently present
///
/// All devices carry [`DeviceAction::None`].
pub fn enumerate_hidraw() -> Result<Vec<HidrawDevice>> {
    let mut enumerator = udev::Enumerator::new()
        .map_err(|e| Error::Device(format!("Failed to create udev enumerator: {}", e)))?;
    enumerator.match_subsystem(HIDRAW_SUBSYSTEM)?;

    let devices: Vec<HidrawDevice> = enumerator
        .scan_devices()?
        .map(|device| capture(&device, DeviceAction::None))
        .collect();

    debug!("Enumerated {} hidraw device(s)", devices.len());
    Ok(devices)
}

fn lossy(value: &OsStr) -> String {
    value.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_add_and_remove_are_actions() {
        assert_eq!(action_for(udev::EventType::Add), Some(DeviceAction::Add));
        assert_eq!(
            action_for(udev::EventType::Remove),
            Some(DeviceAction::Remove)
        );
        assert_eq!(action_for(udev::EventType::Change), None);
        assert_eq!(action_for(udev::EventType::Unknown), None);
    }
}
