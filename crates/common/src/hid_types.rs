//! hidraw device model shared by discovery, matching and collection

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Why a device is being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    /// Hot-plugged while running
    Add,
    /// Unplugged while running
    Remove,
    /// Found by an enumeration snapshot rather than a live event
    None,
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Add => write!(f, "add"),
            DeviceAction::Remove => write!(f, "remove"),
            DeviceAction::None => write!(f, "none"),
        }
    }
}

/// A hidraw node as seen by udev at the time of an event
///
/// Identity is the sysfs path alone: an `add` and the later `remove` of the
/// same physical device compare equal and hash the same, whatever else
/// differs between the two snapshots.
#[derive(Debug, Clone)]
pub struct HidrawDevice {
    /// sysfs path, e.g. `/sys/devices/.../hidraw/hidraw3`
    pub syspath: PathBuf,
    /// Device node to open, e.g. `/dev/hidraw3`
    pub devnode: Option<PathBuf>,
    /// `MODALIAS` of the parent `usb`/`usb_interface` device, if any
    pub interface_modalias: Option<String>,
    /// `HID_PHYS` of the parent `hid` device, if any
    pub hid_phys: Option<String>,
    pub action: DeviceAction,
}

impl HidrawDevice {
    pub fn new(syspath: impl Into<PathBuf>) -> Self {
        Self {
            syspath: syspath.into(),
            devnode: None,
            interface_modalias: None,
            hid_phys: None,
            action: DeviceAction::None,
        }
    }

    pub fn with_devnode(mut self, devnode: impl Into<PathBuf>) -> Self {
        self.devnode = Some(devnode.into());
        self
    }

    pub fn with_interface_modalias(mut self, modalias: impl Into<String>) -> Self {
        self.interface_modalias = Some(modalias.into());
        self
    }

    pub fn with_hid_phys(mut self, phys: impl Into<String>) -> Self {
        self.hid_phys = Some(phys.into());
        self
    }

    pub fn with_action(mut self, action: DeviceAction) -> Self {
        self.action = action;
        self
    }

    pub fn syspath(&self) -> &Path {
        &self.syspath
    }

    /// Physical port string, empty when udev did not report one
    pub fn phys(&self) -> &str {
        self.hid_phys.as_deref().unwrap_or("")
    }
}

impl PartialEq for HidrawDevice {
    fn eq(&self, other: &Self) -> bool {
        self.syspath == other.syspath
    }
}

impl Eq for HidrawDevice {}

impl Hash for HidrawDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.syspath.hash(state);
    }
}

impl fmt::Display for HidrawDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.syspath.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_identity_is_syspath() {
        let added = HidrawDevice::new("/sys/foo")
            .with_devnode("/dev/hidraw0")
            .with_interface_modalias("usb:v0C45p7401")
            .with_action(DeviceAction::Add);
        let removed = HidrawDevice::new("/sys/foo").with_action(DeviceAction::Remove);

        assert_eq!(added, removed);

        let mut map = HashMap::new();
        map.insert(added, 1);
        assert_eq!(map.get(&removed), Some(&1));
    }

    #[test]
    fn test_phys_defaults_to_empty() {
        assert_eq!(HidrawDevice::new("/sys/foo").phys(), "");
        assert_eq!(
            HidrawDevice::new("/sys/foo")
                .with_hid_phys("usb-0000:00:14.0-1/input1")
                .phys(),
            "usb-0000:00:14.0-1/input1"
        );
    }

    #[test]
    fn test_action_display() {
        assert_eq!(DeviceAction::Add.to_string(), "add");
        assert_eq!(DeviceAction::Remove.to_string(), "remove");
        assert_eq!(DeviceAction::None.to_string(), "none");
    }
}
