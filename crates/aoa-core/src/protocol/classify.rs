//! Device classification: accessory already, or needs the AOA switch.

use std::fmt;

use super::constants::{ACCESSORY_PIDS, ACCESSORY_VENDOR_ID};

/// Path taken for a freshly enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Device already exposes the accessory interface.
    AlreadyAccessory,
    /// Device must be switched with the AOA handshake.
    NeedsSwitch,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::AlreadyAccessory => write!(f, "Accessory"),
            DeviceClass::NeedsSwitch => write!(f, "Needs Switch"),
        }
    }
}

pub fn classify(vendor_id: u16, product_id: u16) -> DeviceClass {
    if vendor_id == ACCESSORY_VENDOR_ID && ACCESSORY_PIDS.contains(&product_id) {
        DeviceClass::AlreadyAccessory
    } else {
        DeviceClass::NeedsSwitch
    }
}
