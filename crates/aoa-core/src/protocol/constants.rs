//! Protocol constants for Android Open Accessory (AOA) version 1.
//!
//! Values must match the Android accessory specification exactly.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// Google Inc. Vendor ID, used by devices in accessory mode.
pub const ACCESSORY_VENDOR_ID: u16 = 0x18D1;

/// Accessory mode Product ID.
pub const ACCESSORY_PRODUCT_ID: u16 = 0x2D00;

/// Accessory mode + ADB Product ID.
pub const ACCESSORY_ADB_PRODUCT_ID: u16 = 0x2D01;

/// All PIDs that identify a device already in accessory mode.
pub const ACCESSORY_PIDS: &[u16] = &[ACCESSORY_PRODUCT_ID, ACCESSORY_ADB_PRODUCT_ID];

// ============================================================================
// Vendor Requests (Host -> Device, endpoint 0)
// ============================================================================

/// Read the AOA protocol version (device-to-host, 2 bytes LE).
pub const ACCESSORY_GET_PROTOCOL: u8 = 51;

/// Send one identification string (host-to-device).
pub const ACCESSORY_SEND_STRING: u8 = 52;

/// Ask the device to re-enumerate in accessory mode.
pub const ACCESSORY_START: u8 = 53;

/// The only protocol version this driver speaks.
pub const SUPPORTED_PROTOCOL_VERSION: u16 = 1;

/// wLength of the GetProtocol reply.
pub const PROTOCOL_VERSION_LEN: u16 = 2;

// ============================================================================
// Identification String Indices
// ============================================================================

pub const ACCESSORY_STRING_MANUFACTURER: u16 = 0;
pub const ACCESSORY_STRING_MODEL: u16 = 1;
pub const ACCESSORY_STRING_DESCRIPTION: u16 = 2;
pub const ACCESSORY_STRING_VERSION: u16 = 3;
pub const ACCESSORY_STRING_URI: u16 = 4;
pub const ACCESSORY_STRING_SERIAL: u16 = 5;

/// Max encoded size of one identification string, NUL included.
pub const MAX_STRING_LEN: usize = 256;

// ============================================================================
// Standard USB bits
// ============================================================================

/// bmRequestType: device-to-host.
pub const USB_RTYPE_DIR_IN: u8 = 0x80;
/// bmRequestType: host-to-device.
pub const USB_RTYPE_DIR_OUT: u8 = 0x00;
/// bmRequestType: vendor request.
pub const USB_RTYPE_VENDOR: u8 = 0x40;
/// bmRequestType: device recipient.
pub const USB_RTYPE_DEVICE: u8 = 0x00;

/// bmAttributes transfer type mask.
pub const USB_EP_ATTR_TYPE_M: u8 = 0x03;
pub const USB_EP_ATTR_CONTROL: u8 = 0x00;
pub const USB_EP_ATTR_ISOC: u8 = 0x01;
pub const USB_EP_ATTR_BULK: u8 = 0x02;
pub const USB_EP_ATTR_INT: u8 = 0x03;

/// bEndpointAddress direction bit.
pub const USB_EP_DESC_IN: u8 = 0x80;
/// bEndpointAddress endpoint number mask.
pub const USB_EP_DESC_NUM_M: u8 = 0x0F;

/// Mass storage interface class (stock Android phone).
pub const USB_CLASS_MASS_STORAGE: u8 = 0x08;
/// Vendor specific interface class (phone in accessory mode).
pub const USB_CLASS_VEND_SPECIFIC: u8 = 0xFF;

// ============================================================================
// Driver limits and timing
// ============================================================================

/// Endpoints inspected on interface 0.
pub const MAX_ACCESSORY_ENDPOINTS: usize = 3;

/// Interface carrying the accessory bulk endpoints.
pub const ACCESSORY_INTERFACE: u8 = 0;

/// Default bulk IN timeout.
pub const BULK_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// Default control transfer timeout for real hosts.
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
