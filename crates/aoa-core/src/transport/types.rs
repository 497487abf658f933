//! Value types shared between the session and host-controller backends.

use std::fmt;
use std::num::NonZeroU32;

use crate::protocol::constants::*;

/// Bus address of an enumerated device, valid only while attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub u32);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Host-controller pipe. Never zero, so `Option<PipeHandle>` stands for "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeHandle(NonZeroU32);

impl PipeHandle {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.raw())
    }
}

/// Pipe flavours the accessory driver allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    BulkInDma,
    BulkOutDma,
}

/// Transfer direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "IN"),
            Direction::Out => write!(f, "OUT"),
        }
    }
}

/// USB endpoint transfer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// USB SETUP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Vendor, device recipient, device-to-host.
    pub fn vendor_in(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: USB_RTYPE_DIR_IN | USB_RTYPE_VENDOR | USB_RTYPE_DEVICE,
            request,
            value,
            index,
            length,
        }
    }

    /// Vendor, device recipient, host-to-device.
    pub fn vendor_out(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: USB_RTYPE_DIR_OUT | USB_RTYPE_VENDOR | USB_RTYPE_DEVICE,
            request,
            value,
            index,
            length,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.request_type & USB_RTYPE_DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Subset of the standard device descriptor the driver looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

/// Standard endpoint descriptor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress (direction bit + number).
    pub address: u8,
    /// bmAttributes.
    pub attributes: u8,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn bulk_in(number: u8, max_packet_size: u16) -> Self {
        Self {
            address: USB_EP_DESC_IN | (number & USB_EP_DESC_NUM_M),
            attributes: USB_EP_ATTR_BULK,
            max_packet_size,
        }
    }

    pub fn bulk_out(number: u8, max_packet_size: u16) -> Self {
        Self {
            address: number & USB_EP_DESC_NUM_M,
            attributes: USB_EP_ATTR_BULK,
            max_packet_size,
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.attributes & USB_EP_ATTR_TYPE_M {
            USB_EP_ATTR_CONTROL => TransferType::Control,
            USB_EP_ATTR_ISOC => TransferType::Isochronous,
            USB_EP_ATTR_BULK => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.address & USB_EP_DESC_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn number(&self) -> u8 {
        self.address & USB_EP_DESC_NUM_M
    }
}

/// A device the host controller has just enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedDevice {
    pub address: DeviceAddress,
    pub descriptor: DeviceDescriptor,
    /// bInterfaceClass of interface 0, used for class driver matching.
    pub interface_class: u8,
}

/// Events reported by the host controller when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Device enumerated.
    Connected(AttachedDevice),
    /// Device removed from the bus.
    Disconnected(DeviceAddress),
    /// VBUS power fault.
    PowerFault,
    /// Bulk IN data has arrived on the given pipe.
    RxAvailable(PipeHandle),
}
