//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;
pub mod types;

pub use mock::{MockHost, MockRead};
pub use nusb::{DeviceSummary, NusbHost};
pub use traits::{HostError, UsbHost};
pub use types::{
    AttachedDevice, BusEvent, DeviceAddress, DeviceDescriptor, Direction, EndpointDescriptor,
    PipeHandle, PipeKind, SetupPacket, TransferType,
};
