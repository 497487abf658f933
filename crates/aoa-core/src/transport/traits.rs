//! USB host-controller abstraction.
//!
//! Defines the `UsbHost` trait the accessory session drives,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;
use thiserror::Error;

use super::types::{
    BusEvent, DeviceAddress, EndpointDescriptor, PipeHandle, PipeKind, SetupPacket,
};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceAddress),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("No such pipe: 0x{0:08X}")]
    NoSuchPipe(u32),

    #[error("No free pipe for {0:?}")]
    PipeExhausted(PipeKind),

    #[error("Control transfer failed: {0}")]
    ControlFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract USB host-controller service.
///
/// The accessory session owns one host and drives it from a single thread:
/// - `poll` advances the controller and reports bus events
/// - control transfers go to endpoint 0 of an attached device
/// - pipes wrap bulk endpoints once the device is in accessory mode
pub trait UsbHost {
    /// Advance the controller by `elapsed` and collect pending bus events.
    fn poll(&mut self, elapsed: Duration) -> Result<Vec<BusEvent>, HostError>;

    /// Device-to-host control transfer. Returns the number of bytes received.
    fn control_in(
        &mut self,
        device: DeviceAddress,
        setup: SetupPacket,
        buf: &mut [u8],
    ) -> Result<usize, HostError>;

    /// Host-to-device control transfer. Returns the number of bytes sent.
    fn control_out(
        &mut self,
        device: DeviceAddress,
        setup: SetupPacket,
        data: &[u8],
    ) -> Result<usize, HostError>;

    /// Endpoint `index` of `interface` (alt setting 0), if present.
    fn interface_endpoint(
        &mut self,
        device: DeviceAddress,
        interface: u8,
        index: usize,
    ) -> Option<EndpointDescriptor>;

    /// Allocate a pipe towards `device`.
    fn alloc_pipe(
        &mut self,
        kind: PipeKind,
        device: DeviceAddress,
        max_packet_size: u16,
    ) -> Result<PipeHandle, HostError>;

    /// Bind a pipe to an endpoint number. `None` timeout blocks forever.
    fn configure_pipe(
        &mut self,
        pipe: PipeHandle,
        max_packet_size: u16,
        timeout: Option<Duration>,
        endpoint: u8,
    ) -> Result<(), HostError>;

    /// Release a pipe. Unknown pipes are ignored.
    fn free_pipe(&mut self, pipe: PipeHandle);

    /// Read from a bulk IN pipe. Returns the count the controller reports.
    fn pipe_read(
        &mut self,
        pipe: PipeHandle,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, HostError>;

    /// Write to a bulk OUT pipe, blocking until the transfer completes.
    fn pipe_write(&mut self, pipe: PipeHandle, data: &[u8]) -> Result<usize, HostError>;

    /// Drop all host-side state for `device`, pipes included. If it is still
    /// plugged in, a later `poll` reports it as a fresh `Connected` event.
    fn forget_device(&mut self, device: DeviceAddress);
}
