//! nusb-based USB host implementation.
//!
//! Hot-plug is emulated by diffing `list_devices()` snapshots; pipes map to
//! claimed-interface endpoint readers and writers.

use nusb::descriptors::TransferType as NusbTransferType;
use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, DeviceId, DeviceInfo, Interface, MaybeFuture, list_devices};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::traits::{HostError, UsbHost};
use super::types::{
    AttachedDevice, BusEvent, DeviceAddress, DeviceDescriptor, EndpointDescriptor, PipeHandle,
    PipeKind, SetupPacket,
};
use crate::protocol::constants::*;
use crate::protocol::{DeviceClass, classify};

const USB_CLASS_HUB: u8 = 0x09;
const STREAM_BUFFER_SIZE: usize = 4096;
/// Stand-in for "no timeout" on blocking reads.
const FOREVER: Duration = Duration::from_secs(24 * 60 * 60);

/// Attached device snapshot for listings.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_class: u8,
    pub product: Option<String>,
    pub class: DeviceClass,
}

struct AttachedNusb {
    info: DeviceInfo,
    device: Option<Device>,
    interface: Option<Interface>,
}

enum PipeStream {
    Unbound,
    Reader(EndpointRead<Bulk>),
    Writer(EndpointWrite<Bulk>),
}

struct NusbPipe {
    device: DeviceAddress,
    kind: PipeKind,
    timeout: Option<Duration>,
    stream: PipeStream,
}

/// nusb-based host controller.
pub struct NusbHost {
    control_timeout: Duration,
    scan_interval: Duration,
    since_scan: Option<Duration>,
    known: HashMap<DeviceId, DeviceAddress>,
    devices: HashMap<DeviceAddress, AttachedNusb>,
    pipes: HashMap<PipeHandle, NusbPipe>,
    next_address: u32,
    next_pipe: u32,
}

impl NusbHost {
    pub fn new(control_timeout: Duration, scan_interval: Duration) -> Self {
        Self {
            control_timeout,
            scan_interval,
            since_scan: None,
            known: HashMap::new(),
            devices: HashMap::new(),
            pipes: HashMap::new(),
            next_address: 0,
            next_pipe: 0,
        }
    }

    /// List attached devices with their accessory classification.
    #[instrument(level = "debug")]
    pub fn scan_devices() -> Result<Vec<DeviceSummary>, HostError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| HostError::OpenFailed(e.to_string()))?;

        Ok(devices
            .filter(|d| d.class() != USB_CLASS_HUB)
            .map(|d| DeviceSummary {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                interface_class: interface_class(&d),
                product: d.product_string().map(str::to_string),
                class: classify(d.vendor_id(), d.product_id()),
            })
            .collect())
    }

    fn rescan(&mut self) -> Result<Vec<BusEvent>, HostError> {
        let current: Vec<DeviceInfo> = list_devices()
            .wait()
            .map_err(|e| HostError::OpenFailed(e.to_string()))?
            .filter(|d| d.class() != USB_CLASS_HUB)
            .collect();

        let mut events = Vec::new();

        let gone: Vec<DeviceId> = self
            .known
            .keys()
            .filter(|id| !current.iter().any(|d| d.id() == **id))
            .copied()
            .collect();
        for id in gone {
            if let Some(address) = self.known.remove(&id) {
                self.devices.remove(&address);
                info!(device = %address, "Device removed");
                events.push(BusEvent::Disconnected(address));
            }
        }

        for info in current {
            if self.known.contains_key(&info.id()) {
                continue;
            }
            self.next_address += 1;
            let address = DeviceAddress(self.next_address);
            let attached = AttachedDevice {
                address,
                descriptor: DeviceDescriptor::new(info.vendor_id(), info.product_id()),
                interface_class: interface_class(&info),
            };
            info!(
                device = %address,
                vendor_id = %format!("{:04X}", info.vendor_id()),
                product_id = %format!("{:04X}", info.product_id()),
                "Device enumerated"
            );
            self.known.insert(info.id(), address);
            self.devices.insert(
                address,
                AttachedNusb {
                    info,
                    device: None,
                    interface: None,
                },
            );
            events.push(BusEvent::Connected(attached));
        }

        Ok(events)
    }

    fn device(&mut self, address: DeviceAddress) -> Result<&Device, HostError> {
        let entry = self
            .devices
            .get_mut(&address)
            .ok_or(HostError::DeviceNotFound(address))?;
        if entry.device.is_none() {
            let device = entry
                .info
                .open()
                .wait()
                .map_err(|e| HostError::OpenFailed(e.to_string()))?;
            entry.device = Some(device);
        }
        entry
            .device
            .as_ref()
            .ok_or(HostError::DeviceNotFound(address))
    }

    fn interface(&mut self, address: DeviceAddress) -> Result<Interface, HostError> {
        let device = self.device(address)?.clone();
        let entry = self
            .devices
            .get_mut(&address)
            .ok_or(HostError::DeviceNotFound(address))?;
        if let Some(interface) = &entry.interface {
            return Ok(interface.clone());
        }
        let interface = device
            .claim_interface(ACCESSORY_INTERFACE)
            .wait()
            .map_err(|e| HostError::ClaimInterfaceFailed {
                interface: ACCESSORY_INTERFACE,
                message: e.to_string(),
            })?;
        entry.interface = Some(interface.clone());
        Ok(interface)
    }

    fn pipe_mut(&mut self, pipe: PipeHandle) -> Result<&mut NusbPipe, HostError> {
        self.pipes
            .get_mut(&pipe)
            .ok_or(HostError::NoSuchPipe(pipe.raw()))
    }
}

fn interface_class(info: &DeviceInfo) -> u8 {
    info.interfaces()
        .next()
        .map(|i| i.class())
        .unwrap_or(info.class())
}

fn control_type(setup: &SetupPacket) -> ControlType {
    match (setup.request_type >> 5) & 0x03 {
        0 => ControlType::Standard,
        1 => ControlType::Class,
        _ => ControlType::Vendor,
    }
}

fn recipient(setup: &SetupPacket) -> Recipient {
    match setup.request_type & 0x1F {
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        3 => Recipient::Other,
        _ => Recipient::Device,
    }
}

fn map_io_error(e: std::io::Error, timeout: Option<Duration>, read: bool) -> HostError {
    match e.kind() {
        ErrorKind::TimedOut => HostError::Timeout {
            timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
        },
        ErrorKind::NotConnected | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
            HostError::Disconnected
        }
        _ if read => HostError::ReadFailed(e.to_string()),
        _ => HostError::WriteFailed(e.to_string()),
    }
}

impl UsbHost for NusbHost {
    fn poll(&mut self, elapsed: Duration) -> Result<Vec<BusEvent>, HostError> {
        let since = self.since_scan.map_or(self.scan_interval, |s| s + elapsed);
        if since < self.scan_interval {
            self.since_scan = Some(since);
            return Ok(Vec::new());
        }
        self.since_scan = Some(Duration::ZERO);
        self.rescan()
    }

    #[instrument(skip(self, buf, device, setup), fields(device = %device, request = setup.request))]
    fn control_in(
        &mut self,
        device: DeviceAddress,
        setup: SetupPacket,
        buf: &mut [u8],
    ) -> Result<usize, HostError> {
        let timeout = self.control_timeout;
        let data = self
            .device(device)?
            .control_in(
                ControlIn {
                    control_type: control_type(&setup),
                    recipient: recipient(&setup),
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    length: setup.length,
                },
                timeout,
            )
            .wait()
            .map_err(|e| HostError::ControlFailed(e.to_string()))?;

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        debug!(bytes_read = n, "Control IN complete");
        Ok(n)
    }

    #[instrument(skip(self, data, device, setup), fields(device = %device, request = setup.request, len = data.len()))]
    fn control_out(
        &mut self,
        device: DeviceAddress,
        setup: SetupPacket,
        data: &[u8],
    ) -> Result<usize, HostError> {
        let timeout = self.control_timeout;
        self.device(device)?
            .control_out(
                ControlOut {
                    control_type: control_type(&setup),
                    recipient: recipient(&setup),
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    data,
                },
                timeout,
            )
            .wait()
            .map_err(|e| HostError::ControlFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Control OUT complete");
        Ok(data.len())
    }

    fn interface_endpoint(
        &mut self,
        device: DeviceAddress,
        interface: u8,
        index: usize,
    ) -> Option<EndpointDescriptor> {
        let dev = match self.device(device) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Cannot read descriptors");
                return None;
            }
        };

        for config in dev.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() != interface {
                    continue;
                }
                let alt = iface.alt_settings().next()?;
                let ep = alt.endpoints().nth(index)?;
                let attributes = match ep.transfer_type() {
                    NusbTransferType::Control => USB_EP_ATTR_CONTROL,
                    NusbTransferType::Isochronous => USB_EP_ATTR_ISOC,
                    NusbTransferType::Bulk => USB_EP_ATTR_BULK,
                    NusbTransferType::Interrupt => USB_EP_ATTR_INT,
                };
                return Some(EndpointDescriptor {
                    address: ep.address(),
                    attributes,
                    max_packet_size: ep.max_packet_size() as u16,
                });
            }
        }
        None
    }

    fn alloc_pipe(
        &mut self,
        kind: PipeKind,
        device: DeviceAddress,
        _max_packet_size: u16,
    ) -> Result<PipeHandle, HostError> {
        // Claim now so a busy interface fails the allocation, not the first transfer.
        self.interface(device)?;
        self.next_pipe += 1;
        let pipe = PipeHandle::new(self.next_pipe).ok_or(HostError::PipeExhausted(kind))?;
        self.pipes.insert(
            pipe,
            NusbPipe {
                device,
                kind,
                timeout: None,
                stream: PipeStream::Unbound,
            },
        );
        Ok(pipe)
    }

    fn configure_pipe(
        &mut self,
        pipe: PipeHandle,
        _max_packet_size: u16,
        timeout: Option<Duration>,
        endpoint: u8,
    ) -> Result<(), HostError> {
        let (device, kind) = {
            let p = self.pipe_mut(pipe)?;
            (p.device, p.kind)
        };
        let interface = self.interface(device)?;
        let number = endpoint & USB_EP_DESC_NUM_M;

        let stream = match kind {
            PipeKind::BulkInDma => {
                let ep = interface
                    .endpoint::<Bulk, In>(USB_EP_DESC_IN | number)
                    .map_err(|e| HostError::ReadFailed(e.to_string()))?;
                PipeStream::Reader(
                    ep.reader(STREAM_BUFFER_SIZE)
                        .with_read_timeout(timeout.unwrap_or(FOREVER)),
                )
            }
            PipeKind::BulkOutDma => {
                let ep = interface
                    .endpoint::<Bulk, Out>(number)
                    .map_err(|e| HostError::WriteFailed(e.to_string()))?;
                PipeStream::Writer(ep.writer(STREAM_BUFFER_SIZE))
            }
        };

        let p = self.pipe_mut(pipe)?;
        p.timeout = timeout;
        p.stream = stream;
        debug!(pipe = %pipe, endpoint = number, "Pipe configured");
        Ok(())
    }

    fn free_pipe(&mut self, pipe: PipeHandle) {
        if let Some(p) = self.pipes.remove(&pipe) {
            let still_used = self.pipes.values().any(|other| other.device == p.device);
            if !still_used && let Some(entry) = self.devices.get_mut(&p.device) {
                entry.interface = None;
            }
        }
    }

    #[instrument(skip(self, buf, pipe), fields(pipe = %pipe, max_len = buf.len()))]
    fn pipe_read(
        &mut self,
        pipe: PipeHandle,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, HostError> {
        let p = self.pipe_mut(pipe)?;
        let configured = p.timeout;
        let PipeStream::Reader(reader) = &mut p.stream else {
            return Err(HostError::ReadFailed(format!("pipe {pipe} is not a bound IN pipe")));
        };

        let effective = timeout.or(configured);
        reader.set_read_timeout(effective.unwrap_or(FOREVER));
        let n = reader
            .read(buf)
            .map_err(|e| map_io_error(e, effective, true))?;

        debug!(bytes_read = n, "Read complete");
        Ok(n)
    }

    #[instrument(skip(self, data, pipe), fields(pipe = %pipe, len = data.len()))]
    fn pipe_write(&mut self, pipe: PipeHandle, data: &[u8]) -> Result<usize, HostError> {
        let p = self.pipe_mut(pipe)?;
        let timeout = p.timeout;
        let PipeStream::Writer(writer) = &mut p.stream else {
            return Err(HostError::WriteFailed(format!("pipe {pipe} is not a bound OUT pipe")));
        };

        writer
            .write_all(data)
            .map_err(|e| map_io_error(e, timeout, false))?;
        writer
            .flush()
            .map_err(|e| map_io_error(e, timeout, false))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    fn forget_device(&mut self, device: DeviceAddress) {
        self.pipes.retain(|_, p| p.device != device);
        self.known.retain(|_, address| *address != device);
        if self.devices.remove(&device).is_some() {
            debug!(device = %device, "Device forgotten, rescanning on next poll");
            self.since_scan = None;
        }
    }
}
