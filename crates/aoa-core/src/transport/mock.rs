//! Mock USB host controller for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{HostError, UsbHost};
use super::types::{
    AttachedDevice, BusEvent, DeviceAddress, DeviceDescriptor, EndpointDescriptor, PipeHandle,
    PipeKind, SetupPacket,
};
use crate::protocol::constants::USB_CLASS_VEND_SPECIFIC;

/// Scripted outcome of the next bulk IN read.
#[derive(Debug, Clone)]
pub enum MockRead {
    /// Copy these bytes and report their length.
    Data(Vec<u8>),
    /// Report `n` bytes without touching the buffer (stale completion).
    Stale(usize),
    Timeout,
    Disconnected,
}

/// One captured control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub device: DeviceAddress,
    pub setup: SetupPacket,
    /// OUT payload; empty for IN transfers.
    pub data: Vec<u8>,
}

/// Pipe as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPipe {
    pub kind: PipeKind,
    pub device: DeviceAddress,
    pub max_packet_size: u16,
    pub timeout: Option<Duration>,
    pub endpoint: Option<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    events: VecDeque<BusEvent>,
    /// Plugged-in devices by current address.
    attached: HashMap<DeviceAddress, (DeviceDescriptor, u8)>,
    endpoints: HashMap<DeviceAddress, Vec<EndpointDescriptor>>,
    forgotten: Vec<DeviceAddress>,
    fail_alloc: bool,
    /// Raw GetProtocol reply; `None` fails the transfer.
    protocol_reply: Option<Vec<u8>>,
    /// SendString requests (by wIndex) that fail.
    failing_strings: Vec<u16>,
    control_log: Vec<ControlRecord>,
    pipes: HashMap<PipeHandle, MockPipe>,
    freed: Vec<PipeHandle>,
    next_pipe: u32,
    next_address: u32,
    reads: VecDeque<MockRead>,
    read_calls: usize,
    writes: Vec<Vec<u8>>,
    write_disconnected: bool,
    polled: Duration,
}

impl MockState {
    fn enumerate(
        &mut self,
        descriptor: DeviceDescriptor,
        interface_class: u8,
        endpoints: Vec<EndpointDescriptor>,
    ) -> DeviceAddress {
        self.next_address += 1;
        let address = DeviceAddress(self.next_address);
        self.attached.insert(address, (descriptor, interface_class));
        self.endpoints.insert(address, endpoints);
        self.events.push_back(BusEvent::Connected(AttachedDevice {
            address,
            descriptor,
            interface_class,
        }));
        address
    }
}

/// Mock host for unit testing session logic.
///
/// Clones share state, so a test keeps one clone for scripting and
/// inspection while the session owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue an arbitrary bus event.
    pub fn queue_event(&self, event: BusEvent) {
        self.lock().events.push_back(event);
    }

    /// Simulate enumeration of a device with the given interface-0 endpoints.
    pub fn attach(
        &self,
        descriptor: DeviceDescriptor,
        interface_class: u8,
        endpoints: Vec<EndpointDescriptor>,
    ) -> DeviceAddress {
        self.lock().enumerate(descriptor, interface_class, endpoints)
    }

    /// Attach a device in accessory mode with one bulk IN and one bulk OUT.
    pub fn attach_accessory(&self, product_id: u16) -> DeviceAddress {
        self.attach(
            DeviceDescriptor::new(0x18D1, product_id),
            USB_CLASS_VEND_SPECIFIC,
            vec![
                EndpointDescriptor::bulk_in(1, 512),
                EndpointDescriptor::bulk_out(2, 512),
            ],
        )
    }

    /// Simulate removal of a device.
    pub fn detach(&self, address: DeviceAddress) {
        let mut state = self.lock();
        state.attached.remove(&address);
        state.endpoints.remove(&address);
        state.events.push_back(BusEvent::Disconnected(address));
    }

    /// Make every subsequent pipe allocation fail.
    pub fn fail_pipe_alloc(&self, fail: bool) {
        self.lock().fail_alloc = fail;
    }

    /// Addresses passed to `forget_device`.
    pub fn forgotten(&self) -> Vec<DeviceAddress> {
        self.lock().forgotten.clone()
    }

    pub fn set_protocol_reply(&self, reply: Option<&[u8]>) {
        self.lock().protocol_reply = reply.map(<[u8]>::to_vec);
    }

    /// Queue a GetProtocol reply carrying `version`.
    pub fn set_protocol_version(&self, version: u16) {
        self.set_protocol_reply(Some(&version.to_le_bytes()[..]));
    }

    pub fn fail_string(&self, index: u16) {
        self.lock().failing_strings.push(index);
    }

    pub fn queue_read(&self, read: MockRead) {
        self.lock().reads.push_back(read);
    }

    /// Make every subsequent bulk write report a disconnect.
    pub fn disconnect_writes(&self) {
        self.lock().write_disconnected = true;
    }

    pub fn control_log(&self) -> Vec<ControlRecord> {
        self.lock().control_log.clone()
    }

    /// Captured control transfers with the given bRequest.
    pub fn requests(&self, request: u8) -> Vec<ControlRecord> {
        self.lock()
            .control_log
            .iter()
            .filter(|r| r.setup.request == request)
            .cloned()
            .collect()
    }

    pub fn pipe(&self, pipe: PipeHandle) -> Option<MockPipe> {
        self.lock().pipes.get(&pipe).cloned()
    }

    pub fn live_pipes(&self) -> usize {
        self.lock().pipes.len()
    }

    pub fn freed_pipes(&self) -> Vec<PipeHandle> {
        self.lock().freed.clone()
    }

    pub fn read_calls(&self) -> usize {
        self.lock().read_calls
    }

    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Total time passed to `poll`.
    pub fn polled(&self) -> Duration {
        self.lock().polled
    }
}

impl UsbHost for MockHost {
    fn poll(&mut self, elapsed: Duration) -> Result<Vec<BusEvent>, HostError> {
        let mut state = self.lock();
        state.polled += elapsed;
        Ok(state.events.drain(..).collect())
    }

    fn control_in(
        &mut self,
        device: DeviceAddress,
        setup: SetupPacket,
        buf: &mut [u8],
    ) -> Result<usize, HostError> {
        let mut state = self.lock();
        state.control_log.push(ControlRecord {
            device,
            setup,
            data: Vec::new(),
        });
        let reply = state
            .protocol_reply
            .clone()
            .ok_or_else(|| HostError::ControlFailed("stalled".into()))?;
        let n = reply.len().min(buf.len()).min(setup.length as usize);
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn control_out(
        &mut self,
        device: DeviceAddress,
        setup: SetupPacket,
        data: &[u8],
    ) -> Result<usize, HostError> {
        let mut state = self.lock();
        state.control_log.push(ControlRecord {
            device,
            setup,
            data: data.to_vec(),
        });
        if state.failing_strings.contains(&setup.index) && !data.is_empty() {
            return Err(HostError::ControlFailed("stalled".into()));
        }
        Ok(data.len())
    }

    fn interface_endpoint(
        &mut self,
        device: DeviceAddress,
        interface: u8,
        index: usize,
    ) -> Option<EndpointDescriptor> {
        if interface != 0 {
            return None;
        }
        self.lock()
            .endpoints
            .get(&device)
            .and_then(|eps| eps.get(index))
            .copied()
    }

    fn alloc_pipe(
        &mut self,
        kind: PipeKind,
        device: DeviceAddress,
        max_packet_size: u16,
    ) -> Result<PipeHandle, HostError> {
        let mut state = self.lock();
        if state.fail_alloc {
            return Err(HostError::PipeExhausted(kind));
        }
        state.next_pipe += 1;
        let pipe = PipeHandle::new(state.next_pipe).ok_or(HostError::PipeExhausted(kind))?;
        state.pipes.insert(
            pipe,
            MockPipe {
                kind,
                device,
                max_packet_size,
                timeout: None,
                endpoint: None,
            },
        );
        Ok(pipe)
    }

    fn configure_pipe(
        &mut self,
        pipe: PipeHandle,
        max_packet_size: u16,
        timeout: Option<Duration>,
        endpoint: u8,
    ) -> Result<(), HostError> {
        let mut state = self.lock();
        let entry = state
            .pipes
            .get_mut(&pipe)
            .ok_or(HostError::NoSuchPipe(pipe.raw()))?;
        entry.max_packet_size = max_packet_size;
        entry.timeout = timeout;
        entry.endpoint = Some(endpoint);
        Ok(())
    }

    fn free_pipe(&mut self, pipe: PipeHandle) {
        let mut state = self.lock();
        if state.pipes.remove(&pipe).is_some() {
            state.freed.push(pipe);
        }
    }

    fn pipe_read(
        &mut self,
        pipe: PipeHandle,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, HostError> {
        let mut state = self.lock();
        state.read_calls += 1;
        if !state.pipes.contains_key(&pipe) {
            return Err(HostError::NoSuchPipe(pipe.raw()));
        }
        match state.reads.pop_front() {
            Some(MockRead::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(MockRead::Stale(n)) => Ok(n),
            Some(MockRead::Disconnected) => Err(HostError::Disconnected),
            Some(MockRead::Timeout) | None => Err(HostError::Timeout {
                timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
            }),
        }
    }

    fn pipe_write(&mut self, pipe: PipeHandle, data: &[u8]) -> Result<usize, HostError> {
        let mut state = self.lock();
        if !state.pipes.contains_key(&pipe) {
            return Err(HostError::NoSuchPipe(pipe.raw()));
        }
        if state.write_disconnected {
            return Err(HostError::Disconnected);
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    /// Re-enumerates the device under a new address if it is still attached.
    fn forget_device(&mut self, device: DeviceAddress) {
        let mut state = self.lock();
        state.forgotten.push(device);
        let stale: Vec<PipeHandle> = state
            .pipes
            .iter()
            .filter(|(_, p)| p.device == device)
            .map(|(h, _)| *h)
            .collect();
        for pipe in stale {
            state.pipes.remove(&pipe);
            state.freed.push(pipe);
        }
        let endpoints = state.endpoints.remove(&device).unwrap_or_default();
        if let Some((descriptor, interface_class)) = state.attached.remove(&device) {
            state.enumerate(descriptor, interface_class, endpoints);
        }
    }
}
