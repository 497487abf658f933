//! Accessory session - owns the host controller and the single connection.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::TickClock;
use crate::events::AccessoryEvent;
use crate::io::{ReadOutcome, bulk_read, bulk_write};
use crate::protocol::constants::*;
use crate::protocol::{AccessoryIdentity, DeviceClass, IdentityError, classify};
use crate::state::{
    BusState, ConnectionSlot, StateMachineContext, resolve_endpoints, switch_device,
};
use crate::transport::{AttachedDevice, BusEvent, DeviceAddress, Direction, HostError, UsbHost};

#[derive(Error, Debug)]
pub enum AccessoryError {
    #[error("Accessory already open")]
    AlreadyOpen,

    #[error("Invalid or stale connection handle")]
    InvalidHandle,

    #[error("Accessory not connected")]
    NotConnected,

    #[error("Bulk {direction} endpoint missing")]
    EndpointMissing { direction: Direction },

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Invalid identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Configuration for an accessory session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bulk IN timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Control transfer timeout for real hosts.
    pub control_timeout_ms: u64,
    /// Main loop poll cadence.
    pub poll_interval_ms: u64,
    /// How often real hosts rescan the bus.
    pub scan_interval_ms: u64,
    /// Interface classes handled by the accessory driver.
    pub driver_classes: Vec<u8>,
    /// Fail the attach when a bulk direction is missing.
    pub require_both_endpoints: bool,
    /// Abort the handshake on the first rejected string.
    pub strict_negotiation: bool,
    /// Treat an all-zero read buffer as no data.
    pub zero_payload_is_no_data: bool,
    /// Identity sent during the handshake.
    pub identity: AccessoryIdentity,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: BULK_READ_TIMEOUT.as_millis() as u64,
            control_timeout_ms: CONTROL_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 1,
            scan_interval_ms: 250,
            driver_classes: vec![USB_CLASS_MASS_STORAGE, USB_CLASS_VEND_SPECIFIC],
            require_both_endpoints: false,
            strict_negotiation: false,
            zero_payload_is_no_data: true,
            identity: AccessoryIdentity::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.identity.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

/// Application token for the open accessory. Stale after `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    generation: u32,
}

/// Accessory session - drives the bus and owns the single connection slot.
///
/// Everything runs on the caller's thread: `poll_bus` processes bus events
/// synchronously and queues `AccessoryEvent`s for `drain_events`.
pub struct AccessorySession<H: UsbHost> {
    host: H,
    config: SessionConfig,
    identity: Option<AccessoryIdentity>,
    generation: u32,
    slot: ConnectionSlot,
    machine: StateMachineContext,
    events: VecDeque<AccessoryEvent>,
    rx_available: u32,
    clock: TickClock,
}

impl<H: UsbHost> AccessorySession<H> {
    pub fn new(host: H, config: SessionConfig) -> Self {
        Self {
            host,
            config,
            identity: None,
            generation: 0,
            slot: ConnectionSlot::new(),
            machine: StateMachineContext::new(),
            events: VecDeque::new(),
            rx_available: 0,
            clock: TickClock::new(),
        }
    }

    /// Register the identity and hand out the connection handle.
    ///
    /// Only one handle may be outstanding; a second `open` fails with
    /// `AlreadyOpen` and changes nothing.
    pub fn open(&mut self, identity: AccessoryIdentity) -> Result<ConnectionHandle, AccessoryError> {
        if self.identity.is_some() {
            warn!("Open rejected, accessory already open");
            return Err(AccessoryError::AlreadyOpen);
        }
        identity.validate()?;

        self.generation = self.generation.wrapping_add(1);
        info!(model = %identity.model, generation = self.generation, "Accessory opened");
        self.identity = Some(identity);
        Ok(ConnectionHandle {
            generation: self.generation,
        })
    }

    /// Release the pipes and reset to `NoDevice`. Stale handles are ignored.
    ///
    /// The host forgets the released device, so if it is still plugged in
    /// the next `poll_bus` offers it again.
    pub fn close(&mut self, handle: ConnectionHandle) {
        if !self.is_valid(handle) {
            debug!("Close on stale handle ignored");
            return;
        }
        info!(uptime_ms = self.clock.now_ms(), "Closing accessory");
        let device = self.slot.device;
        if !self.release_slot() {
            self.emit(AccessoryEvent::Close);
        }
        if let Some(device) = device {
            self.host.forget_device(device);
        }
        self.transition(BusState::NoDevice);
        self.identity = None;
    }

    pub fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.is_valid(handle) && self.slot.connected
    }

    /// Read with the configured timeout.
    pub fn read(
        &mut self,
        handle: ConnectionHandle,
        buf: &mut [u8],
    ) -> Result<ReadOutcome, AccessoryError> {
        let timeout = self.config.read_timeout();
        self.read_timeout(handle, buf, timeout)
    }

    /// Read from the bulk IN pipe, blocking for at most `timeout`.
    pub fn read_timeout(
        &mut self,
        handle: ConnectionHandle,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<ReadOutcome, AccessoryError> {
        if !self.is_valid(handle) {
            return Err(AccessoryError::InvalidHandle);
        }
        if !self.slot.connected {
            return Err(AccessoryError::NotConnected);
        }
        let pipe = self.slot.bulk_in.ok_or(AccessoryError::EndpointMissing {
            direction: Direction::In,
        })?;

        let outcome = bulk_read(
            &mut self.host,
            pipe,
            buf,
            timeout,
            self.config.zero_payload_is_no_data,
        )?;
        if outcome == ReadOutcome::ConnectionLost {
            warn!("Bulk IN reported disconnect");
        }
        Ok(outcome)
    }

    /// Write to the bulk OUT pipe. Blocks until the transfer completes.
    pub fn write(&mut self, handle: ConnectionHandle, data: &[u8]) -> Result<usize, AccessoryError> {
        if !self.is_valid(handle) {
            return Err(AccessoryError::InvalidHandle);
        }
        if !self.slot.connected {
            return Err(AccessoryError::NotConnected);
        }
        let pipe = self.slot.bulk_out.ok_or(AccessoryError::EndpointMissing {
            direction: Direction::Out,
        })?;

        match bulk_write(&mut self.host, pipe, data) {
            Ok(n) => Ok(n),
            Err(HostError::Disconnected) => Err(AccessoryError::ConnectionLost),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the host controller and process its bus events.
    pub fn poll_bus(&mut self) -> Result<(), AccessoryError> {
        let elapsed = self.clock.tick();
        let events = self.host.poll(elapsed)?;
        for event in events {
            self.handle_bus_event(event);
        }
        Ok(())
    }

    /// Take all queued events.
    pub fn drain_events(&mut self) -> Vec<AccessoryEvent> {
        self.events.drain(..).collect()
    }

    pub fn state(&self) -> BusState {
        self.machine.state
    }

    /// Count of bulk IN notifications since the session started.
    pub fn rx_available(&self) -> u32 {
        self.rx_available
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn uptime_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    fn is_valid(&self, handle: ConnectionHandle) -> bool {
        self.identity.is_some() && handle.generation == self.generation
    }

    fn emit(&mut self, event: AccessoryEvent) {
        self.events.push_back(event);
    }

    fn transition(&mut self, to: BusState) {
        if let Some(from) = self.machine.goto_state(to) {
            self.emit(AccessoryEvent::StateChanged { from, to });
        }
    }

    fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected(device) => {
                if self.config.driver_classes.contains(&device.interface_class) {
                    self.attach_device(device);
                } else {
                    info!(
                        device = %device.address,
                        class = %format!("0x{:02X}", device.interface_class),
                        "Unknown device connected"
                    );
                    self.emit(AccessoryEvent::UnknownDevice {
                        vid: device.descriptor.vendor_id,
                        pid: device.descriptor.product_id,
                        class: device.interface_class,
                    });
                    self.transition(BusState::UnknownDevice);
                }
            }
            BusEvent::Disconnected(address) => {
                self.emit(AccessoryEvent::DeviceDetached { address });
                match self.slot.device {
                    Some(owner) if owner == address => {
                        self.release_slot();
                        self.transition(BusState::NoDevice);
                    }
                    Some(_) => debug!(device = %address, "Unrelated device removed"),
                    None => self.transition(BusState::NoDevice),
                }
            }
            BusEvent::PowerFault => {
                warn!("Power fault on bus");
                self.emit(AccessoryEvent::PowerFault);
                self.transition(BusState::PowerFault);
            }
            BusEvent::RxAvailable(pipe) => {
                self.rx_available = self.rx_available.wrapping_add(1);
                debug!(pipe = %pipe, count = self.rx_available, uptime_ms = self.clock.now_ms(), "RX available");
                if self.slot.notify {
                    self.emit(AccessoryEvent::RxAvailable {
                        count: self.rx_available,
                    });
                }
            }
        }
    }

    #[instrument(skip(self, device), fields(device = %device.address))]
    fn attach_device(&mut self, device: AttachedDevice) {
        let AttachedDevice {
            address,
            descriptor,
            ..
        } = device;
        let class = classify(descriptor.vendor_id, descriptor.product_id);
        info!(
            vid = %format!("{:04X}", descriptor.vendor_id),
            pid = %format!("{:04X}", descriptor.product_id),
            class = %class,
            uptime_ms = self.clock.now_ms(),
            "Device attached"
        );
        self.emit(AccessoryEvent::DeviceAttached {
            address,
            vid: descriptor.vendor_id,
            pid: descriptor.product_id,
            class,
        });

        if !self.slot.claim(address) {
            warn!("Attach rejected, device already open");
            self.emit(AccessoryEvent::AttachRejected { address });
            return;
        }

        match class {
            DeviceClass::AlreadyAccessory => self.enumerate_accessory(address),
            DeviceClass::NeedsSwitch => self.switch_to_accessory(address),
        }
    }

    fn enumerate_accessory(&mut self, address: DeviceAddress) {
        let pipes = match resolve_endpoints(&mut self.host, address, self.config.read_timeout()) {
            Ok(pipes) => pipes,
            Err(e) => {
                warn!(error = %e, "Pipe allocation failed");
                self.abandon_claim();
                self.emit(AccessoryEvent::NegotiationFailed {
                    address,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if let Some(direction) = pipes.missing() {
            warn!(direction = %direction, "Accessory has no bulk endpoint in this direction");
            self.emit(AccessoryEvent::EndpointMissing { direction });
            if self.config.require_both_endpoints {
                pipes.free(&mut self.host);
                self.abandon_claim();
                return;
            }
        }

        self.slot.bulk_in = pipes.bulk_in;
        self.slot.bulk_out = pipes.bulk_out;
        self.transition(BusState::Enumerating);
        if self.slot.notify {
            self.emit(AccessoryEvent::Open);
        }
        self.slot.connected = true;
        self.transition(BusState::Ready);
        info!(uptime_ms = self.clock.now_ms(), "Accessory ready");
    }

    /// A switched device keeps the slot until it drops off the bus to
    /// re-enumerate. Any failure frees the slot for the next attach.
    fn switch_to_accessory(&mut self, address: DeviceAddress) {
        self.slot.connected = false;

        let Some(identity) = self.identity.as_ref() else {
            warn!("No identity registered, cannot switch device");
            self.abandon_claim();
            self.emit(AccessoryEvent::NegotiationFailed {
                address,
                reason: "no identity registered".into(),
            });
            return;
        };

        let result = switch_device(
            &mut self.host,
            address,
            identity,
            self.config.strict_negotiation,
            self.clock.now_ms(),
        );
        match result {
            Ok(protocol) => self.emit(AccessoryEvent::SwitchRequested { address, protocol }),
            Err(e) => {
                warn!(error = %e, "Device left unclassified");
                self.abandon_claim();
                self.emit(AccessoryEvent::NegotiationFailed {
                    address,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Undo `ConnectionSlot::claim` for a device that never connected.
    fn abandon_claim(&mut self) {
        let pipes = self.slot.release();
        debug_assert!(pipes.iter().all(Option::is_none));
    }

    /// Free pipes and clear the slot. Returns true if `Close` was emitted.
    fn release_slot(&mut self) -> bool {
        let notify = self.slot.notify;
        for pipe in self.slot.release().into_iter().flatten() {
            debug!(pipe = %pipe, "Freeing pipe");
            self.host.free_pipe(pipe);
        }
        if notify {
            self.emit(AccessoryEvent::Close);
        }
        notify
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeviceDescriptor, EndpointDescriptor, MockHost, MockRead};

    fn session() -> (MockHost, AccessorySession<MockHost>) {
        let mock = MockHost::new();
        let session = AccessorySession::new(mock.clone(), SessionConfig::default());
        (mock, session)
    }

    fn ready_session() -> (MockHost, AccessorySession<MockHost>, ConnectionHandle) {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.attach_accessory(ACCESSORY_ADB_PRODUCT_ID);
        session.poll_bus().unwrap();
        assert!(session.is_connected(handle));
        (mock, session, handle)
    }

    #[test]
    fn test_accessory_attach_reaches_ready() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        assert_eq!(session.state(), BusState::NoDevice);
        assert!(!session.is_connected(handle));

        mock.attach_accessory(ACCESSORY_ADB_PRODUCT_ID);
        session.poll_bus().unwrap();

        assert_eq!(session.state(), BusState::Ready);
        assert!(session.is_connected(handle));
        assert_eq!(mock.live_pipes(), 2);
        assert!(mock.control_log().is_empty());

        let events = session.drain_events();
        let open_at = events.iter().position(|e| *e == AccessoryEvent::Open).unwrap();
        assert_eq!(
            events[open_at - 1],
            AccessoryEvent::StateChanged {
                from: BusState::NoDevice,
                to: BusState::Enumerating
            }
        );
        assert_eq!(
            events[open_at + 1],
            AccessoryEvent::StateChanged {
                from: BusState::Enumerating,
                to: BusState::Ready
            }
        );
    }

    #[test]
    fn test_switch_then_reenumerate() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.set_protocol_version(1);

        let phone = mock.attach(
            DeviceDescriptor::new(0x05AC, 0x1234),
            USB_CLASS_MASS_STORAGE,
            Vec::new(),
        );
        session.poll_bus().unwrap();

        assert_eq!(mock.requests(ACCESSORY_GET_PROTOCOL).len(), 1);
        assert_eq!(mock.requests(ACCESSORY_SEND_STRING).len(), 6);
        assert_eq!(mock.requests(ACCESSORY_START).len(), 1);
        assert_eq!(session.state(), BusState::NoDevice);
        assert!(!session.is_connected(handle));
        assert_eq!(mock.live_pipes(), 0);
        assert!(session.drain_events().contains(&AccessoryEvent::SwitchRequested {
            address: phone,
            protocol: 1
        }));

        // Device drops off the bus and comes back as an accessory.
        mock.detach(phone);
        session.poll_bus().unwrap();
        assert_eq!(session.state(), BusState::NoDevice);

        mock.attach_accessory(ACCESSORY_PRODUCT_ID);
        session.poll_bus().unwrap();
        assert_eq!(session.state(), BusState::Ready);
        assert!(session.is_connected(handle));
    }

    #[test]
    fn test_unsupported_protocol_never_ready() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.set_protocol_version(2);

        let phone = mock.attach(
            DeviceDescriptor::new(0x04E8, 0x6860),
            USB_CLASS_MASS_STORAGE,
            Vec::new(),
        );
        session.poll_bus().unwrap();

        assert!(mock.requests(ACCESSORY_SEND_STRING).is_empty());
        assert!(mock.requests(ACCESSORY_START).is_empty());
        assert!(!session.is_connected(handle));
        assert!(session.drain_events().iter().any(|e| matches!(
            e,
            AccessoryEvent::NegotiationFailed { address, .. } if *address == phone
        )));
    }

    #[test]
    fn test_second_open_rejected() {
        let (mock, mut session, handle) = ready_session();
        let before = (session.slot.bulk_in, session.slot.bulk_out);

        let err = session.open(AccessoryIdentity::default()).unwrap_err();
        assert!(matches!(err, AccessoryError::AlreadyOpen));
        assert_eq!((session.slot.bulk_in, session.slot.bulk_out), before);
        assert!(session.is_connected(handle));
        assert_eq!(mock.live_pipes(), 2);
    }

    #[test]
    fn test_close_then_open_repopulates() {
        let (mock, mut session, handle) = ready_session();
        let old_in = session.slot.bulk_in;
        let old_device = session.slot.device.unwrap();
        session.drain_events();

        session.close(handle);
        assert_eq!(session.state(), BusState::NoDevice);
        assert!(!session.is_connected(handle));
        assert_eq!(mock.live_pipes(), 0);
        assert_eq!(mock.freed_pipes().len(), 2);
        assert!(session.drain_events().contains(&AccessoryEvent::Close));

        let mut buf = [0u8; 3];
        assert!(matches!(
            session.read(handle, &mut buf),
            Err(AccessoryError::InvalidHandle)
        ));

        // Still plugged in: the host offers it again without a replug.
        assert_eq!(mock.forgotten(), vec![old_device]);
        let handle2 = session.open(AccessoryIdentity::default()).unwrap();
        assert_ne!(handle, handle2);
        session.poll_bus().unwrap();

        assert_eq!(session.state(), BusState::Ready);
        assert!(session.is_connected(handle2));
        assert!(!session.is_connected(handle));
        assert!(session.slot.bulk_in.is_some());
        assert_ne!(session.slot.bulk_in, old_in);
        assert_eq!(mock.live_pipes(), 2);
    }

    #[test]
    fn test_close_without_device_still_reports() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        session.close(handle);
        assert_eq!(session.drain_events(), vec![AccessoryEvent::Close]);
        assert!(mock.freed_pipes().is_empty());
        assert!(session.open(AccessoryIdentity::default()).is_ok());
    }

    #[test]
    fn test_close_with_stale_handle_is_noop() {
        let (_mock, mut session, handle) = ready_session();
        session.close(handle);
        let handle2 = session.open(AccessoryIdentity::default()).unwrap();
        session.poll_bus().unwrap();

        session.close(handle);
        assert!(session.is_connected(handle2));
    }

    #[test]
    fn test_read_with_stale_handle_skips_pipe() {
        let (mock, mut session, handle) = ready_session();
        session.close(handle);

        let mut buf = [0u8; 3];
        assert!(session.read(handle, &mut buf).is_err());
        assert!(session.write(handle, b"abc").is_err());
        assert_eq!(mock.read_calls(), 0);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_read_zero_scan() {
        let (mock, mut session, handle) = ready_session();
        mock.queue_read(MockRead::Stale(3));
        mock.queue_read(MockRead::Data(vec![0x03, 0x00, 0x01]));

        let mut buf = [0xFFu8; 3];
        let outcome = session.read(handle, &mut buf).unwrap();
        assert_eq!(outcome, ReadOutcome::Timeout);
        assert_eq!(outcome.len(), 0);

        let outcome = session.read(handle, &mut buf).unwrap();
        assert_eq!(outcome, ReadOutcome::Data(3));
        assert_eq!(buf, [0x03, 0x00, 0x01]);
    }

    #[test]
    fn test_read_before_ready() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        let mut buf = [0u8; 3];
        assert!(matches!(
            session.read(handle, &mut buf),
            Err(AccessoryError::NotConnected)
        ));
        assert_eq!(mock.read_calls(), 0);
    }

    #[test]
    fn test_write_passthrough_and_disconnect() {
        let (mock, mut session, handle) = ready_session();
        assert_eq!(session.write(handle, &[0x01, 0x00, 0x01]).unwrap(), 3);
        assert_eq!(mock.get_writes(), vec![vec![0x01, 0x00, 0x01]]);

        mock.disconnect_writes();
        assert!(matches!(
            session.write(handle, b"x"),
            Err(AccessoryError::ConnectionLost)
        ));
    }

    #[test]
    fn test_bus_disconnect_clears_slot() {
        let (mock, mut session, handle) = ready_session();
        let address = session.slot.device.unwrap();
        session.drain_events();

        mock.detach(address);
        session.poll_bus().unwrap();

        assert_eq!(session.state(), BusState::NoDevice);
        assert!(!session.is_connected(handle));
        assert!(!session.slot.is_occupied());
        assert!(!session.slot.notify);
        assert_eq!(mock.live_pipes(), 0);
        let events = session.drain_events();
        assert!(events.contains(&AccessoryEvent::Close));
        assert!(events.contains(&AccessoryEvent::DeviceDetached { address }));
    }

    #[test]
    fn test_unknown_class_and_power_fault() {
        let (mock, mut session) = session();
        session.open(AccessoryIdentity::default()).unwrap();

        mock.attach(DeviceDescriptor::new(0x046D, 0xC52B), 0x03, Vec::new());
        session.poll_bus().unwrap();
        assert_eq!(session.state(), BusState::UnknownDevice);
        assert!(mock.control_log().is_empty());
        assert!(!session.slot.is_occupied());

        mock.queue_event(BusEvent::PowerFault);
        session.poll_bus().unwrap();
        assert_eq!(session.state(), BusState::PowerFault);
        assert!(session.drain_events().contains(&AccessoryEvent::PowerFault));
    }

    #[test]
    fn test_attach_while_occupied_rejected() {
        let (mock, mut session, handle) = ready_session();
        let pipes = (session.slot.bulk_in, session.slot.bulk_out);

        let second = mock.attach_accessory(ACCESSORY_PRODUCT_ID);
        session.poll_bus().unwrap();

        assert_eq!(mock.live_pipes(), 2);
        assert_eq!((session.slot.bulk_in, session.slot.bulk_out), pipes);
        assert!(session.is_connected(handle));
        assert!(session
            .drain_events()
            .contains(&AccessoryEvent::AttachRejected { address: second }));
    }

    #[test]
    fn test_missing_endpoint_policies() {
        let one_way = vec![EndpointDescriptor::bulk_in(1, 512)];

        // Lenient: connected, OUT pipe unset.
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.attach(
            DeviceDescriptor::new(ACCESSORY_VENDOR_ID, ACCESSORY_PRODUCT_ID),
            USB_CLASS_VEND_SPECIFIC,
            one_way.clone(),
        );
        session.poll_bus().unwrap();
        assert!(session.is_connected(handle));
        assert!(matches!(
            session.write(handle, b"x"),
            Err(AccessoryError::EndpointMissing {
                direction: Direction::Out
            })
        ));

        // Strict: attach fails, nothing left allocated.
        let mock = MockHost::new();
        let config = SessionConfig {
            require_both_endpoints: true,
            ..Default::default()
        };
        let mut session = AccessorySession::new(mock.clone(), config);
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.attach(
            DeviceDescriptor::new(ACCESSORY_VENDOR_ID, ACCESSORY_PRODUCT_ID),
            USB_CLASS_VEND_SPECIFIC,
            one_way,
        );
        session.poll_bus().unwrap();
        assert!(!session.is_connected(handle));
        assert_eq!(session.state(), BusState::NoDevice);
        assert_eq!(mock.live_pipes(), 0);
        assert!(session.drain_events().contains(&AccessoryEvent::EndpointMissing {
            direction: Direction::Out
        }));
    }

    /// Attach a plain accessory after a failed device and expect `Ready`.
    fn assert_next_accessory_connects(
        mock: &MockHost,
        session: &mut AccessorySession<MockHost>,
        handle: ConnectionHandle,
    ) {
        assert!(!session.slot.is_occupied());
        let phone = mock.attach_accessory(ACCESSORY_PRODUCT_ID);
        session.poll_bus().unwrap();
        assert_eq!(session.state(), BusState::Ready);
        assert!(session.is_connected(handle));
        assert_eq!(session.slot.device, Some(phone));
        assert!(!session
            .drain_events()
            .iter()
            .any(|e| matches!(e, AccessoryEvent::AttachRejected { .. })));
    }

    #[test]
    fn test_failed_negotiation_frees_slot() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();

        // Flash drive: GetProtocol stalls.
        let stick = mock.attach(
            DeviceDescriptor::new(0x0781, 0x5567),
            USB_CLASS_MASS_STORAGE,
            Vec::new(),
        );
        session.poll_bus().unwrap();
        assert!(session.drain_events().iter().any(|e| matches!(
            e,
            AccessoryEvent::NegotiationFailed { address, .. } if *address == stick
        )));

        assert_next_accessory_connects(&mock, &mut session, handle);
    }

    #[test]
    fn test_unsupported_version_frees_slot() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.set_protocol_version(2);
        mock.attach(
            DeviceDescriptor::new(0x0403, 0x6001),
            USB_CLASS_VEND_SPECIFIC,
            Vec::new(),
        );
        session.poll_bus().unwrap();

        assert_next_accessory_connects(&mock, &mut session, handle);
    }

    #[test]
    fn test_switch_without_identity_frees_slot() {
        let (mock, mut session) = session();
        mock.set_protocol_version(1);
        mock.attach(
            DeviceDescriptor::new(0x05AC, 0x1234),
            USB_CLASS_MASS_STORAGE,
            Vec::new(),
        );
        session.poll_bus().unwrap();
        assert!(mock.control_log().is_empty());
        assert!(!session.slot.is_occupied());

        let handle = session.open(AccessoryIdentity::default()).unwrap();
        assert_next_accessory_connects(&mock, &mut session, handle);
    }

    #[test]
    fn test_pipe_allocation_failure_frees_slot() {
        let (mock, mut session) = session();
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.fail_pipe_alloc(true);
        mock.attach_accessory(ACCESSORY_PRODUCT_ID);
        session.poll_bus().unwrap();
        assert!(!session.is_connected(handle));
        assert_eq!(mock.live_pipes(), 0);

        mock.fail_pipe_alloc(false);
        assert_next_accessory_connects(&mock, &mut session, handle);
    }

    #[test]
    fn test_strict_endpoint_rejection_frees_slot() {
        let mock = MockHost::new();
        let config = SessionConfig {
            require_both_endpoints: true,
            ..Default::default()
        };
        let mut session = AccessorySession::new(mock.clone(), config);
        let handle = session.open(AccessoryIdentity::default()).unwrap();
        mock.attach(
            DeviceDescriptor::new(ACCESSORY_VENDOR_ID, ACCESSORY_PRODUCT_ID),
            USB_CLASS_VEND_SPECIFIC,
            vec![EndpointDescriptor::bulk_out(2, 512)],
        );
        session.poll_bus().unwrap();
        assert_eq!(mock.live_pipes(), 0);

        assert_next_accessory_connects(&mock, &mut session, handle);
    }

    #[test]
    fn test_unrelated_disconnect_keeps_connection() {
        let (mock, mut session, handle) = ready_session();
        let second = mock.attach_accessory(ACCESSORY_PRODUCT_ID);
        session.poll_bus().unwrap();
        session.drain_events();

        mock.detach(second);
        session.poll_bus().unwrap();
        assert_eq!(session.state(), BusState::Ready);
        assert!(session.is_connected(handle));
        assert_eq!(mock.live_pipes(), 2);
        assert_eq!(
            session.drain_events(),
            vec![AccessoryEvent::DeviceDetached { address: second }]
        );
    }

    #[test]
    fn test_rx_available_counter() {
        let (mock, mut session, _handle) = ready_session();
        let pipe = session.slot.bulk_in.unwrap();
        session.drain_events();

        mock.queue_event(BusEvent::RxAvailable(pipe));
        mock.queue_event(BusEvent::RxAvailable(pipe));
        session.poll_bus().unwrap();

        assert_eq!(session.rx_available(), 2);
        assert_eq!(
            session.drain_events(),
            vec![
                AccessoryEvent::RxAvailable { count: 1 },
                AccessoryEvent::RxAvailable { count: 2 }
            ]
        );
    }

    #[test]
    fn test_open_rejects_invalid_identity() {
        let (_mock, mut session) = session();
        let mut identity = AccessoryIdentity::default();
        identity.serial = "x".repeat(MAX_STRING_LEN);
        assert!(matches!(
            session.open(identity),
            Err(AccessoryError::Identity(_))
        ));
        // Slot is still free for a valid identity.
        assert!(session.open(AccessoryIdentity::default()).is_ok());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = SessionConfig {
            read_timeout_ms: 10,
            strict_negotiation: true,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_partial_toml_uses_defaults() {
        let parsed: SessionConfig = toml::from_str(
            r#"
            read_timeout_ms = 5

            [identity]
            model = "Rover"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.read_timeout(), Duration::from_millis(5));
        assert_eq!(parsed.identity.model, "Rover");
        assert_eq!(parsed.identity.manufacturer, "Google, Inc.");
        assert_eq!(parsed.driver_classes, vec![0x08, 0xFF]);
        assert!(parsed.zero_payload_is_no_data);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("aoa-config-{}.toml", std::process::id()));
        let config = SessionConfig::default();
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_poll_forwards_elapsed_time() {
        let (mock, mut session) = session();
        std::thread::sleep(Duration::from_millis(2));
        session.poll_bus().unwrap();
        assert!(mock.polled() >= Duration::from_millis(2));
    }
}
