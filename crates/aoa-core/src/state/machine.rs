//! Connection state machine for the accessory driver.

use std::fmt;

use crate::transport::{DeviceAddress, PipeHandle};

/// Bus-level state of the accessory driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    /// No device is present.
    #[default]
    NoDevice,
    /// Accessory is being enumerated.
    Enumerating,
    /// Accessory pipes are configured.
    Ready,
    /// An unsupported device has been attached.
    UnknownDevice,
    /// A power fault has occurred.
    PowerFault,
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusState::NoDevice => write!(f, "NO_DEVICE"),
            BusState::Enumerating => write!(f, "ENUMERATING"),
            BusState::Ready => write!(f, "READY"),
            BusState::UnknownDevice => write!(f, "UNKNOWN_DEVICE"),
            BusState::PowerFault => write!(f, "POWER_FAULT"),
        }
    }
}

/// The single accessory connection instance.
///
/// `connected` implies `device` is set. The slot is reset in place, never
/// reallocated.
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    pub connected: bool,
    pub device: Option<DeviceAddress>,
    pub bulk_in: Option<PipeHandle>,
    pub bulk_out: Option<PipeHandle>,
    /// Open/Close/RxAvailable events are only emitted while set.
    pub notify: bool,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self) -> bool {
        self.device.is_some()
    }

    /// Take a freshly attached device. Fails if the slot is already taken.
    pub fn claim(&mut self, device: DeviceAddress) -> bool {
        if self.is_occupied() {
            return false;
        }
        self.device = Some(device);
        self.notify = true;
        self.connected = false;
        true
    }

    /// Reset to the closed state, returning the pipes that must be freed.
    pub fn release(&mut self) -> [Option<PipeHandle>; 2] {
        let pipes = [self.bulk_in.take(), self.bulk_out.take()];
        self.connected = false;
        self.device = None;
        self.notify = false;
        pipes
    }
}

/// Owns the current `BusState` and logs each transition.
#[derive(Debug, Default)]
pub struct StateMachineContext {
    pub state: BusState,
}

impl StateMachineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state. Returns the previous state if it changed.
    pub fn goto_state(&mut self, new_state: BusState) -> Option<BusState> {
        if self.state == new_state {
            return None;
        }
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        let from = self.state;
        self.state = new_state;
        Some(from)
    }
}
