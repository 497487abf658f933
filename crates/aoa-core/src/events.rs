//! Event system for UI decoupling.
//!
//! The session queues `AccessoryEvent`s while it processes bus events; the
//! application drains them after each poll and hands them to an observer.

use crate::protocol::DeviceClass;
use crate::state::BusState;
use crate::transport::{DeviceAddress, Direction};

/// Events emitted by the accessory session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessoryEvent {
    /// Device enumerated and matched a driver class.
    DeviceAttached {
        address: DeviceAddress,
        vid: u16,
        pid: u16,
        class: DeviceClass,
    },
    /// Device removed from the bus.
    DeviceDetached { address: DeviceAddress },
    /// Bus state changed.
    StateChanged { from: BusState, to: BusState },
    /// Bulk pipes configured, accessory ready for I/O.
    Open,
    /// Connection torn down.
    Close,
    /// Host reported bulk IN data.
    RxAvailable { count: u32 },
    /// AOA handshake sent; device should re-enumerate as an accessory.
    SwitchRequested { address: DeviceAddress, protocol: u16 },
    /// Handshake aborted.
    NegotiationFailed { address: DeviceAddress, reason: String },
    /// Accessory lacks a bulk endpoint.
    EndpointMissing { direction: Direction },
    /// Attach refused because the single connection slot is taken.
    AttachRejected { address: DeviceAddress },
    /// Device with no matching driver class.
    UnknownDevice { vid: u16, pid: u16, class: u8 },
    /// VBUS power fault.
    PowerFault,
}

/// Observer trait for receiving accessory events.
///
/// Implement this trait in your application layer to receive updates.
pub trait AccessoryObserver {
    /// Called for each drained event.
    fn on_event(&self, event: &AccessoryEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl AccessoryObserver for NullObserver {
    fn on_event(&self, _event: &AccessoryEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl AccessoryObserver for TracingObserver {
    fn on_event(&self, event: &AccessoryEvent) {
        match event {
            AccessoryEvent::DeviceAttached {
                address,
                vid,
                pid,
                class,
            } => {
                tracing::info!(device = %address, vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), class = %class, "Device attached");
            }
            AccessoryEvent::DeviceDetached { address } => {
                tracing::warn!(device = %address, "Device detached");
            }
            AccessoryEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "State changed");
            }
            AccessoryEvent::Open => {
                tracing::info!("Accessory open");
            }
            AccessoryEvent::Close => {
                tracing::info!("Accessory closed");
            }
            AccessoryEvent::RxAvailable { count } => {
                tracing::trace!(count = count, "RX available");
            }
            AccessoryEvent::SwitchRequested { address, protocol } => {
                tracing::info!(device = %address, protocol = protocol, "Accessory mode requested, waiting for re-enumeration");
            }
            AccessoryEvent::NegotiationFailed { address, reason } => {
                tracing::warn!(device = %address, "Negotiation failed: {}", reason);
            }
            AccessoryEvent::EndpointMissing { direction } => {
                tracing::warn!(direction = %direction, "Bulk endpoint missing");
            }
            AccessoryEvent::AttachRejected { address } => {
                tracing::warn!(device = %address, "Attach rejected, accessory already open");
            }
            AccessoryEvent::UnknownDevice { vid, pid, class } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), class = %format!("0x{:02X}", class), "Unknown device connected");
            }
            AccessoryEvent::PowerFault => {
                tracing::error!("Power fault");
            }
        }
    }
}
