//! AOA-Core: Android Open Accessory host driver in Rust.
//!
//! This crate lets a USB host talk to an Android device over the Android
//! Open Accessory protocol (version 1). It switches an attached phone into
//! accessory mode, claims its bulk endpoints once it re-enumerates, and
//! offers a single-connection open/close/read/write API.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, device classification, accessory identity
//! - **Transport**: USB host abstraction (nusb, mock)
//! - **State**: Bus state machine, handshake and endpoint handlers
//! - **IO**: Bulk reads with timeout and bulk writes
//! - **Events**: Event queue items and observers for UI decoupling
//! - **Session**: High-level orchestrator owning the connection
//!
//! # Example
//!
//! ```no_run
//! use aoa_core::{AccessoryIdentity, AccessorySession, NusbHost, ReadOutcome, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let host = NusbHost::new(config.control_timeout(), config.scan_interval());
//! let mut session = AccessorySession::new(host, config);
//! let handle = session.open(AccessoryIdentity::default())?;
//!
//! let mut buf = [0u8; 3];
//! loop {
//!     session.poll_bus()?;
//!     if session.is_connected(handle) {
//!         if let ReadOutcome::Data(n) = session.read(handle, &mut buf)? {
//!             session.write(handle, &buf[..n])?;
//!         }
//!     }
//! }
//! # }
//! ```

pub mod clock;
pub mod events;
pub mod io;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{AccessoryEvent, AccessoryObserver, NullObserver, TracingObserver};
pub use io::ReadOutcome;
pub use protocol::{AccessoryIdentity, DeviceClass, IdentityError, StringIndex, classify};
pub use session::{AccessoryError, AccessorySession, ConnectionHandle, SessionConfig};
pub use state::BusState;
pub use transport::{DeviceSummary, HostError, MockHost, NusbHost, UsbHost};
