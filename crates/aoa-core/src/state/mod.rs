//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{NegotiationError, ResolvedPipes, resolve_endpoints, switch_device};
pub use machine::{BusState, ConnectionSlot, StateMachineContext};
