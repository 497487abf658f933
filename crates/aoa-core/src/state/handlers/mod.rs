//! Attach handlers.
//!
//! This module is split into submodules by functionality:
//! - `negotiate`: AOA handshake switching a device into accessory mode
//! - `endpoints`: bulk endpoint discovery and pipe allocation

mod endpoints;
mod negotiate;

pub use endpoints::{ResolvedPipes, resolve_endpoints};
pub use negotiate::{NegotiationError, get_protocol, send_start, send_string, switch_device};
