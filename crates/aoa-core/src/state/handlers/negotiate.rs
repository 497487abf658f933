//! AOA handshake: GetProtocol, six SendString requests, Start.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::protocol::constants::*;
use crate::protocol::{AccessoryIdentity, StringIndex};
use crate::transport::{DeviceAddress, HostError, SetupPacket, UsbHost};

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("AOA protocol unsupported (version {version:?})")]
    ProtocolUnsupported { version: Option<u16> },

    #[error("Device rejected {field} string: {reason}")]
    StringRejected { field: StringIndex, reason: String },

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Read the AOA protocol version. Short or failed transfers yield `None`.
#[instrument(skip(host, device), fields(device = %device))]
pub fn get_protocol<H: UsbHost>(host: &mut H, device: DeviceAddress) -> Option<u16> {
    let setup = SetupPacket::vendor_in(ACCESSORY_GET_PROTOCOL, 0, 0, PROTOCOL_VERSION_LEN);
    let mut buf = [0u8; PROTOCOL_VERSION_LEN as usize];

    match host.control_in(device, setup, &mut buf) {
        Ok(n) if n == buf.len() => {
            let version = Cursor::new(&buf[..]).read_u16::<LittleEndian>().ok()?;
            debug!(bytes = n, version = version, "GetProtocol reply");
            Some(version)
        }
        Ok(n) => {
            warn!(bytes = n, "Short GetProtocol reply");
            None
        }
        Err(e) => {
            warn!(error = %e, "GetProtocol failed");
            None
        }
    }
}

/// Send one identification string, NUL terminated.
pub fn send_string<H: UsbHost>(
    host: &mut H,
    device: DeviceAddress,
    index: StringIndex,
    payload: &[u8],
) -> Result<usize, HostError> {
    let setup = SetupPacket::vendor_out(ACCESSORY_SEND_STRING, 0, index.index(), payload.len() as u16);
    host.control_out(device, setup, payload)
}

/// Ask the device to re-enumerate in accessory mode.
pub fn send_start<H: UsbHost>(host: &mut H, device: DeviceAddress) -> Result<usize, HostError> {
    let setup = SetupPacket::vendor_out(ACCESSORY_START, 0, 0, 0);
    host.control_out(device, setup, &[])
}

/// Switch `device` into accessory mode.
///
/// Steps run strictly in order. When `strict` is false, SendString failures
/// are logged and the handshake carries on to Start. Returns the protocol
/// version the device reported.
#[instrument(skip(host, identity, device), fields(device = %device))]
pub fn switch_device<H: UsbHost>(
    host: &mut H,
    device: DeviceAddress,
    identity: &AccessoryIdentity,
    strict: bool,
    uptime_ms: u32,
) -> Result<u16, NegotiationError> {
    info!(uptime_ms = uptime_ms, "Start switch to accessory mode");

    let version = get_protocol(host, device);
    if version != Some(SUPPORTED_PROTOCOL_VERSION) {
        warn!(version = ?version, "Could not read a supported protocol version");
        return Err(NegotiationError::ProtocolUnsupported { version });
    }
    info!("Device supports protocol 1");

    for (index, payload) in identity.wire_strings() {
        match send_string(host, device, index, &payload) {
            Ok(n) => {
                debug!(field = %index, bytes = n, "SendString complete");
                if strict && n != payload.len() {
                    return Err(NegotiationError::StringRejected {
                        field: index,
                        reason: format!("sent {} of {} bytes", n, payload.len()),
                    });
                }
            }
            Err(e) if strict => {
                return Err(NegotiationError::StringRejected {
                    field: index,
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(field = %index, error = %e, "SendString failed, continuing"),
        }
    }

    match send_start(host, device) {
        Ok(n) => debug!(bytes = n, "Start complete"),
        Err(e) if strict => return Err(e.into()),
        Err(e) => warn!(error = %e, "Start failed"),
    }

    info!("End switch to accessory mode");
    Ok(SUPPORTED_PROTOCOL_VERSION)
}
