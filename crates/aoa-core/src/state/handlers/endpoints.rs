//! Bulk endpoint discovery and pipe allocation for an accessory device.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::protocol::constants::*;
use crate::transport::{
    DeviceAddress, Direction, EndpointDescriptor, HostError, PipeHandle, PipeKind, TransferType,
    UsbHost,
};

/// Pipes obtained for interface 0. Either may be unset if the device lacked it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPipes {
    pub bulk_in: Option<PipeHandle>,
    pub bulk_out: Option<PipeHandle>,
}

impl ResolvedPipes {
    /// First direction with no pipe, if any.
    pub fn missing(&self) -> Option<Direction> {
        if self.bulk_in.is_none() {
            Some(Direction::In)
        } else if self.bulk_out.is_none() {
            Some(Direction::Out)
        } else {
            None
        }
    }

    /// Release whatever was allocated.
    pub fn free<H: UsbHost>(self, host: &mut H) {
        for pipe in [self.bulk_in, self.bulk_out].into_iter().flatten() {
            host.free_pipe(pipe);
        }
    }
}

fn open_pipe<H: UsbHost>(
    host: &mut H,
    device: DeviceAddress,
    ep: &EndpointDescriptor,
    kind: PipeKind,
    timeout: Option<Duration>,
) -> Result<PipeHandle, HostError> {
    let pipe = host.alloc_pipe(kind, device, ep.max_packet_size)?;
    if let Err(e) = host.configure_pipe(pipe, ep.max_packet_size, timeout, ep.number()) {
        host.free_pipe(pipe);
        return Err(e);
    }
    Ok(pipe)
}

/// Walk interface 0's endpoints and allocate one pipe per bulk direction.
///
/// Inspects at most `MAX_ACCESSORY_ENDPOINTS` descriptors and stops at the
/// first missing one. Bulk IN pipes get `read_timeout`, bulk OUT pipes block.
/// A repeated direction replaces the earlier pipe, which is freed.
pub fn resolve_endpoints<H: UsbHost>(
    host: &mut H,
    device: DeviceAddress,
    read_timeout: Duration,
) -> Result<ResolvedPipes, HostError> {
    let mut pipes = ResolvedPipes::default();

    for index in 0..MAX_ACCESSORY_ENDPOINTS {
        let Some(ep) = host.interface_endpoint(device, ACCESSORY_INTERFACE, index) else {
            debug!(index = index, "No more endpoints");
            break;
        };

        debug!(
            index = index,
            address = %format!("0x{:02X}", ep.address),
            attributes = %format!("0x{:02X}", ep.attributes),
            max_packet_size = ep.max_packet_size,
            "Endpoint descriptor"
        );

        if ep.transfer_type() != TransferType::Bulk {
            continue;
        }

        let (kind, timeout) = match ep.direction() {
            Direction::In => (PipeKind::BulkInDma, Some(read_timeout)),
            Direction::Out => (PipeKind::BulkOutDma, None),
        };

        let pipe = match open_pipe(host, device, &ep, kind, timeout) {
            Ok(pipe) => pipe,
            Err(e) => {
                pipes.free(host);
                return Err(e);
            }
        };
        info!(direction = %ep.direction(), pipe = %pipe, endpoint = ep.number(), "Bulk pipe allocated");

        let slot = match ep.direction() {
            Direction::In => &mut pipes.bulk_in,
            Direction::Out => &mut pipes.bulk_out,
        };
        if let Some(previous) = slot.replace(pipe) {
            warn!(pipe = %previous, "Duplicate bulk endpoint, freeing earlier pipe");
            host.free_pipe(previous);
        }
    }

    Ok(pipes)
}
