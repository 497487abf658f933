//! Bulk I/O over the accessory pipes.
//!
//! Some host controllers report a non-zero byte count for a read that
//! actually timed out. Reads therefore zero the buffer first and, when
//! `zero_payload_is_no_data` is set, treat a buffer that is still all
//! zero as "no data". A genuine all-zero payload is indistinguishable
//! from a timeout in that mode.

use std::time::Duration;
use tracing::{debug, trace};

use crate::transport::{HostError, PipeHandle, UsbHost};

/// Result of a bulk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were received.
    Data(usize),
    /// Nothing arrived before the timeout.
    Timeout,
    /// The device went away.
    ConnectionLost,
}

impl ReadOutcome {
    /// Bytes received; zero for anything but `Data`.
    pub fn len(&self) -> usize {
        match self {
            ReadOutcome::Data(n) => *n,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of non-zero bytes in `buf`.
pub fn count_nonzero(buf: &[u8]) -> usize {
    buf.iter().filter(|&&b| b != 0).count()
}

/// Read from a bulk IN pipe with the zero-scan workaround.
pub fn bulk_read<H: UsbHost>(
    host: &mut H,
    pipe: PipeHandle,
    buf: &mut [u8],
    timeout: Duration,
    zero_payload_is_no_data: bool,
) -> Result<ReadOutcome, HostError> {
    buf.fill(0);

    let reported = match host.pipe_read(pipe, buf, Some(timeout)) {
        Ok(n) => n,
        Err(HostError::Timeout { .. }) => return Ok(ReadOutcome::Timeout),
        Err(HostError::Disconnected) => return Ok(ReadOutcome::ConnectionLost),
        Err(e) => return Err(e),
    };

    if zero_payload_is_no_data && count_nonzero(buf) == 0 {
        if reported > 0 {
            trace!(reported = reported, "Buffer unchanged, treating read as empty");
        }
        return Ok(ReadOutcome::Timeout);
    }

    if reported == 0 {
        return Ok(ReadOutcome::Timeout);
    }

    debug!(bytes_read = reported, "Bulk read");
    Ok(ReadOutcome::Data(reported))
}

/// Write to a bulk OUT pipe. Blocks until the transfer completes.
pub fn bulk_write<H: UsbHost>(
    host: &mut H,
    pipe: PipeHandle,
    data: &[u8],
) -> Result<usize, HostError> {
    let n = host.pipe_write(pipe, data)?;
    debug!(bytes_written = n, "Bulk write");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockHost, MockRead, PipeKind};

    fn in_pipe(mock: &mut MockHost) -> PipeHandle {
        let dev = mock.attach_accessory(0x2D00);
        mock.alloc_pipe(PipeKind::BulkInDma, dev, 512).unwrap()
    }

    #[test]
    fn test_stale_count_with_zero_buffer_is_no_data() {
        let mut mock = MockHost::new();
        let pipe = in_pipe(&mut mock);
        mock.queue_read(MockRead::Stale(3));

        let mut buf = [0x55u8; 3];
        let outcome = bulk_read(&mut mock, pipe, &mut buf, Duration::from_millis(2), true).unwrap();
        assert_eq!(outcome, ReadOutcome::Timeout);
        assert_eq!(outcome.len(), 0);
        assert_eq!(buf, [0, 0, 0]);
    }

    #[test]
    fn test_nonzero_byte_returns_reported_count() {
        let mut mock = MockHost::new();
        let pipe = in_pipe(&mut mock);
        mock.queue_read(MockRead::Data(vec![0x02, 0x00, 0x00]));

        let mut buf = [0u8; 3];
        let outcome = bulk_read(&mut mock, pipe, &mut buf, Duration::from_millis(2), true).unwrap();
        assert_eq!(outcome, ReadOutcome::Data(3));
        assert_eq!(buf, [0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_all_zero_payload_is_dropped_unless_disabled() {
        let mut mock = MockHost::new();
        let pipe = in_pipe(&mut mock);
        mock.queue_read(MockRead::Data(vec![0, 0, 0]));
        mock.queue_read(MockRead::Data(vec![0, 0, 0]));

        let mut buf = [0u8; 3];
        let t = Duration::from_millis(2);
        assert_eq!(
            bulk_read(&mut mock, pipe, &mut buf, t, true).unwrap(),
            ReadOutcome::Timeout
        );
        assert_eq!(
            bulk_read(&mut mock, pipe, &mut buf, t, false).unwrap(),
            ReadOutcome::Data(3)
        );
    }

    #[test]
    fn test_timeout_and_disconnect() {
        let mut mock = MockHost::new();
        let pipe = in_pipe(&mut mock);
        mock.queue_read(MockRead::Timeout);
        mock.queue_read(MockRead::Disconnected);

        let mut buf = [0u8; 8];
        let t = Duration::from_millis(2);
        assert_eq!(
            bulk_read(&mut mock, pipe, &mut buf, t, true).unwrap(),
            ReadOutcome::Timeout
        );
        assert_eq!(
            bulk_read(&mut mock, pipe, &mut buf, t, true).unwrap(),
            ReadOutcome::ConnectionLost
        );
    }

    #[test]
    fn test_count_nonzero() {
        assert_eq!(count_nonzero(&[0, 1, 0, 2]), 2);
        assert_eq!(count_nonzero(&[]), 0);
    }
}
