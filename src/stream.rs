use core::time::Duration;

/// Errors reported by [`ByteStream::read_bytes_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The terminator did not arrive before the deadline.
    #[error("timed out waiting for terminator")]
    Timeout,
    /// The destination filled up before the terminator arrived.
    #[error("read buffer too small ({capacity} bytes)")]
    Overflow { capacity: usize },
    /// The underlying device reported a read error.
    #[error("stream read error")]
    Read,
}

/// Byte-oriented duplex stream the codec and the RPC layers are written against.
///
/// Implemented by [`crate::SerialStream`] for real UARTs and by the in-memory
/// doubles in [`crate::loopback`].
pub trait ByteStream {
    /// Writes `buffer` and returns the number of bytes accepted.
    fn write_bytes(&mut self, buffer: &[u8]) -> usize;

    /// Reads into `buffer` until `terminator` is seen or `timeout` elapses.
    /// The terminator is consumed but not stored.
    fn read_bytes_until(
        &mut self,
        buffer: &mut [u8],
        terminator: u8,
        timeout: Duration,
    ) -> Result<usize, StreamError>;

    /// Are there received bytes waiting to be read?
    fn has_bytes(&mut self) -> bool;

    /// Push any buffered output onto the wire.
    fn write_now(&mut self);

    /// Throw away everything in the receive buffer.
    fn clear_input(&mut self);

    fn is_ready(&self) -> bool;
}

impl<S: ByteStream + ?Sized> ByteStream for &mut S {
    fn write_bytes(&mut self, buffer: &[u8]) -> usize {
        (**self).write_bytes(buffer)
    }

    fn read_bytes_until(
        &mut self,
        buffer: &mut [u8],
        terminator: u8,
        timeout: Duration,
    ) -> Result<usize, StreamError> {
        (**self).read_bytes_until(buffer, terminator, timeout)
    }

    fn has_bytes(&mut self) -> bool {
        (**self).has_bytes()
    }

    fn write_now(&mut self) {
        (**self).write_now()
    }

    fn clear_input(&mut self) {
        (**self).clear_input()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}
