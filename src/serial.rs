use alloc::collections::VecDeque;
use core::time::Duration;

use embedded_hal_nb::serial::{Read, Write};
use log::{debug, warn};

use crate::stream::{ByteStream, StreamError};

/// Millisecond counter used to measure read timeouts.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock(std::time::Instant);

#[cfg(feature = "std")]
impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock(std::time::Instant::now())
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

/// [`ByteStream`] over a non-blocking UART.
///
/// Received bytes are buffered so `has_bytes` can peek without losing data,
/// the way a firmware `Serial.available()` works.
#[derive(Debug)]
pub struct SerialStream<S, C> {
    serial: S,
    clock: C,
    rx: VecDeque<u8>,
    ready: bool,
}

impl<S, C> SerialStream<S, C>
where
    S: Read + Write,
    C: Clock,
{
    pub fn new(serial: S, clock: C) -> SerialStream<S, C> {
        SerialStream {
            serial,
            clock,
            rx: VecDeque::new(),
            ready: false,
        }
    }

    /// Mark the port as usable. Until then every operation is refused.
    pub fn begin(&mut self) {
        self.ready = true;
    }

    pub fn end(&mut self) {
        self.ready = false;
    }

    pub fn release(self) -> S {
        self.serial
    }

    /// Load as much as we can from the UART into the internal buffer.
    fn buffer(&mut self) -> Result<(), StreamError> {
        loop {
            match Read::read(&mut self.serial) {
                Ok(b) => self.rx.push_back(b),
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => {
                    warn!("serial read error: {:?}", e);
                    return Err(StreamError::Read);
                }
            }
        }
    }
}

impl<S, C> ByteStream for SerialStream<S, C>
where
    S: Read + Write,
    C: Clock,
{
    fn write_bytes(&mut self, buffer: &[u8]) -> usize {
        for (i, b) in buffer.iter().enumerate() {
            if let Err(e) = nb::block!(Write::write(&mut self.serial, *b)) {
                warn!("serial write error after {} bytes: {:?}", i, e);
                return i;
            }
        }
        buffer.len()
    }

    fn read_bytes_until(
        &mut self,
        buffer: &mut [u8],
        terminator: u8,
        timeout: Duration,
    ) -> Result<usize, StreamError> {
        let deadline = self.clock.now_ms() + timeout.as_millis() as u64;
        let mut n = 0;
        loop {
            while let Some(b) = self.rx.pop_front() {
                if b == terminator {
                    return Ok(n);
                }
                if n == buffer.len() {
                    return Err(StreamError::Overflow {
                        capacity: buffer.len(),
                    });
                }
                buffer[n] = b;
                n += 1;
            }
            if self.clock.now_ms() >= deadline {
                return Err(StreamError::Timeout);
            }
            self.buffer()?;
        }
    }

    fn has_bytes(&mut self) -> bool {
        if self.rx.is_empty() {
            if let Err(e) = self.buffer() {
                debug!("has_bytes: {}", e);
            }
        }
        !self.rx.is_empty()
    }

    fn write_now(&mut self) {
        if let Err(e) = nb::block!(Write::flush(&mut self.serial)) {
            warn!("serial flush error: {:?}", e);
        }
    }

    fn clear_input(&mut self) {
        if let Err(e) = self.buffer() {
            debug!("input cleared after {}", e);
        }
        self.rx.clear();
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}
