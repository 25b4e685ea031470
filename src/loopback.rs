//! In-memory streams for exercising the codec and the RPC layers without a
//! serial port.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::time::Duration;

use crate::stream::{ByteStream, StreamError};

/// Single-ended stream: reads come from a queue filled by the caller, writes
/// are recorded. Reads never wait; running dry is a timeout.
#[derive(Debug, Default)]
pub struct Loopback {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    script: VecDeque<Vec<u8>>,
    not_ready: bool,
    write_limit: Option<usize>,
}

impl Loopback {
    pub fn new() -> Loopback {
        Loopback::default()
    }

    /// Queue bytes to be read.
    pub fn feed(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Queue bytes that arrive once the next packet has been flushed, the
    /// way a board answers a request. Survives `clear_input`.
    pub fn script(&mut self, reply: &[u8]) {
        self.script.push_back(reply.to_vec());
    }

    pub fn written(&self) -> &[u8] {
        &self.tx
    }

    pub fn take_written(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }

    /// Move everything written so far onto the read queue.
    pub fn echo(&mut self) {
        let tx = core::mem::take(&mut self.tx);
        self.feed(&tx);
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.not_ready = !ready;
    }

    /// Accept at most `n` bytes per `write_bytes` call.
    pub fn limit_writes(&mut self, n: usize) {
        self.write_limit = Some(n);
    }
}

impl ByteStream for Loopback {
    fn write_bytes(&mut self, buffer: &[u8]) -> usize {
        let n = self.write_limit.map_or(buffer.len(), |l| l.min(buffer.len()));
        self.tx.extend_from_slice(&buffer[..n]);
        n
    }

    fn read_bytes_until(
        &mut self,
        buffer: &mut [u8],
        terminator: u8,
        _timeout: Duration,
    ) -> Result<usize, StreamError> {
        let mut n = 0;
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
        Err(StreamError::Timeout)
    }

    fn has_bytes(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn write_now(&mut self) {
        if let Some(reply) = self.script.pop_front() {
            self.rx.extend(reply);
        }
    }

    fn clear_input(&mut self) {
        self.rx.clear();
    }

    fn is_ready(&self) -> bool {
        !self.not_ready
    }
}

#[cfg(feature = "std")]
pub use duplex::{Duplex, duplex};

#[cfg(feature = "std")]
mod duplex {
    use std::collections::VecDeque;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
    use std::time::{Duration, Instant};

    use crate::stream::{ByteStream, StreamError};

    /// One end of an in-process byte pipe. Reads block with a real timeout,
    /// so a host and a responder can run on separate threads.
    #[derive(Debug)]
    pub struct Duplex {
        tx: Sender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
        pending: VecDeque<u8>,
    }

    pub fn duplex() -> (Duplex, Duplex) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Duplex {
                tx: a_tx,
                rx: a_rx,
                pending: VecDeque::new(),
            },
            Duplex {
                tx: b_tx,
                rx: b_rx,
                pending: VecDeque::new(),
            },
        )
    }

    impl Duplex {
        fn pull(&mut self) {
            while let Ok(chunk) = self.rx.try_recv() {
                self.pending.extend(chunk);
            }
        }
    }

    impl ByteStream for Duplex {
        fn write_bytes(&mut self, buffer: &[u8]) -> usize {
            match self.tx.send(buffer.to_vec()) {
                Ok(()) => buffer.len(),
                Err(_) => 0,
            }
        }

        fn read_bytes_until(
            &mut self,
            buffer: &mut [u8],
            terminator: u8,
            timeout: Duration,
        ) -> Result<usize, StreamError> {
            let deadline = Instant::now() + timeout;
            let mut n = 0;
            loop {
                while let Some(b) = self.pending.pop_front() {
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
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.rx.recv_timeout(remaining) {
                    Ok(chunk) => self.pending.extend(chunk),
                    Err(RecvTimeoutError::Timeout) => return Err(StreamError::Timeout),
                    Err(RecvTimeoutError::Disconnected) => return Err(StreamError::Read),
                }
            }
        }

        fn has_bytes(&mut self) -> bool {
            self.pull();
            !self.pending.is_empty()
        }

        fn write_now(&mut self) {}

        fn clear_input(&mut self) {
            self.pull();
            self.pending.clear();
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_until_consumes_terminator() {
        let mut s = Loopback::new();
        s.feed(b"ab#cd#");
        let mut buf = [0; 8];
        assert_eq!(s.read_bytes_until(&mut buf, b'#', Duration::ZERO), Ok(2));
        assert_eq!(s.read_bytes_until(&mut buf, b'#', Duration::ZERO), Ok(2));
        assert_eq!(&buf[..2], b"cd");
        assert_eq!(
            s.read_bytes_until(&mut buf, b'#', Duration::ZERO),
            Err(StreamError::Timeout)
        );
    }

    #[test]
    fn scripted_reply_follows_flush() {
        let mut s = Loopback::new();
        s.script(b"ok#");
        s.clear_input();
        assert!(!s.has_bytes());
        s.write_bytes(b"req#");
        s.write_now();
        let mut buf = [0; 8];
        assert_eq!(s.read_bytes_until(&mut buf, b'#', Duration::ZERO), Ok(2));
        assert_eq!(&buf[..2], b"ok");
    }

    #[test]
    fn read_until_overflow() {
        let mut s = Loopback::new();
        s.feed(b"abcdef#");
        let mut buf = [0; 3];
        assert_eq!(
            s.read_bytes_until(&mut buf, b'#', Duration::ZERO),
            Err(StreamError::Overflow { capacity: 3 })
        );
    }
}
