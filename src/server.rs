use core::time::Duration;

use log::warn;

use crate::Encode;
use crate::config::{DEFAULT_TIMEOUT, MAX_METHODS, MAX_PACKET_SIZE};
use crate::dispatch::{Dispatcher, RemoteError};
use crate::envelope::Reply;
use crate::slip::{FramingError, Slip};
use crate::stream::ByteStream;

/// Firmware side of the link.
///
/// Call [`Responder::poll`] from the main loop; each call answers at most
/// one request and returns without waiting when nothing has arrived.
pub struct Responder<S, C, const N: usize = MAX_METHODS> {
    stream: S,
    slip: Slip,
    dispatcher: Dispatcher<C, N>,
    timeout: Duration,
    buf: [u8; MAX_PACKET_SIZE],
}

impl<S: ByteStream, C, const N: usize> Responder<S, C, N> {
    pub fn new(stream: S, slip: Slip, dispatcher: Dispatcher<C, N>) -> Responder<S, C, N> {
        Responder {
            stream,
            slip,
            dispatcher,
            timeout: DEFAULT_TIMEOUT,
            buf: [0; MAX_PACKET_SIZE],
        }
    }

    /// How long to wait for the rest of a packet once its first byte arrived.
    pub fn with_timeout(mut self, timeout: Duration) -> Responder<S, C, N> {
        self.timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher<C, N> {
        &self.dispatcher
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Answer one pending request. Returns `Ok(false)` if there was none.
    ///
    /// A packet that fails to unframe is not answered; the receive buffer
    /// is purged so the next packet starts clean.
    pub fn poll(&mut self, ctx: &mut C) -> Result<bool, FramingError> {
        if !self.stream.is_ready() {
            return Err(FramingError::Stream);
        }
        if !self.stream.has_bytes() {
            return Ok(false);
        }
        let n = match self
            .slip
            .read_packet(&mut self.stream, &mut self.buf, self.timeout)
        {
            Ok(n) => n,
            Err(e) => {
                if e.is_encoding() || matches!(e, FramingError::DecodeBufferTooSmall { .. }) {
                    self.stream.clear_input();
                }
                return Err(e);
            }
        };
        let reply = self.dispatcher.dispatch(ctx, &self.buf[..n]);
        let len = self.encode_reply(&reply);
        self.slip.write_packet(&mut self.stream, &self.buf[..len])?;
        Ok(true)
    }

    fn encode_reply(&mut self, reply: &Reply) -> usize {
        if let Ok(len) = reply.encode(&mut self.buf) {
            if self.slip.encoded_len(&self.buf[..len]) <= MAX_PACKET_SIZE {
                return len;
            }
        }
        warn!("reply does not fit in a packet");
        // the error marker is a handful of bytes
        Reply::Error(RemoteError::Overflow)
            .encode(&mut self.buf)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use super::*;
    use crate::loopback::Loopback;
    use crate::prop::SequenceProp;

    const S: Slip = Slip::READABLE;

    struct Board {
        foo: SequenceProp<i64, 2>,
    }

    fn responder() -> Responder<Loopback, Board> {
        let mut d = Dispatcher::new();
        d.bind("Version", |_: &mut Board, ()| Ok(("MM-Ard", 2)))
            .unwrap();
        d.bind("blob", |_: &mut Board, (n,): (usize,)| Ok("#".repeat(n)))
            .unwrap();
        d.bind_sequence("foo", |b: &mut Board| &mut b.foo).unwrap();
        Responder::new(Loopback::new(), S, d)
    }

    fn request(r: &mut Responder<Loopback, Board>, b: &mut Board, payload: &[u8]) -> Vec<u8> {
        let mut framed = [0; 128];
        let n = S.encode(payload, &mut framed).unwrap();
        r.stream_mut().feed(&framed[..n]);
        assert_eq!(r.poll(b), Ok(true));
        let out = r.stream_mut().take_written();
        let mut decoded = [0; MAX_PACKET_SIZE];
        let n = S.decode(&out, &mut decoded).unwrap();
        decoded[..n].to_vec()
    }

    fn board() -> Board {
        Board {
            foo: SequenceProp::new(0),
        }
    }

    #[test]
    fn idle_poll_does_nothing() {
        let mut r = responder();
        assert_eq!(r.poll(&mut board()), Ok(false));
        assert!(r.stream_mut().written().is_empty());
    }

    #[test]
    fn answers_version() {
        let mut r = responder();
        let reply = request(&mut r, &mut board(), br#"["Version"]"#);
        assert_eq!(String::from_utf8(reply).unwrap(), r#"[["MM-Ard",2]]"#);
    }

    #[test]
    fn answers_unknown_method_with_error() {
        let mut r = responder();
        let reply = request(&mut r, &mut board(), br#"["Reset"]"#);
        assert_eq!(reply, br#"{"error":-32601}"#);
    }

    #[test]
    fn capacity_rejection_reaches_the_wire() {
        let mut r = responder();
        let mut b = board();
        assert_eq!(request(&mut r, &mut b, br#"["+foo",1]"#), b"[]");
        assert_eq!(request(&mut r, &mut b, br#"["+foo",2]"#), b"[]");
        assert_eq!(request(&mut r, &mut b, br#"["+foo",3]"#), br#"{"error":-32001}"#);
        assert_eq!(b.foo.size(), 2);
    }

    #[test]
    fn oversized_reply_becomes_overflow_error() {
        let mut r = responder();
        let reply = request(&mut r, &mut board(), br#"["blob",600]"#);
        assert_eq!(reply, br#"{"error":-32004}"#);
    }

    #[test]
    fn garbled_packet_purges_input() {
        let mut r = responder();
        r.stream_mut().feed(b"[\"Ver\\Q\"]#[\"Version\"]#");
        assert!(r.poll(&mut board()).unwrap_err().is_encoding());
        assert!(!r.stream_mut().has_bytes());
        assert!(r.stream_mut().written().is_empty());
    }

    #[test]
    fn refuses_when_not_ready() {
        let mut r = responder();
        r.stream_mut().set_ready(false);
        assert_eq!(r.poll(&mut board()), Err(FramingError::Stream));
    }
}
