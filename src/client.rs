use core::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{DEFAULT_TIMEOUT, MAX_PACKET_SIZE};
use crate::dispatch::RemoteError;
use crate::envelope::{Call, EnvelopeError, Reply};
use crate::slip::{FramingError, STATUS_BUFFER, STATUS_ENCODING, STATUS_TIMEOUT, Slip};
use crate::stream::ByteStream;
use crate::Decode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("framing: {0}")]
    Framing(#[from] FramingError),
    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    /// The firmware answered, but with an error.
    #[error("firmware reported: {0}")]
    Remote(RemoteError),
    #[error("reply does not match the expected type")]
    ReplyType,
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RpcError::Framing(FramingError::Timeout | FramingError::Unterminated)
        )
    }

    /// Status code in the firmware's numbering. Remote errors keep their
    /// own code, which never falls in the framing range.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Framing(e) => e.code(),
            RpcError::Envelope(EnvelopeError::BufferTooSmall { .. }) => STATUS_BUFFER,
            RpcError::Envelope(_) | RpcError::ReplyType => STATUS_ENCODING,
            RpcError::Remote(e) => e.code(),
        }
    }
}

/// Host side of the link: one synchronous call at a time.
///
/// Each call is exactly one request/response exchange. Nothing is retried;
/// on a timeout or framing error the caller decides whether to purge and try
/// again.
#[derive(Debug)]
pub struct Client<S> {
    stream: S,
    slip: Slip,
    timeout: Duration,
    last_error: Option<RpcError>,
    buf: [u8; MAX_PACKET_SIZE],
}

impl<S: ByteStream> Client<S> {
    pub fn new(stream: S, slip: Slip) -> Client<S> {
        Client {
            stream,
            slip,
            timeout: DEFAULT_TIMEOUT,
            last_error: None,
            buf: [0; MAX_PACKET_SIZE],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Client<S> {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Error from the most recent failed call, cleared by a successful one.
    pub fn last_error(&self) -> Option<&RpcError> {
        self.last_error.as_ref()
    }

    /// Drop anything left over in the receive buffer.
    pub fn purge(&mut self) {
        self.stream.clear_input();
    }

    /// Call `method` with the argument tuple `args` and decode the result.
    pub fn call<A, R>(&mut self, method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let result = self.exchange(method, args).and_then(|reply| match reply {
            Reply::Value(v) => serde_json::from_value(v).map_err(|_| RpcError::ReplyType),
            Reply::Void => serde_json::from_value(Value::Null).map_err(|_| RpcError::ReplyType),
            Reply::Error(e) => Err(RpcError::Remote(e)),
        });
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                warn!("call {} failed: {}", method, e);
                self.last_error = Some(e.clone());
            }
        }
        result
    }

    /// Like [`Client::call`], but stores the result in `out`. `out` is only
    /// written when the call succeeds.
    pub fn call_get<A, R>(&mut self, method: &str, args: &A, out: &mut R) -> Result<(), RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        *out = self.call(method, args)?;
        Ok(())
    }

    fn exchange<A: Serialize>(&mut self, method: &str, args: &A) -> Result<Reply, RpcError> {
        let payload = Call::new(method, args).to_vec()?;
        let expected = self.slip.encoded_len(&payload);
        if expected > MAX_PACKET_SIZE {
            return Err(FramingError::EncodeBufferTooSmall {
                expected,
                found: MAX_PACKET_SIZE,
            }
            .into());
        }
        debug!("-> {}", method);
        self.slip.write_packet(&mut self.stream, &payload)?;
        let n = self
            .slip
            .read_packet(&mut self.stream, &mut self.buf, self.timeout)?;
        Ok(Reply::decode(&self.buf[..n])?)
    }
}
