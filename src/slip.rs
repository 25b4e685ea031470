use core::time::Duration;

use log::{debug, warn};

use crate::stream::{ByteStream, StreamError};

pub const STATUS_TIMEOUT: i32 = -1;
pub const STATUS_BUFFER: i32 = -2;
pub const STATUS_STREAM: i32 = -3;
pub const STATUS_ENCODING: i32 = -4;

/// Is `code` one of the framing status codes above?
pub const fn is_status_code(code: i32) -> bool {
    code >= STATUS_ENCODING && code <= STATUS_TIMEOUT
}

/// Reserved bytes of the byte-stuffing scheme.
///
/// A packet on the wire is the payload with every `end` replaced by
/// `esc, esc_end` and every `esc` replaced by `esc, esc_esc`, followed by a
/// single `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slip {
    end: u8,
    esc: u8,
    esc_end: u8,
    esc_esc: u8,
}

impl Slip {
    /// Classic RFC 1055 octets.
    pub const STANDARD: Slip = Slip {
        end: 0o300,
        esc: 0o333,
        esc_end: 0o334,
        esc_esc: 0o335,
    };

    /// Printable reserved bytes, handy when watching the line in a terminal.
    pub const READABLE: Slip = Slip {
        end: b'#',
        esc: b'\\',
        esc_end: b'X',
        esc_esc: b'E',
    };

    /// All four bytes must be distinct.
    pub fn new(end: u8, esc: u8, esc_end: u8, esc_esc: u8) -> Result<Slip, FramingError> {
        let b = [end, esc, esc_end, esc_esc];
        for i in 0..b.len() {
            if b[i + 1..].contains(&b[i]) {
                return Err(FramingError::ReservedBytes);
            }
        }
        Ok(Slip {
            end,
            esc,
            esc_end,
            esc_esc,
        })
    }

    pub const fn end(&self) -> u8 {
        self.end
    }

    pub const fn esc(&self) -> u8 {
        self.esc
    }

    fn escape_code(&self, b: u8) -> Option<u8> {
        if b == self.end {
            Some(self.esc_end)
        } else if b == self.esc {
            Some(self.esc_esc)
        } else {
            None
        }
    }

    /// Size of `src` once escaped and terminated.
    pub fn encoded_len(&self, src: &[u8]) -> usize {
        src.len() + src.iter().filter(|b| self.escape_code(**b).is_some()).count() + 1
    }

    /// Escape `src` into `dest` and append the terminator.
    pub fn encode(&self, src: &[u8], dest: &mut [u8]) -> Result<usize, FramingError> {
        let expected = self.encoded_len(src);
        if dest.len() < expected {
            return Err(FramingError::EncodeBufferTooSmall {
                expected,
                found: dest.len(),
            });
        }
        let mut n = 0;
        let mut run = 0;
        for (i, b) in src.iter().enumerate() {
            if let Some(code) = self.escape_code(*b) {
                let chunk = &src[run..i];
                dest[n..n + chunk.len()].copy_from_slice(chunk);
                n += chunk.len();
                dest[n] = self.esc;
                dest[n + 1] = code;
                n += 2;
                run = i + 1;
            }
        }
        let chunk = &src[run..];
        dest[n..n + chunk.len()].copy_from_slice(chunk);
        n += chunk.len();
        dest[n] = self.end;
        Ok(n + 1)
    }

    /// Decode the first packet in `framed` into `dest`. Bytes after the
    /// terminator are ignored.
    pub fn decode(&self, framed: &[u8], dest: &mut [u8]) -> Result<usize, FramingError> {
        let raw = match framed.iter().position(|b| *b == self.end) {
            Some(i) => &framed[..i],
            None => return Err(FramingError::Unterminated),
        };
        if raw.is_empty() {
            return Err(FramingError::Empty);
        }
        if dest.len() < raw.len() {
            // Escapes only shrink, so the raw length is a safe upper bound.
            let decoded = raw.len() - raw.iter().filter(|b| **b == self.esc).count();
            if dest.len() < decoded {
                return Err(FramingError::DecodeBufferTooSmall {
                    capacity: dest.len(),
                });
            }
            let mut tmp = alloc::vec::Vec::from(raw);
            let n = self.decode_in_place(&mut tmp)?;
            dest[..n].copy_from_slice(&tmp[..n]);
            return Ok(n);
        }
        dest[..raw.len()].copy_from_slice(raw);
        self.decode_in_place(&mut dest[..raw.len()])
    }

    /// Expand escape pairs in place. `buf` holds the raw bytes of one packet
    /// without its terminator.
    pub fn decode_in_place(&self, buf: &mut [u8]) -> Result<usize, FramingError> {
        let mut r = 0;
        let mut w = 0;
        while r < buf.len() {
            let b = buf[r];
            if b == self.esc {
                let Some(&next) = buf.get(r + 1) else {
                    return Err(FramingError::DanglingEscape);
                };
                buf[w] = if next == self.esc_end {
                    self.end
                } else if next == self.esc_esc {
                    self.esc
                } else {
                    return Err(FramingError::BadEscape {
                        index: r + 1,
                        found: next,
                    });
                };
                r += 2;
            } else {
                buf[w] = b;
                r += 1;
            }
            w += 1;
        }
        if w == 0 {
            return Err(FramingError::Empty);
        }
        Ok(w)
    }

    /// Escape `payload` straight onto the stream, one verbatim run at a time.
    /// Returns the number of payload bytes (not wire bytes) written.
    pub fn write_packet<S: ByteStream + ?Sized>(
        &self,
        stream: &mut S,
        payload: &[u8],
    ) -> Result<usize, FramingError> {
        if !stream.is_ready() {
            return Err(FramingError::Stream);
        }
        let mut run = 0;
        for (i, b) in payload.iter().enumerate() {
            if let Some(code) = self.escape_code(*b) {
                write_all(stream, &payload[run..i])?;
                write_all(stream, &[self.esc, code])?;
                run = i + 1;
            }
        }
        write_all(stream, &payload[run..])?;
        write_all(stream, &[self.end])?;
        stream.write_now();
        debug!("sent packet: {} payload bytes", payload.len());
        Ok(payload.len())
    }

    /// Read one packet into `dest` and unescape it there.
    pub fn read_packet<S: ByteStream + ?Sized>(
        &self,
        stream: &mut S,
        dest: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, FramingError> {
        if !stream.is_ready() {
            return Err(FramingError::Stream);
        }
        let nread = stream.read_bytes_until(dest, self.end, timeout)?;
        if nread == 0 {
            return Err(FramingError::Timeout);
        }
        match self.decode_in_place(&mut dest[..nread]) {
            Ok(n) => {
                debug!("received packet: {} raw bytes, {} decoded", nread, n);
                Ok(n)
            }
            Err(e) => {
                warn!("misread packet of {} bytes: {}", nread, e);
                Err(e)
            }
        }
    }
}

impl Default for Slip {
    fn default() -> Self {
        Slip::STANDARD
    }
}

fn write_all<S: ByteStream + ?Sized>(stream: &mut S, data: &[u8]) -> Result<(), FramingError> {
    if data.is_empty() {
        return Ok(());
    }
    let written = stream.write_bytes(data);
    if written != data.len() {
        return Err(FramingError::ShortWrite {
            expected: data.len(),
            written,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("stream not ready")]
    Stream,
    #[error("timed out before packet terminator")]
    Timeout,
    #[error("no packet terminator in buffer")]
    Unterminated,
    #[error("encode buffer too small: need {expected}, have {found}")]
    EncodeBufferTooSmall { expected: usize, found: usize },
    #[error("decode buffer too small ({capacity} bytes)")]
    DecodeBufferTooSmall { capacity: usize },
    #[error("invalid escape code {found:#04x} at {index}")]
    BadEscape { index: usize, found: u8 },
    #[error("escape byte at end of packet")]
    DanglingEscape,
    #[error("packet decoded to zero bytes")]
    Empty,
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },
    #[error("stream read failed")]
    Read,
    #[error("reserved bytes must be distinct")]
    ReservedBytes,
}

impl FramingError {
    /// Status code in the firmware's numbering.
    pub fn code(&self) -> i32 {
        match self {
            FramingError::Timeout | FramingError::Unterminated => STATUS_TIMEOUT,
            FramingError::EncodeBufferTooSmall { .. }
            | FramingError::DecodeBufferTooSmall { .. } => STATUS_BUFFER,
            FramingError::Stream | FramingError::ShortWrite { .. } | FramingError::Read => {
                STATUS_STREAM
            }
            FramingError::BadEscape { .. }
            | FramingError::DanglingEscape
            | FramingError::Empty
            | FramingError::ReservedBytes => STATUS_ENCODING,
        }
    }

    /// Wire corruption; the input should be purged before the next exchange.
    pub fn is_encoding(&self) -> bool {
        self.code() == STATUS_ENCODING
    }
}

impl From<StreamError> for FramingError {
    fn from(value: StreamError) -> Self {
        match value {
            StreamError::Timeout => FramingError::Timeout,
            StreamError::Overflow { capacity } => FramingError::DecodeBufferTooSmall { capacity },
            StreamError::Read => FramingError::Read,
        }
    }
}
