//! Call and reply envelopes.
//!
//! A call is a JSON array whose first element is the method name and whose
//! remaining elements are the positional arguments: `["!foo",12]`.
//! A reply is `[value]`, `[]` for handlers returning nothing, or the error
//! marker `{"error":-32601}`.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::dispatch::RemoteError;
use crate::{Decode, Encode};

const ERROR_KEY: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON")]
    Syntax,
    #[error("value could not be converted")]
    Convert,
    #[error("envelope is not an array")]
    NotAnArray,
    #[error("first element is not a method name")]
    MissingMethod,
    #[error("reply is neither a value array nor an error marker")]
    BadReply,
    #[error("envelope needs {expected} bytes, buffer has {found}")]
    BufferTooSmall { expected: usize, found: usize },
}

fn copy_into(bytes: &[u8], buffer: &mut [u8]) -> Result<usize, EnvelopeError> {
    if buffer.len() < bytes.len() {
        return Err(EnvelopeError::BufferTooSmall {
            expected: bytes.len(),
            found: buffer.len(),
        });
    }
    buffer[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Outgoing call. `args` is normally a tuple: `()` sends no arguments,
/// `(a, b)` sends two. Any other value is sent as a single argument.
#[derive(Debug)]
pub struct Call<'a, A> {
    pub method: &'a str,
    pub args: &'a A,
}

impl<'a, A: Serialize> Call<'a, A> {
    pub fn new(method: &'a str, args: &'a A) -> Call<'a, A> {
        Call { method, args }
    }

    pub fn to_value(&self) -> Result<Value, EnvelopeError> {
        let mut items = vec![Value::String(self.method.into())];
        match serde_json::to_value(self.args).map_err(|_| EnvelopeError::Convert)? {
            Value::Null => {}
            Value::Array(args) => items.extend(args),
            other => items.push(other),
        }
        Ok(Value::Array(items))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(&self.to_value()?).map_err(|_| EnvelopeError::Convert)
    }
}

impl<A: Serialize> Encode for Call<'_, A> {
    type Error = EnvelopeError;

    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        copy_into(&self.to_vec()?, buffer)
    }
}

/// Incoming call as seen by the responder.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    /// `Null` when the call carried no arguments, otherwise an array.
    pub args: Value,
}

impl Decode<'_> for Request {
    type Error = EnvelopeError;

    fn decode(data: &[u8]) -> Result<Self, Self::Error> {
        let value: Value = serde_json::from_slice(data).map_err(|e| {
            debug!("bad request json: {}", e);
            EnvelopeError::Syntax
        })?;
        let Value::Array(mut items) = value else {
            return Err(EnvelopeError::NotAnArray);
        };
        if items.is_empty() {
            return Err(EnvelopeError::MissingMethod);
        }
        let Value::String(method) = items.remove(0) else {
            return Err(EnvelopeError::MissingMethod);
        };
        let args = if items.is_empty() {
            Value::Null
        } else {
            Value::Array(items)
        };
        Ok(Request { method, args })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    Void,
    Error(RemoteError),
}

impl Reply {
    /// Handlers returning `()` serialize to `null` and reply with `[]`.
    pub fn from_return(value: Value) -> Reply {
        match value {
            Value::Null => Reply::Void,
            v => Reply::Value(v),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Reply::Value(v) => Value::Array(vec![v.clone()]),
            Reply::Void => Value::Array(Vec::new()),
            Reply::Error(e) => {
                let mut m = Map::new();
                m.insert(ERROR_KEY.into(), Value::from(e.code()));
                Value::Object(m)
            }
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(&self.to_value()).map_err(|_| EnvelopeError::Convert)
    }
}

impl Encode for Reply {
    type Error = EnvelopeError;

    fn encode(&self, buffer: &mut [u8]) -> Result<usize, EnvelopeError> {
        copy_into(&self.to_vec()?, buffer)
    }
}

impl Decode<'_> for Reply {
    type Error = EnvelopeError;

    fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(data).map_err(|e| {
            debug!("bad reply json: {}", e);
            EnvelopeError::Syntax
        })?;
        match value {
            Value::Array(mut items) => match items.len() {
                0 => Ok(Reply::Void),
                1 => Ok(Reply::Value(items.remove(0))),
                _ => Err(EnvelopeError::BadReply),
            },
            Value::Object(m) => m
                .get(ERROR_KEY)
                .and_then(Value::as_i64)
                .and_then(|code| i32::try_from(code).ok())
                .map(|code| Reply::Error(RemoteError::from_code(code)))
                .ok_or(EnvelopeError::BadReply),
            _ => Err(EnvelopeError::BadReply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_flattens_tuple_arguments() {
        let c = Call::new("!bar", &(1, 2.5));
        assert_eq!(c.to_vec().unwrap(), br#"["!bar",1,2.5]"#);
        assert_eq!(Call::new("Version", &()).to_vec().unwrap(), br#"["Version"]"#);
        assert_eq!(Call::new("!foo", &7).to_vec().unwrap(), br#"["!foo",7]"#);
    }

    #[test]
    fn call_encode_checks_buffer() {
        let mut buf = [0; 4];
        assert_eq!(
            Call::new("Version", &()).encode(&mut buf),
            Err(EnvelopeError::BufferTooSmall { expected: 11, found: 4 })
        );
    }

    #[test]
    fn request_splits_method_and_args() {
        let r = Request::decode(br#"["+foo",3]"#).unwrap();
        assert_eq!(r.method, "+foo");
        assert_eq!(r.args, json!([3]));

        let r = Request::decode(br#"["?foo"]"#).unwrap();
        assert_eq!(r.args, Value::Null);
    }

    #[test]
    fn malformed_requests() {
        assert_eq!(Request::decode(b"[1,2"), Err(EnvelopeError::Syntax));
        assert_eq!(Request::decode(br#"{"a":1}"#), Err(EnvelopeError::NotAnArray));
        assert_eq!(Request::decode(b"[]"), Err(EnvelopeError::MissingMethod));
        assert_eq!(Request::decode(b"[5]"), Err(EnvelopeError::MissingMethod));
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(Reply::Value(json!(42)).to_vec().unwrap(), b"[42]");
        assert_eq!(Reply::Void.to_vec().unwrap(), b"[]");
        assert_eq!(
            Reply::Error(RemoteError::MethodNotFound).to_vec().unwrap(),
            br#"{"error":-32601}"#
        );

        assert_eq!(Reply::decode(b"[]"), Ok(Reply::Void));
        assert_eq!(
            Reply::decode(br#"[["MM-Ard",2]]"#),
            Ok(Reply::Value(json!(["MM-Ard", 2])))
        );
        assert_eq!(
            Reply::decode(br#"{"error":-32001}"#),
            Ok(Reply::Error(RemoteError::CapacityExceeded))
        );
        assert_eq!(Reply::decode(b"[1,2]"), Err(EnvelopeError::BadReply));
        assert_eq!(Reply::decode(b"\"x\""), Err(EnvelopeError::BadReply));
    }

    #[test]
    fn reply_encodes_into_buffer() {
        let mut buf = [0; 32];
        let n = Reply::Error(RemoteError::OutOfRange).encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], br#"{"error":-32002}"#);
        assert_eq!(Reply::decode(&buf[..n]), Ok(Reply::Error(RemoteError::OutOfRange)));
        assert_eq!(
            Reply::Void.encode(&mut buf[..1]),
            Err(EnvelopeError::BufferTooSmall { expected: 2, found: 1 })
        );
    }

    #[test]
    fn error_code_outside_i32_is_rejected() {
        assert_eq!(
            Reply::decode(br#"{"error":4294967295}"#),
            Err(EnvelopeError::BadReply)
        );
        assert_eq!(
            Reply::decode(br#"{"error":-2147483649}"#),
            Err(EnvelopeError::BadReply)
        );
    }
}
