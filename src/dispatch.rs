use alloc::boxed::Box;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Decode;
use crate::config::{MAX_METHODS, METHOD_NAME_LEN};
use crate::envelope::{Reply, Request};
use crate::slip::is_status_code;

/// Error reported by the responder inside a well formed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("malformed request")]
    BadRequest,
    #[error("method not found")]
    MethodNotFound,
    #[error("bad arguments")]
    BadArguments,
    #[error("sequence capacity exceeded")]
    CapacityExceeded,
    #[error("channel index out of range")]
    OutOfRange,
    #[error("operation not allowed in current state")]
    InvalidState,
    #[error("reply too large for a packet")]
    Overflow,
    #[error("handler result could not be encoded")]
    Internal,
    /// Firmware-defined code. Codes that clash with the framing status
    /// codes are reported as [`RemoteError::Internal`].
    #[error("firmware error {0}")]
    Application(i32),
}

impl RemoteError {
    pub fn code(&self) -> i32 {
        match self {
            RemoteError::BadRequest => -32600,
            RemoteError::MethodNotFound => -32601,
            RemoteError::BadArguments => -32602,
            RemoteError::CapacityExceeded => -32001,
            RemoteError::OutOfRange => -32002,
            RemoteError::InvalidState => -32003,
            RemoteError::Overflow => -32004,
            RemoteError::Internal => -32603,
            RemoteError::Application(code) if is_status_code(*code) => -32603,
            RemoteError::Application(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> RemoteError {
        match code {
            -32600 => RemoteError::BadRequest,
            -32601 => RemoteError::MethodNotFound,
            -32602 => RemoteError::BadArguments,
            -32001 => RemoteError::CapacityExceeded,
            -32002 => RemoteError::OutOfRange,
            -32003 => RemoteError::InvalidState,
            -32004 => RemoteError::Overflow,
            -32603 => RemoteError::Internal,
            code if is_status_code(code) => RemoteError::Internal,
            other => RemoteError::Application(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch table full ({capacity} methods)")]
    TableFull { capacity: usize },
    #[error("method {0:?} already bound")]
    Duplicate(heapless::String<METHOD_NAME_LEN>),
    #[error("method name longer than {max} bytes")]
    NameTooLong { max: usize },
}

type Handler<C> = Box<dyn Fn(&mut C, Value) -> Result<Value, RemoteError>>;

struct Stub<C> {
    name: heapless::String<METHOD_NAME_LEN>,
    handler: Handler<C>,
}

/// Method table of the responder.
///
/// Handlers get the firmware context `C` by mutable reference along with
/// their decoded arguments. The table is filled once at startup and only
/// looked up afterwards.
pub struct Dispatcher<C, const N: usize = MAX_METHODS> {
    stubs: heapless::Vec<Stub<C>, N>,
}

impl<C, const N: usize> Dispatcher<C, N> {
    pub fn new() -> Dispatcher<C, N> {
        Dispatcher {
            stubs: heapless::Vec::new(),
        }
    }

    /// Bind `handler` to `name`.
    ///
    /// `A` is the argument tuple the handler expects (`()` for none,
    /// `(i64,)` for one, ...). Calls whose arguments do not deserialize into
    /// `A` are answered with [`RemoteError::BadArguments`] without invoking
    /// the handler.
    pub fn bind<A, R, F>(&mut self, name: &str, handler: F) -> Result<(), DispatchError>
    where
        C: 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(&mut C, A) -> Result<R, RemoteError> + 'static,
    {
        let mut key = heapless::String::new();
        key.push_str(name).map_err(|_| DispatchError::NameTooLong {
            max: METHOD_NAME_LEN,
        })?;
        if self.contains(name) {
            return Err(DispatchError::Duplicate(key));
        }
        let handler: Handler<C> = Box::new(move |ctx: &mut C, args: Value| {
            let args: A = serde_json::from_value(args).map_err(|e| {
                debug!("argument decode failed: {}", e);
                RemoteError::BadArguments
            })?;
            let ret = handler(ctx, args)?;
            serde_json::to_value(ret).map_err(|e| {
                warn!("handler result not encodable: {}", e);
                RemoteError::Internal
            })
        });
        self.stubs
            .push(Stub { name: key, handler })
            .map_err(|_| DispatchError::TableFull { capacity: N })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stubs.iter().any(|s| s.name.as_str() == name)
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.stubs.iter().map(|s| s.name.as_str())
    }

    pub fn call(&self, ctx: &mut C, request: Request) -> Reply {
        let Some(stub) = self.stubs.iter().find(|s| s.name.as_str() == request.method) else {
            warn!("method not found: {}", request.method);
            return Reply::Error(RemoteError::MethodNotFound);
        };
        match (stub.handler)(ctx, request.args) {
            Ok(v) => Reply::from_return(v),
            Err(e) => {
                warn!("{} failed: {}", request.method, e);
                Reply::Error(e)
            }
        }
    }

    /// Decode a raw request packet and run it.
    pub fn dispatch(&self, ctx: &mut C, data: &[u8]) -> Reply {
        match Request::decode(data) {
            Ok(request) => self.call(ctx, request),
            Err(e) => {
                warn!("rejected request: {}", e);
                Reply::Error(RemoteError::BadRequest)
            }
        }
    }
}

impl<C, const N: usize> Default for Dispatcher<C, N> {
    fn default() -> Self {
        Dispatcher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Counter {
        total: i64,
        calls: u32,
    }

    fn table() -> Dispatcher<Counter, 4> {
        let mut d = Dispatcher::new();
        d.bind("add", |c: &mut Counter, (n,): (i64,)| {
            c.calls += 1;
            c.total += n;
            Ok(c.total)
        })
        .unwrap();
        d.bind("reset", |c: &mut Counter, ()| {
            c.total = 0;
            Ok(())
        })
        .unwrap();
        d.bind("fail", |_: &mut Counter, ()| Err::<(), _>(RemoteError::Application(7)))
            .unwrap();
        d
    }

    #[test]
    fn calls_bound_handler() {
        let d = table();
        let mut c = Counter::default();
        assert_eq!(d.dispatch(&mut c, br#"["add",5]"#), Reply::Value(json!(5)));
        assert_eq!(d.dispatch(&mut c, br#"["add",-2]"#), Reply::Value(json!(3)));
        assert_eq!(d.dispatch(&mut c, br#"["reset"]"#), Reply::Void);
        assert_eq!(c.total, 0);
    }

    #[test]
    fn unknown_method_leaves_state_alone() {
        let d = table();
        let mut c = Counter { total: 9, calls: 1 };
        assert_eq!(
            d.dispatch(&mut c, br#"["mul",2]"#),
            Reply::Error(RemoteError::MethodNotFound)
        );
        assert_eq!(c.total, 9);
        assert_eq!(c.calls, 1);
    }

    #[test]
    fn argument_mismatch_is_not_a_crash() {
        let d = table();
        let mut c = Counter::default();
        for bad in [
            &br#"["add"]"#[..],
            br#"["add",1,2]"#,
            br#"["add","x"]"#,
            br#"["reset",1]"#,
        ] {
            assert_eq!(d.dispatch(&mut c, bad), Reply::Error(RemoteError::BadArguments));
        }
        assert_eq!(c.calls, 0);
    }

    #[test]
    fn malformed_envelope() {
        let d = table();
        let mut c = Counter::default();
        assert_eq!(d.dispatch(&mut c, b"nope"), Reply::Error(RemoteError::BadRequest));
    }

    #[test]
    fn handler_error_is_forwarded() {
        let d = table();
        let mut c = Counter::default();
        assert_eq!(
            d.dispatch(&mut c, br#"["fail"]"#),
            Reply::Error(RemoteError::Application(7))
        );
    }

    #[test]
    fn registration_limits() {
        let mut d = table();
        assert!(matches!(
            d.bind("add", |_: &mut Counter, ()| Ok(())),
            Err(DispatchError::Duplicate(_))
        ));
        d.bind("fourth", |_: &mut Counter, ()| Ok(())).unwrap();
        assert_eq!(
            d.bind("fifth", |_: &mut Counter, ()| Ok(())),
            Err(DispatchError::TableFull { capacity: 4 })
        );
        let long = "x".repeat(METHOD_NAME_LEN + 1);
        assert!(matches!(
            d.bind(&long, |_: &mut Counter, ()| Ok(())),
            Err(DispatchError::NameTooLong { .. })
        ));
    }

    #[test]
    fn remote_codes_round_trip() {
        for e in [
            RemoteError::BadRequest,
            RemoteError::MethodNotFound,
            RemoteError::BadArguments,
            RemoteError::CapacityExceeded,
            RemoteError::OutOfRange,
            RemoteError::InvalidState,
            RemoteError::Overflow,
            RemoteError::Internal,
            RemoteError::Application(12),
        ] {
            assert_eq!(RemoteError::from_code(e.code()), e);
        }
    }

    #[test]
    fn remote_codes_never_look_like_framing_status() {
        for code in -4..=-1 {
            assert_eq!(RemoteError::Application(code).code(), -32603);
            assert_eq!(RemoteError::from_code(code), RemoteError::Internal);
        }
        assert_eq!(RemoteError::Application(-5).code(), -5);
    }

    #[test]
    fn unencodable_result_is_an_internal_error() {
        let mut d: Dispatcher<Counter, 2> = Dispatcher::new();
        d.bind("grid", |_: &mut Counter, ()| {
            let mut m = alloc::collections::BTreeMap::new();
            m.insert((1, 2), 3);
            Ok(m)
        })
        .unwrap();
        let reply = d.dispatch(&mut Counter::default(), br#"["grid"]"#);
        assert_eq!(reply, Reply::Error(RemoteError::Internal));
        assert_eq!(reply.to_vec().unwrap(), br#"{"error":-32603}"#);
    }
}
