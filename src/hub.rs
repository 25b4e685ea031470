//! Host side device adapter.
//!
//! A [`Hub`] owns the port to one board. Logical sub-devices share it through
//! [`RemoteProp`] and [`RemoteChannelProp`] handles; every exchange takes the
//! hub lock for the whole purge/send/receive round trip so only one request
//! is ever on the wire.

use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};
use std::thread;

use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::{Client, RpcError};
use crate::config::{HubConfig, SerialSettings, VERSION_METHOD};
use crate::dispatch::RemoteError;
use crate::prop::Opcode;
use crate::slip::Slip;
use crate::stream::ByteStream;

pub const ERR_INITIALIZE_FAILED: i32 = 102;
pub const ERR_BOARD_NOT_FOUND: i32 = 105;
pub const ERR_PORT_OPEN_FAILED: i32 = 106;
pub const ERR_COMMUNICATION: i32 = 107;
pub const ERR_NO_PORT_SET: i32 = 108;
pub const ERR_VERSION_MISMATCH: i32 = 109;
pub const ERR_REJECTED: i32 = 110;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no port set, or the port is not open")]
    NoPort,
    #[error("timeout opening port: the board did not answer")]
    PortTimeout,
    #[error("no {expected} firmware found (board reports {found:?})")]
    FirmwareNotFound { expected: String, found: String },
    #[error("firmware version {found} not supported, expected {min} to {max}")]
    VersionMismatch { found: u32, min: u32, max: u32 },
    #[error("board rejected the request: {0}")]
    Rejected(RemoteError),
    #[error("communication error: {0}")]
    Communication(RpcError),
    #[error("hub lock poisoned")]
    Poisoned,
}

impl DeviceError {
    /// Status code for the host's error-reporting convention.
    pub fn code(&self) -> i32 {
        match self {
            DeviceError::NoPort => ERR_NO_PORT_SET,
            DeviceError::PortTimeout => ERR_PORT_OPEN_FAILED,
            DeviceError::FirmwareNotFound { .. } => ERR_BOARD_NOT_FOUND,
            DeviceError::VersionMismatch { .. } => ERR_VERSION_MISMATCH,
            DeviceError::Rejected(_) => ERR_REJECTED,
            DeviceError::Communication(_) => ERR_COMMUNICATION,
            DeviceError::Poisoned => ERR_INITIALIZE_FAILED,
        }
    }
}

impl From<RpcError> for DeviceError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Remote(e) => DeviceError::Rejected(e),
            e => DeviceError::Communication(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    Misconfigured,
    CanNotCommunicate,
    CanCommunicate,
}

#[derive(Debug)]
struct Link<S> {
    client: Client<S>,
    version: Option<u32>,
}

#[derive(Debug)]
pub struct Hub<S> {
    link: Mutex<Link<S>>,
    config: HubConfig,
}

impl<S: ByteStream> Hub<S> {
    pub fn new(stream: S, slip: Slip, config: HubConfig) -> Hub<S> {
        let client = Client::new(stream, slip).with_timeout(config.answer_timeout);
        Hub {
            link: Mutex::new(Link {
                client,
                version: None,
            }),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Settings the serial manager must apply to the port before
    /// [`Hub::detect`] or [`Hub::initialize`].
    pub fn serial_settings(&self) -> &SerialSettings {
        &self.config.serial
    }

    fn lock(&self) -> Result<MutexGuard<'_, Link<S>>, DeviceError> {
        self.link.lock().map_err(|_| DeviceError::Poisoned)
    }

    /// Ask the board who it is. Caller holds the lock.
    fn query_version(&self, link: &mut Link<S>) -> Result<u32, DeviceError> {
        if !link.client.stream_mut().is_ready() {
            return Err(DeviceError::NoPort);
        }
        link.client.purge();
        let (name, version): (String, u32) = match link.client.call(VERSION_METHOD, &()) {
            Ok(v) => v,
            Err(e) if e.is_timeout() => return Err(DeviceError::PortTimeout),
            Err(RpcError::Remote(RemoteError::MethodNotFound)) | Err(RpcError::ReplyType) => {
                return Err(DeviceError::FirmwareNotFound {
                    expected: self.config.firmware_name.clone(),
                    found: String::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if name != self.config.firmware_name {
            return Err(DeviceError::FirmwareNotFound {
                expected: self.config.firmware_name.clone(),
                found: name,
            });
        }
        Ok(version)
    }

    /// Wait for the board to come out of reset, then check its identity and
    /// firmware version.
    pub fn initialize(&self) -> Result<u32, DeviceError> {
        thread::sleep(self.config.startup_delay);
        let mut link = self.lock()?;
        let version = self.query_version(&mut link).inspect_err(|e| {
            warn!("initialize failed: {}", e);
        })?;
        if !self.config.accepts(version) {
            return Err(DeviceError::VersionMismatch {
                found: version,
                min: self.config.min_version,
                max: self.config.max_version,
            });
        }
        info!("{} firmware version {} connected", self.config.firmware_name, version);
        link.version = Some(version);
        Ok(version)
    }

    /// Probe the port without initializing. Version bounds are left for
    /// [`Hub::initialize`] to enforce.
    ///
    /// The probe waits at most the serial answer timeout; the regular
    /// timeout is restored afterwards.
    pub fn detect(&self) -> DetectionStatus {
        let Ok(mut link) = self.lock() else {
            return DetectionStatus::Misconfigured;
        };
        if link.version.is_some() {
            return DetectionStatus::CanCommunicate;
        }
        let previous = link.client.timeout();
        link.client.set_timeout(self.config.serial.answer_timeout);
        let probed = self.query_version(&mut link);
        link.client.set_timeout(previous);
        match probed {
            Ok(_) => DetectionStatus::CanCommunicate,
            Err(DeviceError::NoPort) => DetectionStatus::Misconfigured,
            Err(e) => {
                warn!("detect: {}", e);
                DetectionStatus::CanNotCommunicate
            }
        }
    }

    pub fn shutdown(&self) {
        if let Ok(mut link) = self.lock() {
            if link.version.take().is_some() {
                info!("{} hub shut down", self.config.firmware_name);
            }
        }
    }

    /// Firmware version found by the last successful [`Hub::initialize`].
    pub fn version(&self) -> Option<u32> {
        self.lock().ok().and_then(|l| l.version)
    }

    pub fn is_initialized(&self) -> bool {
        self.version().is_some()
    }

    /// Run `f` with exclusive use of the port.
    pub fn with_client<R>(
        &self,
        f: impl FnOnce(&mut Client<S>) -> Result<R, RpcError>,
    ) -> Result<R, DeviceError> {
        let mut link = self.lock()?;
        link.client.purge();
        Ok(f(&mut link.client)?)
    }

    pub fn call<A, R>(&self, method: &str, args: &A) -> Result<R, DeviceError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.with_client(|c| c.call(method, args))
    }

    pub fn prop<T>(&self, name: &str) -> RemoteProp<'_, S, T> {
        RemoteProp {
            hub: self,
            name: name.into(),
            _value: PhantomData,
        }
    }

    pub fn channel_prop<T>(&self, name: &str, channel: usize) -> RemoteChannelProp<'_, S, T> {
        RemoteChannelProp {
            hub: self,
            name: name.into(),
            channel,
            _value: PhantomData,
        }
    }
}

fn method(op: Opcode, name: &str) -> String {
    format!("{}{}", op.symbol(), name)
}

/// Handle to a property on the board.
#[derive(Debug)]
pub struct RemoteProp<'h, S, T> {
    hub: &'h Hub<S>,
    name: String,
    _value: PhantomData<fn() -> T>,
}

impl<S, T> RemoteProp<'_, S, T>
where
    S: ByteStream,
    T: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Result<T, DeviceError> {
        self.hub.call(&method(Opcode::Get, &self.name), &())
    }

    pub fn set(&self, value: &T) -> Result<(), DeviceError> {
        self.hub.call(&method(Opcode::Set, &self.name), &(value,))
    }

    pub fn max_size(&self) -> Result<usize, DeviceError> {
        self.hub.call(&method(Opcode::MaxSize, &self.name), &())
    }

    pub fn size(&self) -> Result<usize, DeviceError> {
        self.hub.call(&method(Opcode::Size, &self.name), &())
    }

    pub fn clear(&self) -> Result<(), DeviceError> {
        self.hub.call(&method(Opcode::Clear, &self.name), &())
    }

    pub fn add(&self, value: &T) -> Result<(), DeviceError> {
        self.hub.call(&method(Opcode::Add, &self.name), &(value,))
    }

    pub fn start(&self) -> Result<(), DeviceError> {
        self.hub.call(&method(Opcode::Start, &self.name), &())
    }

    pub fn stop(&self) -> Result<(), DeviceError> {
        self.hub.call(&method(Opcode::Stop, &self.name), &())
    }

    /// Replace the board's sequence with `values` under one lock.
    pub fn load_sequence(&self, values: &[T]) -> Result<(), DeviceError> {
        let add = method(Opcode::Add, &self.name);
        self.hub.with_client(|c| {
            c.call::<_, ()>(&method(Opcode::Clear, &self.name), &())?;
            for v in values {
                c.call::<_, ()>(&add, &(v,))?;
            }
            Ok(())
        })
    }
}

/// Handle to one channel of a channel property on the board.
#[derive(Debug)]
pub struct RemoteChannelProp<'h, S, T> {
    hub: &'h Hub<S>,
    name: String,
    channel: usize,
    _value: PhantomData<fn() -> T>,
}

impl<S, T> RemoteChannelProp<'_, S, T>
where
    S: ByteStream,
    T: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn get(&self) -> Result<T, DeviceError> {
        self.hub
            .call(&method(Opcode::Get, &self.name), &(self.channel,))
    }

    pub fn set(&self, value: &T) -> Result<(), DeviceError> {
        self.hub
            .call(&method(Opcode::Set, &self.name), &(self.channel, value))
    }

    pub fn max_size(&self) -> Result<usize, DeviceError> {
        self.hub
            .call(&method(Opcode::MaxSize, &self.name), &(self.channel,))
    }

    pub fn size(&self) -> Result<usize, DeviceError> {
        self.hub
            .call(&method(Opcode::Size, &self.name), &(self.channel,))
    }

    pub fn clear(&self) -> Result<(), DeviceError> {
        self.hub
            .call(&method(Opcode::Clear, &self.name), &(self.channel,))
    }

    pub fn add(&self, value: &T) -> Result<(), DeviceError> {
        self.hub
            .call(&method(Opcode::Add, &self.name), &(self.channel, value))
    }

    pub fn start(&self) -> Result<(), DeviceError> {
        self.hub
            .call(&method(Opcode::Start, &self.name), &(self.channel,))
    }

    pub fn stop(&self) -> Result<(), DeviceError> {
        self.hub
            .call(&method(Opcode::Stop, &self.name), &(self.channel,))
    }

    pub fn load_sequence(&self, values: &[T]) -> Result<(), DeviceError> {
        let add = method(Opcode::Add, &self.name);
        self.hub.with_client(|c| {
            c.call::<_, ()>(&method(Opcode::Clear, &self.name), &(self.channel,))?;
            for v in values {
                c.call::<_, ()>(&add, &(self.channel, v))?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::loopback::Loopback;
    use crate::slip::FramingError;

    fn hub_with_reply(reply: &[u8]) -> Hub<Loopback> {
        let slip = Slip::READABLE;
        let mut stream = Loopback::new();
        let mut buf = [0; 64];
        let n = slip.encode(reply, &mut buf).unwrap();
        stream.script(&buf[..n]);
        let config = HubConfig {
            startup_delay: Duration::ZERO,
            ..HubConfig::default()
        };
        Hub::new(stream, slip, config)
    }

    #[test]
    fn codes_follow_host_convention() {
        assert_eq!(DeviceError::PortTimeout.code(), ERR_PORT_OPEN_FAILED);
        assert_eq!(
            DeviceError::VersionMismatch { found: 3, min: 1, max: 2 }.code(),
            ERR_VERSION_MISMATCH
        );
        assert_eq!(
            DeviceError::from(RpcError::Framing(FramingError::Timeout)).code(),
            ERR_COMMUNICATION
        );
        assert_eq!(
            DeviceError::from(RpcError::Remote(RemoteError::CapacityExceeded)),
            DeviceError::Rejected(RemoteError::CapacityExceeded)
        );
    }

    #[test]
    fn messages_tell_failures_apart() {
        let not_found = DeviceError::FirmwareNotFound {
            expected: "MM-Ard".into(),
            found: "Other".into(),
        };
        assert_eq!(
            not_found.to_string(),
            "no MM-Ard firmware found (board reports \"Other\")"
        );
        assert_eq!(
            DeviceError::VersionMismatch { found: 3, min: 1, max: 2 }.to_string(),
            "firmware version 3 not supported, expected 1 to 2"
        );
        assert!(DeviceError::PortTimeout.to_string().starts_with("timeout opening port"));
    }

    #[test]
    fn initialize_accepts_supported_version() {
        let hub = hub_with_reply(br#"[["MM-Ard",2]]"#);
        assert_eq!(hub.initialize(), Ok(2));
        assert!(hub.is_initialized());
        assert_eq!(hub.detect(), DetectionStatus::CanCommunicate);
        hub.shutdown();
        assert_eq!(hub.version(), None);
    }

    #[test]
    fn initialize_rejects_newer_firmware() {
        let hub = hub_with_reply(br#"[["MM-Ard",3]]"#);
        assert_eq!(
            hub.initialize(),
            Err(DeviceError::VersionMismatch { found: 3, min: 1, max: 2 })
        );
        assert!(!hub.is_initialized());
    }

    #[test]
    fn initialize_rejects_foreign_firmware() {
        let hub = hub_with_reply(br#"[["Blinky",2]]"#);
        assert!(matches!(
            hub.initialize(),
            Err(DeviceError::FirmwareNotFound { .. })
        ));
    }

    #[test]
    fn silent_port_is_a_port_timeout() {
        let config = HubConfig {
            startup_delay: Duration::ZERO,
            ..HubConfig::default()
        };
        let hub = Hub::new(Loopback::new(), Slip::READABLE, config);
        assert_eq!(hub.initialize(), Err(DeviceError::PortTimeout));
        assert_eq!(hub.detect(), DetectionStatus::CanNotCommunicate);
    }

    #[test]
    fn detect_uses_the_short_answer_timeout() {
        use crate::loopback::duplex;
        use std::time::Instant;

        let (port, _silent) = duplex();
        let config = HubConfig {
            startup_delay: Duration::ZERO,
            answer_timeout: Duration::from_secs(10),
            ..HubConfig::default()
        };
        let hub = Hub::new(port, Slip::READABLE, config);
        assert_eq!(hub.serial_settings().answer_timeout, Duration::from_millis(500));

        let start = Instant::now();
        assert_eq!(hub.detect(), DetectionStatus::CanNotCommunicate);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(5));

        let timeout = hub.with_client(|c| Ok(c.timeout())).unwrap();
        assert_eq!(timeout, Duration::from_secs(10));
    }

    #[test]
    fn closed_port_is_misconfigured() {
        let mut stream = Loopback::new();
        stream.set_ready(false);
        let hub = Hub::new(stream, Slip::READABLE, HubConfig::default());
        assert_eq!(hub.detect(), DetectionStatus::Misconfigured);
    }
}
