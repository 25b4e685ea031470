#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod client;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod loopback;
pub mod prop;
pub mod serial;
pub mod server;
pub mod slip;
pub mod stream;

#[cfg(feature = "std")]
pub mod hub;

pub trait Encode {
    type Error;

    /// Writes the encoded form into `buffer`, returning the number of bytes used.
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Decode<'a>
where
    Self: Sized,
{
    type Error;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error>;
}

pub use client::{Client, RpcError};
pub use dispatch::{DispatchError, Dispatcher, RemoteError};
pub use envelope::{Call, Reply, Request};
pub use prop::{ChannelProp, Opcode, PlaybackTimer, Prop, SeqState, SequenceProp};
pub use serial::{Clock, SerialStream};
pub use server::Responder;
pub use slip::{FramingError, Slip};
pub use stream::{ByteStream, StreamError};

#[cfg(feature = "std")]
pub use serial::SystemClock;

#[cfg(feature = "std")]
pub use hub::{DetectionStatus, DeviceError, Hub, RemoteChannelProp, RemoteProp};
