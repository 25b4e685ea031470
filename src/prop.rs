//! Remote properties.
//!
//! A property named `foo` is exposed as a family of methods, one per
//! operation, named by prefixing an opcode character: `?foo` reads it,
//! `!foo` writes it, `+foo` appends to its sequence, and so on (see
//! [`Opcode`]). Channel properties take the channel index as the first
//! argument of every operation.

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::METHOD_NAME_LEN;
use crate::dispatch::{DispatchError, Dispatcher, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Get,
    Set,
    MaxSize,
    Size,
    Clear,
    Add,
    Start,
    Stop,
}

impl Opcode {
    pub const ALL: [Opcode; 8] = [
        Opcode::Get,
        Opcode::Set,
        Opcode::MaxSize,
        Opcode::Size,
        Opcode::Clear,
        Opcode::Add,
        Opcode::Start,
        Opcode::Stop,
    ];

    pub const fn symbol(self) -> char {
        match self {
            Opcode::Get => '?',
            Opcode::Set => '!',
            Opcode::MaxSize => '^',
            Opcode::Size => '#',
            Opcode::Clear => '0',
            Opcode::Add => '+',
            Opcode::Start => '*',
            Opcode::Stop => '~',
        }
    }

    pub fn from_symbol(c: char) -> Option<Opcode> {
        Opcode::ALL.into_iter().find(|op| op.symbol() == c)
    }

    /// Method name for this operation on property `name`.
    pub fn method(self, name: &str) -> Result<heapless::String<METHOD_NAME_LEN>, DispatchError> {
        let too_long = |_| DispatchError::NameTooLong {
            max: METHOD_NAME_LEN,
        };
        let mut m = heapless::String::new();
        m.push(self.symbol()).map_err(too_long)?;
        m.push_str(name).map_err(too_long)?;
        Ok(m)
    }
}

/// Plain get/set value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prop<T> {
    value: T,
}

impl<T> Prop<T> {
    pub const fn new(value: T) -> Prop<T> {
        Prop { value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqState {
    Idle,
    Loading,
    Playing,
}

/// Value that can be preloaded with up to `N` future values and played back.
///
/// `clear` enters loading, `add` appends, `start` begins playback and
/// `stop` returns to idle. The loaded values survive `stop`, so a sequence
/// can be started again without reloading. While playing the buffer is
/// frozen: `add` and `clear` are refused.
#[derive(Debug, Clone)]
pub struct SequenceProp<T, const N: usize> {
    value: T,
    seq: heapless::Vec<T, N>,
    state: SeqState,
    cursor: usize,
}

impl<T: Clone, const N: usize> SequenceProp<T, N> {
    pub fn new(value: T) -> SequenceProp<T, N> {
        SequenceProp {
            value,
            seq: heapless::Vec::new(),
            state: SeqState::Idle,
            cursor: 0,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    pub const fn max_size(&self) -> usize {
        N
    }

    pub fn size(&self) -> usize {
        self.seq.len()
    }

    pub fn state(&self) -> SeqState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == SeqState::Playing
    }

    pub fn values(&self) -> &[T] {
        &self.seq
    }

    pub fn clear(&mut self) -> Result<(), RemoteError> {
        if self.is_playing() {
            return Err(RemoteError::InvalidState);
        }
        self.seq.clear();
        self.cursor = 0;
        self.state = SeqState::Loading;
        Ok(())
    }

    pub fn add(&mut self, value: T) -> Result<(), RemoteError> {
        if self.is_playing() {
            return Err(RemoteError::InvalidState);
        }
        if self.seq.push(value).is_err() {
            warn!("sequence full at {} values", N);
            return Err(RemoteError::CapacityExceeded);
        }
        self.state = SeqState::Loading;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RemoteError> {
        if self.seq.is_empty() {
            return Err(RemoteError::InvalidState);
        }
        self.cursor = 0;
        self.state = SeqState::Playing;
        debug!("sequence started with {} values", self.seq.len());
        Ok(())
    }

    pub fn stop(&mut self) {
        self.state = SeqState::Idle;
        self.cursor = 0;
    }

    /// Advance playback by one step, wrapping at the end of the buffer.
    /// Returns the newly applied value, or `None` when not playing.
    pub fn tick(&mut self) -> Option<&T> {
        if !self.is_playing() {
            return None;
        }
        self.value = self.seq[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.seq.len();
        Some(&self.value)
    }
}

/// `CH` sequence properties sharing one name, selected by index.
#[derive(Debug, Clone)]
pub struct ChannelProp<T, const N: usize, const CH: usize> {
    channels: [SequenceProp<T, N>; CH],
}

impl<T: Clone, const N: usize, const CH: usize> ChannelProp<T, N, CH> {
    pub fn new(value: T) -> ChannelProp<T, N, CH> {
        ChannelProp {
            channels: core::array::from_fn(|_| SequenceProp::new(value.clone())),
        }
    }

    pub const fn channels(&self) -> usize {
        CH
    }

    pub fn channel(&self, index: usize) -> Result<&SequenceProp<T, N>, RemoteError> {
        self.channels.get(index).ok_or(RemoteError::OutOfRange)
    }

    pub fn channel_mut(&mut self, index: usize) -> Result<&mut SequenceProp<T, N>, RemoteError> {
        self.channels.get_mut(index).ok_or(RemoteError::OutOfRange)
    }

    /// Tick every playing channel.
    pub fn tick(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.tick();
        }
    }
}

/// Fires at a fixed interval of a millisecond clock; drives sequence
/// playback from the responder's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTimer {
    interval_ms: u64,
    next_ms: u64,
}

impl PlaybackTimer {
    pub fn new(interval_ms: u64, now_ms: u64) -> PlaybackTimer {
        PlaybackTimer {
            interval_ms,
            next_ms: now_ms + interval_ms,
        }
    }

    pub fn due(&mut self, now_ms: u64) -> bool {
        if now_ms < self.next_ms {
            return false;
        }
        self.next_ms = now_ms + self.interval_ms;
        true
    }
}

impl<C, const M: usize> Dispatcher<C, M> {
    /// Bind `?name` and `!name` to the property `access` selects in the context.
    pub fn bind_prop<T, F>(&mut self, name: &str, access: F) -> Result<(), DispatchError>
    where
        C: 'static,
        T: Clone + Serialize + DeserializeOwned + 'static,
        F: Fn(&mut C) -> &mut Prop<T> + Copy + 'static,
    {
        self.bind(&Opcode::Get.method(name)?, move |c: &mut C, ()| {
            Ok(access(c).get().clone())
        })?;
        self.bind(&Opcode::Set.method(name)?, move |c: &mut C, (v,): (T,)| {
            access(c).set(v);
            Ok(())
        })
    }

    /// Bind all eight operations of a sequence property.
    pub fn bind_sequence<T, F, const N: usize>(
        &mut self,
        name: &str,
        access: F,
    ) -> Result<(), DispatchError>
    where
        C: 'static,
        T: Clone + Serialize + DeserializeOwned + 'static,
        F: Fn(&mut C) -> &mut SequenceProp<T, N> + Copy + 'static,
    {
        self.bind(&Opcode::Get.method(name)?, move |c: &mut C, ()| {
            Ok(access(c).get().clone())
        })?;
        self.bind(&Opcode::Set.method(name)?, move |c: &mut C, (v,): (T,)| {
            access(c).set(v);
            Ok(())
        })?;
        self.bind(&Opcode::MaxSize.method(name)?, move |c: &mut C, ()| {
            Ok(access(c).max_size())
        })?;
        self.bind(&Opcode::Size.method(name)?, move |c: &mut C, ()| {
            Ok(access(c).size())
        })?;
        self.bind(&Opcode::Clear.method(name)?, move |c: &mut C, ()| {
            access(c).clear()
        })?;
        self.bind(&Opcode::Add.method(name)?, move |c: &mut C, (v,): (T,)| {
            access(c).add(v)
        })?;
        self.bind(&Opcode::Start.method(name)?, move |c: &mut C, ()| {
            access(c).start()
        })?;
        self.bind(&Opcode::Stop.method(name)?, move |c: &mut C, ()| {
            access(c).stop();
            Ok(())
        })
    }

    /// Bind all eight operations of a channel property. Every method takes
    /// the channel index as its first argument.
    pub fn bind_channels<T, F, const N: usize, const CH: usize>(
        &mut self,
        name: &str,
        access: F,
    ) -> Result<(), DispatchError>
    where
        C: 'static,
        T: Clone + Serialize + DeserializeOwned + 'static,
        F: Fn(&mut C) -> &mut ChannelProp<T, N, CH> + Copy + 'static,
    {
        self.bind(&Opcode::Get.method(name)?, move |c: &mut C, (ch,): (usize,)| {
            Ok(access(c).channel(ch)?.get().clone())
        })?;
        self.bind(
            &Opcode::Set.method(name)?,
            move |c: &mut C, (ch, v): (usize, T)| {
                access(c).channel_mut(ch)?.set(v);
                Ok(())
            },
        )?;
        self.bind(&Opcode::MaxSize.method(name)?, move |c: &mut C, (ch,): (usize,)| {
            Ok(access(c).channel(ch)?.max_size())
        })?;
        self.bind(&Opcode::Size.method(name)?, move |c: &mut C, (ch,): (usize,)| {
            Ok(access(c).channel(ch)?.size())
        })?;
        self.bind(&Opcode::Clear.method(name)?, move |c: &mut C, (ch,): (usize,)| {
            access(c).channel_mut(ch)?.clear()
        })?;
        self.bind(
            &Opcode::Add.method(name)?,
            move |c: &mut C, (ch, v): (usize, T)| access(c).channel_mut(ch)?.add(v),
        )?;
        self.bind(&Opcode::Start.method(name)?, move |c: &mut C, (ch,): (usize,)| {
            access(c).channel_mut(ch)?.start()
        })?;
        self.bind(&Opcode::Stop.method(name)?, move |c: &mut C, (ch,): (usize,)| {
            access(c).channel_mut(ch)?.stop();
            Ok(())
        })
    }
}
