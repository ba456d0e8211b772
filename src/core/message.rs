//! # Messages
//!
//! A [`Message`] is a typed header plus a raw byte body. Values are pushed
//! onto the tail of the body and popped back off the tail, so extraction
//! order is the reverse of insertion order:
//!
//! ```rust
//! use framed_net::core::message::Message;
//!
//! let mut msg = Message::<u32>::new(3);
//! msg.push(&1.5f32)?.push(&-2.0f32)?.push(&42u32)?;
//!
//! assert_eq!(msg.body_len(), 12);
//! assert_eq!(msg.pop::<u32>().unwrap(), 42);
//! assert_eq!(msg.pop::<f32>().unwrap(), -2.0);
//! assert_eq!(msg.pop::<f32>().unwrap(), 1.5);
//! assert!(msg.is_empty());
//! # Ok::<(), framed_net::error::ProtocolError>(())
//! ```
//!
//! Only fixed-layout values can be pushed, and every pushable type can be
//! popped back. The bounds come from `zerocopy`, so a type containing
//! pointers, dynamically sized data or invalid bit patterns (`bool`, `char`)
//! fails to compile rather than failing at runtime. Body values keep the host's native byte
//! order; the header is always little-endian on the wire.

use std::fmt;
use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::{ProtocolError, Result};

/// Size of an encoded header: tag (u32) + body length (u32).
pub const HEADER_SIZE: usize = 8;

/// Caller-defined message tag.
///
/// Implement this for the application's message enumeration. The tag travels
/// as a little-endian `u32`; a received value `from_u32` does not recognise
/// is a protocol error and closes the connection.
pub trait MessageKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn to_u32(self) -> u32;
    fn from_u32(raw: u32) -> Option<Self>;
}

impl MessageKind for u32 {
    #[inline]
    fn to_u32(self) -> u32 {
        self
    }

    #[inline]
    fn from_u32(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Fixed-size header sent in front of every body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T: MessageKind> {
    pub id: T,
    /// Body length in bytes.
    pub size: u32,
}

impl<T: MessageKind> MessageHeader<T> {
    /// Encode into the 8-byte wire representation.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.id.to_u32().to_le_bytes());
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decode from at least [`HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Transport(
                crate::error::constants::ERR_INVALID_HEADER.into(),
            ));
        }
        let raw_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let id = T::from_u32(raw_id).ok_or(ProtocolError::UnknownMessageType(raw_id))?;
        Ok(Self { id, size })
    }
}

/// A typed, length-framed message.
///
/// `header().size` always equals `body().len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T: MessageKind> {
    header: MessageHeader<T>,
    body: Vec<u8>,
}

impl<T: MessageKind> Message<T> {
    pub fn new(id: T) -> Self {
        Self {
            header: MessageHeader { id, size: 0 },
            body: Vec::new(),
        }
    }

    /// Build a message around an existing body.
    pub fn from_parts(id: T, body: Vec<u8>) -> Result<Self> {
        let size = u32::try_from(body.len())
            .map_err(|_| ProtocolError::OversizedPacket(body.len()))?;
        Ok(Self {
            header: MessageHeader { id, size },
            body,
        })
    }

    pub fn id(&self) -> T {
        self.header.id
    }

    pub fn set_id(&mut self, id: T) {
        self.header.id = id;
    }

    pub fn header(&self) -> &MessageHeader<T> {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Total encoded size: header plus body.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    pub fn clear(&mut self) {
        self.body.clear();
        self.sync_header();
    }

    /// Append the raw bytes of a fixed-layout value.
    ///
    /// Fails with [`ProtocolError::OversizedPacket`], leaving the body
    /// untouched, if the body would outgrow the 32-bit length field.
    pub fn push<V>(&mut self, value: &V) -> Result<&mut Self>
    where
        V: IntoBytes + FromBytes + Immutable,
    {
        self.push_bytes(value.as_bytes())
    }

    /// Append raw bytes. They come back out with [`Message::pop_bytes`].
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let size = grown_size(self.body.len(), bytes.len())?;
        self.body.extend_from_slice(bytes);
        self.header.size = size;
        Ok(self)
    }

    /// Remove the most recently pushed value of type `V`.
    ///
    /// Returns [`ProtocolError::OutOfRange`] without touching the body when
    /// fewer than `size_of::<V>()` bytes remain.
    pub fn pop<V: FromBytes>(&mut self) -> Result<V> {
        let requested = size_of::<V>();
        let start = self.tail_start(requested)?;
        let value = V::read_from_bytes(&self.body[start..]).map_err(|_| {
            ProtocolError::OutOfRange {
                requested,
                available: self.body.len(),
            }
        })?;
        self.body.truncate(start);
        self.sync_header();
        Ok(value)
    }

    /// Remove the last `len` bytes of the body.
    pub fn pop_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let start = self.tail_start(len)?;
        let tail = self.body.split_off(start);
        self.sync_header();
        Ok(tail)
    }

    pub(crate) fn into_body(self) -> Vec<u8> {
        self.body
    }

    fn tail_start(&self, requested: usize) -> Result<usize> {
        self.body
            .len()
            .checked_sub(requested)
            .ok_or(ProtocolError::OutOfRange {
                requested,
                available: self.body.len(),
            })
    }

    // Only called after the body shrinks, so the length still fits in u32.
    #[inline]
    fn sync_header(&mut self) {
        self.header.size = self.body.len() as u32;
    }
}

/// Body length after appending `extra` bytes, if it still fits the header.
fn grown_size(current: usize, extra: usize) -> Result<u32> {
    current
        .checked_add(extra)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or(ProtocolError::OversizedPacket(current.saturating_add(extra)))
}

impl<T: MessageKind> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{:?} Size:{}", self.header.id, self.header.size)
    }
}

/// Connection identifier assigned by a server. `0` means unassigned.
pub type ConnectionId = u32;

/// A message tagged with the connection it arrived on.
///
/// `origin` is only set on the server side, where it is resolved back to a
/// connection through the server's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage<T: MessageKind> {
    pub origin: Option<ConnectionId>,
    pub msg: Message<T>,
}

impl<T: MessageKind> fmt::Display for OwnedMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(id) => write!(f, "[{id}] {}", self.msg),
            None => write!(f, "{}", self.msg),
        }
    }
}
