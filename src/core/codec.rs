//! Tokio codec framing [`Message`]s on a byte stream.
//!
//! A frame is only yielded once its full header and body are buffered, which
//! gives the "read exactly header, then exactly body" behaviour of the
//! connection's read pipeline without hand-written partial-read state.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_BODY_SIZE;
use crate::core::message::{Message, MessageHeader, MessageKind, HEADER_SIZE};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct MessageCodec<T: MessageKind> {
    max_body_size: usize,
    _kind: PhantomData<fn() -> T>,
}

impl<T: MessageKind> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new(MAX_BODY_SIZE)
    }
}

impl<T: MessageKind> MessageCodec<T> {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            max_body_size,
            _kind: PhantomData,
        }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl<T: MessageKind> Decoder for MessageCodec<T> {
    type Item = Message<T>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = MessageHeader::<T>::from_bytes(&src[..HEADER_SIZE])?;
        let body_len = header.size as usize;
        if body_len > self.max_body_size {
            return Err(ProtocolError::OversizedPacket(body_len));
        }

        let frame_len = HEADER_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = if body_len > 0 {
            src.split_to(body_len).to_vec()
        } else {
            Vec::new()
        };
        trace!(id = ?header.id, body_len, "Decoded frame");

        Message::from_parts(header.id, body).map(Some)
    }
}

impl<T: MessageKind> Encoder<Message<T>> for MessageCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message<T>, dst: &mut BytesMut) -> Result<()> {
        if item.body_len() > self.max_body_size {
            return Err(ProtocolError::OversizedPacket(item.body_len()));
        }

        dst.reserve(item.size());
        dst.put_slice(&item.header().to_bytes());
        dst.put_slice(&item.into_body());
        Ok(())
    }
}
