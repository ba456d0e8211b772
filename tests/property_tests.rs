//! Property-based tests using proptest
//!
//! These tests check message and queue invariants across a wide range of
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use framed_net::core::codec::MessageCodec;
use framed_net::core::message::{Message, HEADER_SIZE};
use framed_net::core::queue::TsQueue;
use framed_net::ProtocolError;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

// Property: values come back out in reverse order and the header tracks the body
proptest! {
    #[test]
    fn prop_push_pop_is_lifo(values in prop::collection::vec(any::<u64>(), 0..256)) {
        let mut msg = Message::<u32>::new(1);
        for v in &values {
            msg.push(v).unwrap();
        }
        prop_assert_eq!(msg.body_len(), values.len() * 8);
        prop_assert_eq!(msg.header().size as usize, msg.body_len());
        prop_assert_eq!(msg.size(), HEADER_SIZE + msg.body_len());

        for v in values.iter().rev() {
            prop_assert_eq!(msg.pop::<u64>().unwrap(), *v);
        }
        prop_assert!(msg.is_empty());
        prop_assert_eq!(msg.header().size, 0);
    }
}

// Property: mixed widths survive in reverse order
proptest! {
    #[test]
    fn prop_mixed_widths(a in any::<u8>(), b in any::<i32>(), c in any::<f64>().prop_filter("not NaN", |f| !f.is_nan()), d in any::<u16>()) {
        let mut msg = Message::<u32>::new(0);
        msg.push(&a).unwrap().push(&b).unwrap().push(&c).unwrap().push(&d).unwrap();
        prop_assert_eq!(msg.body_len(), 1 + 4 + 8 + 2);

        prop_assert_eq!(msg.pop::<u16>().unwrap(), d);
        prop_assert_eq!(msg.pop::<f64>().unwrap(), c);
        prop_assert_eq!(msg.pop::<i32>().unwrap(), b);
        prop_assert_eq!(msg.pop::<u8>().unwrap(), a);
    }
}

// Property: a failed pop never changes the message
proptest! {
    #[test]
    fn prop_out_of_range_pop_is_harmless(body in prop::collection::vec(any::<u8>(), 0..8)) {
        let mut msg = Message::<u32>::from_parts(5, body.clone()).unwrap();
        let before = msg.clone();

        let result = msg.pop::<u64>();
        let is_out_of_range = matches!(result, Err(ProtocolError::OutOfRange { requested: 8, .. }));
        prop_assert!(is_out_of_range);
        prop_assert_eq!(msg, before);
    }
}

// Property: any frame split at any point decodes to the original message
proptest! {
    #[test]
    fn prop_decode_any_split(
        id in any::<u32>(),
        body in prop::collection::vec(any::<u8>(), 0..512),
        split in any::<prop::sample::Index>(),
    ) {
        let mut codec = MessageCodec::<u32>::default();
        let msg = Message::from_parts(id, body).unwrap();
        let mut encoded = BytesMut::new();
        codec.encode(msg.clone(), &mut encoded).unwrap();
        prop_assert_eq!(encoded.len(), msg.size());

        let at = split.index(encoded.len());
        let mut buf = BytesMut::from(&encoded[..at]);
        if at < encoded.len() {
            prop_assert!(codec.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(&encoded[at..]);
        }
        prop_assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
        prop_assert!(buf.is_empty());
    }
}

// Property: the queue is FIFO from the front and LIFO from the back
proptest! {
    #[test]
    fn prop_queue_order(items in prop::collection::vec(any::<i32>(), 0..200)) {
        let queue = TsQueue::new();
        for item in &items {
            queue.push_back(*item);
        }
        prop_assert_eq!(queue.count(), items.len());

        let mut drained = Vec::new();
        while let Some(item) = queue.pop_front() {
            drained.push(item);
        }
        prop_assert_eq!(&drained, &items);

        for item in &items {
            queue.push_front(*item);
        }
        let mut from_back = Vec::new();
        while let Some(item) = queue.pop_back() {
            from_back.push(item);
        }
        prop_assert_eq!(from_back, items);
    }
}
