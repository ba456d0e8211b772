#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for message bodies and the blocking queue
//! Covers boundary sizes, misuse errors and cross-thread hand-off

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framed_net::core::message::{Message, MessageHeader, OwnedMessage, HEADER_SIZE};
use framed_net::core::queue::TsQueue;
use framed_net::error::ProtocolError;
use zerocopy::{FromBytes, Immutable, IntoBytes};

// ============================================================================
// MESSAGE EDGE CASES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, IntoBytes, FromBytes, Immutable)]
#[repr(C)]
struct Snapshot {
    tick: u32,
    x: f32,
    y: f32,
    z: f32,
}

#[test]
fn test_empty_message() {
    let mut msg = Message::<u32>::new(9);
    assert_eq!(msg.size(), HEADER_SIZE);
    assert!(msg.is_empty());
    assert!(matches!(
        msg.pop::<u8>(),
        Err(ProtocolError::OutOfRange {
            requested: 1,
            available: 0
        })
    ));
}

#[test]
fn test_struct_and_array_values() {
    let snap = Snapshot {
        tick: 12,
        x: 1.0,
        y: -2.5,
        z: 0.25,
    };
    let mut msg = Message::<u32>::new(2);
    msg.push(&[1u16, 2, 3]).unwrap().push(&snap).unwrap();
    assert_eq!(msg.body_len(), 6 + 16);

    assert_eq!(msg.pop::<Snapshot>().unwrap(), snap);
    assert_eq!(msg.pop::<[u16; 3]>().unwrap(), [1, 2, 3]);
}

#[test]
fn test_pop_wider_than_pushed_keeps_body() {
    let mut msg = Message::<u32>::new(1);
    msg.push(&1u16).unwrap();
    assert!(msg.pop::<u32>().is_err());
    assert_eq!(msg.body_len(), 2);
    assert_eq!(msg.pop::<u16>().unwrap(), 1);
}

#[test]
fn test_pop_bytes() {
    let mut msg = Message::<u32>::new(1);
    msg.push_bytes(b"hello").unwrap().push(&5u8).unwrap();
    assert_eq!(msg.pop::<u8>().unwrap(), 5);
    assert_eq!(msg.pop_bytes(5).unwrap(), b"hello");
    assert!(msg.pop_bytes(1).is_err());
    assert!(msg.pop_bytes(0).unwrap().is_empty());
}

#[test]
fn test_clear_and_set_id() {
    let mut msg = Message::<u32>::new(1);
    msg.push(&[0u8; 64]).unwrap();
    msg.set_id(4);
    msg.clear();
    assert_eq!(msg.id(), 4);
    assert_eq!(msg.header().size, 0);
}

#[test]
fn test_header_bytes_are_little_endian() {
    let header = MessageHeader { id: 0x0102_0304u32, size: 0x10 };
    assert_eq!(header.to_bytes(), [4, 3, 2, 1, 0x10, 0, 0, 0]);
    assert_eq!(MessageHeader::<u32>::from_bytes(&header.to_bytes()).unwrap(), header);
}

#[test]
fn test_display_formats() {
    let mut msg = Message::<u32>::new(3);
    msg.push(&1u32).unwrap();
    assert_eq!(msg.to_string(), "ID:3 Size:4");

    let owned = OwnedMessage {
        origin: Some(10000),
        msg: msg.clone(),
    };
    assert_eq!(owned.to_string(), "[10000] ID:3 Size:4");
    let anonymous = OwnedMessage { origin: None, msg };
    assert_eq!(anonymous.to_string(), "ID:3 Size:4");
}

// ============================================================================
// QUEUE EDGE CASES
// ============================================================================

#[test]
fn test_queue_empty_pops() {
    let queue = TsQueue::<u8>::new();
    assert!(queue.pop_front().is_none());
    assert!(queue.pop_back().is_none());
    assert!(queue.front().is_none());
    assert!(queue.back().is_none());
}

#[test]
fn test_wait_timeout_expires_on_empty_queue() {
    let queue = TsQueue::<u8>::new();
    let start = Instant::now();
    assert!(!queue.wait_timeout(Duration::from_millis(50)));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_wait_returns_immediately_when_non_empty() {
    let queue = TsQueue::new();
    queue.push_back(1);
    queue.wait();
    assert!(queue.wait_timeout(Duration::ZERO));
}

#[test]
fn test_concurrent_producers_single_consumer() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 500;

    let queue = Arc::new(TsQueue::new());
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.push_back((p, i));
                }
            })
        })
        .collect();

    let mut last_seen = vec![None; PRODUCERS];
    let mut received = 0;
    while received < PRODUCERS * PER_PRODUCER {
        assert!(queue.wait_timeout(Duration::from_secs(5)), "producers stalled");
        while let Some((p, i)) = queue.pop_front() {
            // Each producer's items stay in order.
            if let Some(prev) = last_seen[p] {
                assert!(i > prev);
            }
            last_seen[p] = Some(i);
            received += 1;
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(queue.is_empty());
}

#[test]
fn test_push_back_was_empty_reports_transition() {
    let queue = TsQueue::new();
    assert!(queue.push_back_was_empty(1));
    assert!(!queue.push_back_was_empty(2));
    queue.clear();
    assert!(queue.push_back_was_empty(3));
}
