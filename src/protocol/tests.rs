// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;

use crate::config::TransportConfig;
use crate::core::message::{Message, MessageHeader, OwnedMessage, HEADER_SIZE};
use crate::core::queue::TsQueue;
use crate::protocol::connection::{Connection, ConnectionState, Owner};
use crate::protocol::handshake::{scramble, Challenge};
use crate::utils::metrics::Metrics;

const CHALLENGE: u64 = 0x0123_4567_89AB_CDEF;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (raw, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (raw.unwrap(), accepted.unwrap().0)
}

async fn read_frame(stream: &mut TcpStream) -> (MessageHeader<u32>, Vec<u8>) {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.unwrap();
    let header = MessageHeader::<u32>::from_bytes(&header).unwrap();
    let mut body = vec![0u8; header.size as usize];
    stream.read_exact(&mut body).await.unwrap();
    (header, body)
}

async fn write_frame(stream: &mut TcpStream, msg: &Message<u32>) {
    stream.write_all(&msg.header().to_bytes()).await.unwrap();
    stream.write_all(msg.body()).await.unwrap();
}

struct ServerSide {
    conn: Arc<Connection<u32>>,
    raw: TcpStream,
    inbound: Arc<TsQueue<OwnedMessage<u32>>>,
    metrics: Arc<Metrics>,
    validated: Arc<AtomicBool>,
}

async fn server_side(uid: u32) -> ServerSide {
    let (raw, accepted) = socket_pair().await;
    let inbound: Arc<TsQueue<OwnedMessage<u32>>> = Arc::new(TsQueue::new());
    let metrics = Arc::new(Metrics::new());
    let conn = Connection::new_server(
        Handle::current(),
        accepted,
        Arc::clone(&inbound),
        Challenge::new(CHALLENGE),
        &TransportConfig::default(),
        Arc::clone(&metrics),
    );

    let validated = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&validated);
    conn.connect_to_client(uid, move |_| flag.store(true, Ordering::SeqCst));

    ServerSide {
        conn,
        raw,
        inbound,
        metrics,
        validated,
    }
}

#[tokio::test]
async fn test_server_connection_validates_and_reads() {
    let ServerSide {
        conn,
        mut raw,
        inbound,
        validated,
        ..
    } = server_side(10000).await;

    assert_eq!(conn.owner(), Owner::Server);
    assert_eq!(conn.id(), 10000);
    assert_eq!(conn.state(), ConnectionState::Validating);
    assert!(conn.is_connected());

    let challenge = raw.read_u64_le().await.unwrap();
    assert_eq!(challenge, CHALLENGE);
    raw.write_u64_le(scramble(challenge)).await.unwrap();

    wait_until(|| conn.state() == ConnectionState::Open).await;
    wait_until(|| validated.load(Ordering::SeqCst)).await;
    assert_eq!(conn.handshake_in(), scramble(CHALLENGE));

    let mut msg = Message::new(7u32);
    msg.push(&42u32).unwrap();
    write_frame(&mut raw, &msg).await;

    wait_until(|| !inbound.is_empty()).await;
    let mut owned = inbound.pop_front().unwrap();
    assert_eq!(owned.origin, Some(10000));
    assert_eq!(owned.msg.id(), 7);
    assert_eq!(owned.msg.pop::<u32>().unwrap(), 42);
}

#[tokio::test]
async fn test_wrong_response_closes_connection() {
    let ServerSide {
        conn,
        mut raw,
        metrics,
        validated,
        ..
    } = server_side(10001).await;

    let challenge = raw.read_u64_le().await.unwrap();
    raw.write_u64_le(challenge).await.unwrap();

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), raw.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0, "server should close without writing");

    wait_until(|| conn.state() == ConnectionState::Closed).await;
    assert!(!validated.load(Ordering::SeqCst));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.handshakes_failed, 1);
    assert_eq!(snapshot.connections_active, 0);
}

#[tokio::test]
async fn test_messages_sent_during_validation_are_flushed() {
    let ServerSide { conn, mut raw, .. } = server_side(10002).await;

    let mut first = Message::new(1u32);
    first.push(&1.5f32).unwrap();
    conn.send(first);
    conn.send(Message::new(2u32));

    let challenge = raw.read_u64_le().await.unwrap();
    raw.write_u64_le(scramble(challenge)).await.unwrap();

    let (header, body) = read_frame(&mut raw).await;
    assert_eq!(header.id, 1);
    assert_eq!(header.size, 4);
    assert_eq!(body, 1.5f32.to_ne_bytes());

    let (header, body) = read_frame(&mut raw).await;
    assert_eq!(header.id, 2);
    assert!(body.is_empty());

    wait_until(|| conn.pending_outbound() == 0).await;
}

#[tokio::test]
async fn test_disconnect_stops_sending() {
    let ServerSide {
        conn,
        mut raw,
        metrics,
        ..
    } = server_side(10003).await;

    let challenge = raw.read_u64_le().await.unwrap();
    raw.write_u64_le(scramble(challenge)).await.unwrap();
    wait_until(|| conn.state() == ConnectionState::Open).await;

    conn.disconnect();
    assert!(!conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Closed);

    conn.send(Message::new(9u32));
    assert_eq!(conn.pending_outbound(), 0);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), raw.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);

    // A second disconnect is a no-op.
    conn.disconnect();
    assert_eq!(metrics.snapshot().connections_active, 0);
}

#[tokio::test]
async fn test_client_connection_answers_challenge() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let inbound = Arc::new(TsQueue::new());
    let conn = Connection::<u32>::new_client(
        Handle::current(),
        Arc::clone(&inbound),
        &TransportConfig::default(),
        Arc::new(Metrics::new()),
    );
    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(!conn.is_connected());

    conn.connect_to_server(vec![addr]);
    let (mut raw, _) = listener.accept().await.unwrap();

    raw.write_u64_le(CHALLENGE).await.unwrap();
    let response = raw.read_u64_le().await.unwrap();
    assert_eq!(response, scramble(CHALLENGE));

    wait_until(|| conn.state() == ConnectionState::Open).await;
    assert_eq!(conn.handshake_out(), response);
    assert_eq!(conn.handshake_expected(), 0);

    let mut ping = Message::new(3u32);
    ping.push(&5u64).unwrap();
    conn.send(ping);
    let (header, body) = read_frame(&mut raw).await;
    assert_eq!(header.id, 3);
    assert_eq!(body, 5u64.to_ne_bytes());

    write_frame(&mut raw, &Message::new(4u32)).await;
    wait_until(|| !inbound.is_empty()).await;
    let owned = inbound.pop_front().unwrap();
    assert_eq!(owned.origin, None);
    assert_eq!(owned.msg.id(), 4);

    drop(raw);
    wait_until(|| conn.state() == ConnectionState::Closed).await;
}

#[tokio::test]
async fn test_client_connect_failure_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let conn = Connection::<u32>::new_client(
        Handle::current(),
        Arc::new(TsQueue::new()),
        &TransportConfig::default(),
        Arc::new(Metrics::new()),
    );
    conn.connect_to_server(vec![addr]);

    wait_until(|| conn.state() == ConnectionState::Closed).await;
    assert!(!conn.is_connected());
}
