//! # Connection
//!
//! One TCP socket and the pipelines that move [`Message`]s over it.
//!
//! ## Lifecycle
//! ```text
//! Connecting ──tcp connect──▶ Validating ──handshake ok──▶ Open ──error/disconnect──▶ Closed
//!                                  └────────handshake failed────────────────────────▶ Closed
//! ```
//! A server-side connection is built from an accepted socket and starts in
//! `Validating`; a client-side connection starts in `Connecting` with no socket.
//!
//! ## Pipelines
//! Every task of a connection runs on its orchestrator's reactor thread:
//! - the **read loop** decodes frames and pushes them onto the shared inbound
//!   queue, tagged with this connection's id when it belongs to a server;
//! - the **write chain** drains the private outbound queue, one message at a
//!   time. [`Connection::send`] posts the enqueue onto the reactor, so the
//!   "is a chain already running" check never races.
//!
//! Any read or write error closes the socket. There is no retry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::TransportConfig;
use crate::core::codec::MessageCodec;
use crate::core::message::{ConnectionId, Message, MessageKind, OwnedMessage};
use crate::core::queue::TsQueue;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{scramble, Challenge};
use crate::utils::metrics::Metrics;

/// Which side of the link a connection belongs to. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Validating = 1,
    Open = 2,
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Validating,
            2 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

type Writer<T> = FramedWrite<OwnedWriteHalf, MessageCodec<T>>;
type Reader<T> = FramedRead<OwnedReadHalf, MessageCodec<T>>;

pub struct Connection<T: MessageKind> {
    id: AtomicU32,
    owner: Owner,
    state: AtomicU8,
    reactor: Handle,
    /// Accepted socket, held until the handshake task splits it.
    socket: Mutex<Option<TcpStream>>,
    peer_addr: Mutex<Option<SocketAddr>>,
    writer: tokio::sync::Mutex<Option<Writer<T>>>,
    outbound: TsQueue<Message<T>>,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    handshake_out: AtomicU64,
    handshake_in: AtomicU64,
    handshake_expected: AtomicU64,
    codec: MessageCodec<T>,
    nodelay: bool,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

impl<T: MessageKind> Connection<T> {
    /// Server-side connection around an accepted socket.
    pub(crate) fn new_server(
        reactor: Handle,
        socket: TcpStream,
        inbound: Arc<TsQueue<OwnedMessage<T>>>,
        challenge: Challenge,
        transport: &TransportConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        if transport.nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }
        let peer_addr = socket.peer_addr().ok();
        metrics.connection_established();

        Arc::new(Self {
            id: AtomicU32::new(0),
            owner: Owner::Server,
            state: AtomicU8::new(ConnectionState::Validating as u8),
            reactor,
            socket: Mutex::new(Some(socket)),
            peer_addr: Mutex::new(peer_addr),
            writer: tokio::sync::Mutex::new(None),
            outbound: TsQueue::new(),
            inbound,
            handshake_out: AtomicU64::new(challenge.out),
            handshake_in: AtomicU64::new(0),
            handshake_expected: AtomicU64::new(challenge.expected),
            codec: MessageCodec::new(transport.max_body_size),
            nodelay: transport.nodelay,
            shutdown: CancellationToken::new(),
            metrics,
        })
    }

    /// Client-side connection; the socket is opened by [`Connection::connect_to_server`].
    pub(crate) fn new_client(
        reactor: Handle,
        inbound: Arc<TsQueue<OwnedMessage<T>>>,
        transport: &TransportConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: AtomicU32::new(0),
            owner: Owner::Client,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            reactor,
            socket: Mutex::new(None),
            peer_addr: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            outbound: TsQueue::new(),
            inbound,
            handshake_out: AtomicU64::new(0),
            handshake_in: AtomicU64::new(0),
            handshake_expected: AtomicU64::new(0),
            codec: MessageCodec::new(transport.max_body_size),
            nodelay: transport.nodelay,
            shutdown: CancellationToken::new(),
            metrics,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// True while the socket is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Validating | ConnectionState::Open
        )
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *lock(&self.peer_addr)
    }

    /// Challenge written (server) or response written (client).
    pub fn handshake_out(&self) -> u64 {
        self.handshake_out.load(Ordering::Acquire)
    }

    /// Value received from the peer during the handshake.
    pub fn handshake_in(&self) -> u64 {
        self.handshake_in.load(Ordering::Acquire)
    }

    /// Response the server expects. Zero on the client side.
    pub fn handshake_expected(&self) -> u64 {
        self.handshake_expected.load(Ordering::Acquire)
    }

    /// Messages queued but not yet written.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.count()
    }

    /// Queue `msg` for writing.
    ///
    /// The enqueue runs on the reactor thread. Messages sent before the
    /// handshake completes are held until the connection opens. A no-op once
    /// the connection is closed.
    pub fn send(self: &Arc<Self>, msg: Message<T>) {
        if self.state() == ConnectionState::Closed {
            debug!(conn_id = self.id(), "Send on closed connection ignored");
            return;
        }

        let conn = Arc::clone(self);
        self.reactor.spawn(async move {
            if conn.state() == ConnectionState::Closed {
                return;
            }
            let was_empty = conn.outbound.push_back_was_empty(msg);
            if was_empty && conn.state() == ConnectionState::Open {
                conn.write_messages().await;
            }
        });
    }

    /// Close the connection.
    ///
    /// In-flight reads and writes observe the closure on the reactor thread
    /// and release their halves of the socket there.
    pub fn disconnect(&self) {
        if self.close() {
            info!(conn_id = self.id(), "Disconnected");
        }
    }

    /// Assign `uid` and start validating the client.
    ///
    /// `on_validated` runs on the reactor once the client answers the
    /// challenge correctly, right before the read loop starts.
    pub(crate) fn connect_to_client<F>(self: &Arc<Self>, uid: ConnectionId, on_validated: F)
    where
        F: FnOnce(&Arc<Connection<T>>) + Send + 'static,
    {
        if self.owner != Owner::Server {
            warn!("connect_to_client called on a client-side connection");
            return;
        }
        if !self.is_connected() {
            return;
        }

        self.id.store(uid, Ordering::Release);
        let conn = Arc::clone(self);
        let span = info_span!("connection", conn_id = uid);
        self.reactor
            .spawn(conn.run_server_side(on_validated).instrument(span));
    }

    /// Open the socket to the first reachable endpoint and answer the
    /// server's challenge.
    pub(crate) fn connect_to_server(self: &Arc<Self>, endpoints: Vec<SocketAddr>) {
        if self.owner != Owner::Client {
            warn!("connect_to_server called on a server-side connection");
            return;
        }

        let conn = Arc::clone(self);
        let span = info_span!("connection", side = "client");
        self.reactor
            .spawn(conn.run_client_side(endpoints).instrument(span));
    }

    async fn run_server_side<F>(self: Arc<Self>, on_validated: F)
    where
        F: FnOnce(&Arc<Connection<T>>) + Send + 'static,
    {
        let taken = lock(&self.socket).take();
        let Some(stream) = taken else {
            return;
        };
        let (mut rd, mut wr) = stream.into_split();

        self.metrics.handshake_attempt();
        let validated = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = self.validate_client(&mut rd, &mut wr) => result,
        };

        match validated {
            Ok(()) => {
                self.metrics.handshake_success();
                *self.writer.lock().await = Some(FramedWrite::new(wr, self.codec));
                if !self.enter_open() {
                    return;
                }
                info!(conn_id = self.id(), "Client validated");
                on_validated(&self);
                let reader = FramedRead::new(rd, self.codec);
                self.read_loop(reader).await;
            }
            Err(e) => {
                self.metrics.handshake_failed();
                warn!(conn_id = self.id(), error = %e, "{}", constants::ERR_VALIDATION_FAILED);
                self.close();
            }
        }
    }

    async fn validate_client(&self, rd: &mut OwnedReadHalf, wr: &mut OwnedWriteHalf) -> Result<()> {
        wr.write_u64_le(self.handshake_out()).await?;
        wr.flush().await?;

        let response = rd.read_u64_le().await?;
        self.handshake_in.store(response, Ordering::Release);

        let expected = self.handshake_expected();
        if response != expected {
            return Err(ProtocolError::ValidationFailed {
                expected,
                received: response,
            });
        }
        Ok(())
    }

    async fn run_client_side(self: Arc<Self>, endpoints: Vec<SocketAddr>) {
        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = TcpStream::connect(&endpoints[..]) => result,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, endpoints = ?endpoints, "Connect failed");
                self.metrics.connection_error();
                self.close();
                return;
            }
        };

        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }
        *lock(&self.peer_addr) = stream.peer_addr().ok();

        if !self.transition(ConnectionState::Connecting, ConnectionState::Validating) {
            // Disconnected while the connect was in flight.
            return;
        }
        self.metrics.connection_established();
        info!(peer = ?self.peer_addr(), "Connected, awaiting challenge");

        let (mut rd, mut wr) = stream.into_split();
        self.metrics.handshake_attempt();
        let answered = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = self.answer_challenge(&mut rd, &mut wr) => result,
        };

        match answered {
            Ok(()) => {
                self.metrics.handshake_success();
                *self.writer.lock().await = Some(FramedWrite::new(wr, self.codec));
                if !self.enter_open() {
                    return;
                }
                debug!("Handshake answered, connection open");
                let reader = FramedRead::new(rd, self.codec);
                self.read_loop(reader).await;
            }
            Err(e) => {
                self.metrics.handshake_failed();
                error!(error = %e, "Handshake with server failed");
                self.metrics.connection_error();
                self.close();
            }
        }
    }

    async fn answer_challenge(&self, rd: &mut OwnedReadHalf, wr: &mut OwnedWriteHalf) -> Result<()> {
        let challenge = rd.read_u64_le().await?;
        self.handshake_in.store(challenge, Ordering::Release);

        let response = scramble(challenge);
        self.handshake_out.store(response, Ordering::Release);
        wr.write_u64_le(response).await?;
        wr.flush().await?;
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut reader: Reader<T>) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(msg)) => {
                    self.metrics.message_received(msg.size() as u64);
                    debug!(conn_id = self.id(), %msg, "Message received");
                    let origin = match self.owner {
                        Owner::Server => Some(self.id()),
                        Owner::Client => None,
                    };
                    self.inbound.push_back(OwnedMessage { origin, msg });
                }
                Some(Err(e)) => {
                    error!(conn_id = self.id(), error = %e, "Read failed");
                    self.metrics.connection_error();
                    self.close();
                    break;
                }
                None => {
                    info!(conn_id = self.id(), "{}", constants::ERR_PEER_CLOSED);
                    self.close();
                    break;
                }
            }
        }

        drop(reader);
        self.writer.lock().await.take();
    }

    /// Drain the outbound queue. Must only run while no other chain is running.
    async fn write_messages(self: Arc<Self>) {
        let mut writer = self.writer.lock().await;
        while let Some(msg) = self.outbound.front() {
            let Some(sink) = writer.as_mut() else {
                break;
            };

            let byte_count = msg.size() as u64;
            let written = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = sink.send(msg) => result,
            };

            match written {
                Ok(()) => {
                    self.metrics.message_sent(byte_count);
                    self.outbound.pop_front();
                }
                Err(e) => {
                    error!(conn_id = self.id(), error = %e, "Write failed");
                    self.metrics.connection_error();
                    writer.take();
                    drop(writer);
                    self.close();
                    return;
                }
            }
        }
    }

    /// Move `Validating → Open` and start writing anything queued during the
    /// handshake. Returns false if the connection was closed meanwhile.
    fn enter_open(self: &Arc<Self>) -> bool {
        if !self.transition(ConnectionState::Validating, ConnectionState::Open) {
            return false;
        }
        if !self.outbound.is_empty() {
            let conn = Arc::clone(self);
            self.reactor.spawn(conn.write_messages());
        }
        true
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark closed and release whatever the reactor tasks are not holding.
    /// Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        let previous =
            ConnectionState::from(self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel));
        if previous == ConnectionState::Closed {
            return false;
        }

        self.shutdown.cancel();
        drop(lock(&self.socket).take());
        self.outbound.clear();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if matches!(
            previous,
            ConnectionState::Validating | ConnectionState::Open
        ) {
            self.metrics.connection_closed();
        }
        true
    }
}

impl<T: MessageKind> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .field("pending_outbound", &self.outbound.count())
            .finish()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
