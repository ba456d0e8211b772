//! # Server Orchestrator
//!
//! Accepts peers, validates them with the handshake, keeps a registry of live
//! connections and dispatches their messages to a [`ServerHandler`].
//!
//! Connections are identified by the id assigned on acceptance (10000, 10001,
//! ...). Inbound messages carry that id rather than a reference to their
//! connection; [`Server::update`] resolves it through the registry.
//!
//! ## Registry cleanup
//! There is no background reaper. [`Server::message_client`] and
//! [`Server::message_all_clients`] check each target before sending, and any
//! connection found closed is reported to
//! [`ServerHandler::on_client_disconnect`] and removed in the same call.
//! Removed connections are kept aside until the inbound queue drains, so
//! messages they sent before closing still reach the handler.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{ServerConfig, TransportConfig};
use crate::core::message::{ConnectionId, Message, MessageKind, OwnedMessage};
use crate::core::queue::TsQueue;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::handshake::ChallengeGenerator;
use crate::service::reactor::{build_runtime, Reactor};
use crate::utils::metrics::Metrics;

/// Application hooks for a [`Server`].
///
/// `on_client_connect` and `on_client_validated` run on the server's reactor
/// thread; `on_message` and `on_client_disconnect` run on whichever thread
/// calls [`Server::update`] or the `message_*` methods. Keep the reactor-side
/// hooks short.
pub trait ServerHandler<T: MessageKind>: Send + Sync + Sized + 'static {
    /// A socket was accepted. Return `false` to drop it. Rejects by default,
    /// so every server must override this.
    fn on_client_connect(&self, _client: &Arc<Connection<T>>) -> bool {
        false
    }

    /// A registered connection was found closed.
    fn on_client_disconnect(&self, _client: &Arc<Connection<T>>) {}

    /// A message arrived from `client`.
    fn on_message(&self, _server: &Server<T, Self>, _client: &Arc<Connection<T>>, _msg: Message<T>) {}

    /// `client` answered the handshake correctly and its read loop is starting.
    fn on_client_validated(&self, _client: &Arc<Connection<T>>) {}
}

type Registry<T> = BTreeMap<ConnectionId, Arc<Connection<T>>>;

struct Shared<T: MessageKind, H> {
    handler: Arc<H>,
    config: ServerConfig,
    transport: TransportConfig,
    registry: Mutex<Registry<T>>,
    retired: Mutex<Registry<T>>,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    next_id: AtomicU64,
    challenges: ChallengeGenerator,
    metrics: Arc<Metrics>,
}

impl<T: MessageKind, H: ServerHandler<T>> Shared<T, H> {
    fn registry(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retired(&self) -> MutexGuard<'_, Registry<T>> {
        self.retired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registered connection for `id`, falling back to ones pruned since the
    /// inbound queue last drained.
    fn origin(&self, id: ConnectionId) -> Option<Arc<Connection<T>>> {
        let live = self.registry().get(&id).cloned();
        live.or_else(|| self.retired().get(&id).cloned())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let reactor = Handle::current();
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    info!(%peer, "New connection");
                    self.on_accept(&reactor, socket);
                }
                Err(e) => {
                    error!(error = %e, "New connection error");
                    self.metrics.connection_error();
                }
            }
        }
    }

    fn on_accept(&self, reactor: &Handle, socket: TcpStream) {
        let connection = Connection::new_server(
            reactor.clone(),
            socket,
            Arc::clone(&self.inbound),
            self.challenges.next_challenge(),
            &self.transport,
            Arc::clone(&self.metrics),
        );

        if !self.handler.on_client_connect(&connection) {
            self.metrics.connection_rejected();
            connection.disconnect();
            warn!(peer = ?connection.peer_addr(), "Connection denied");
            return;
        }

        let Ok(id) = ConnectionId::try_from(self.next_id.fetch_add(1, Ordering::Relaxed)) else {
            self.metrics.connection_rejected();
            connection.disconnect();
            error!(peer = ?connection.peer_addr(), "{}", constants::ERR_IDS_EXHAUSTED);
            return;
        };
        self.registry().insert(id, Arc::clone(&connection));

        let handler = Arc::clone(&self.handler);
        connection.connect_to_client(id, move |client| handler.on_client_validated(client));
        info!(conn_id = id, "Connection approved");
    }

    fn prune(&self, ids: &[ConnectionId]) {
        let removed: Vec<_> = {
            let mut registry = self.registry();
            ids.iter()
                .filter_map(|id| registry.remove_entry(id))
                .collect()
        };
        self.retired().extend(removed);
    }
}

pub struct Server<T: MessageKind, H: ServerHandler<T>> {
    shared: Arc<Shared<T, H>>,
    reactor: Option<Reactor>,
    local_addr: Option<SocketAddr>,
}

impl<T: MessageKind, H: ServerHandler<T>> Server<T, H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, ServerConfig::default(), TransportConfig::default())
    }

    pub fn with_config(handler: H, config: ServerConfig, transport: TransportConfig) -> Self {
        let challenges = ChallengeGenerator::from_config(config.handshake_seed);
        Self {
            shared: Arc::new(Shared {
                handler: Arc::new(handler),
                next_id: AtomicU64::new(u64::from(config.first_client_id)),
                config,
                transport,
                registry: Mutex::new(BTreeMap::new()),
                retired: Mutex::new(BTreeMap::new()),
                inbound: Arc::new(TsQueue::new()),
                challenges,
                metrics: Arc::new(Metrics::new()),
            }),
            reactor: None,
            local_addr: None,
        }
    }

    /// Bind `bind_address:port`, start accepting and start the reactor thread.
    ///
    /// Port 0 picks a free port; see [`Server::local_addr`].
    #[instrument(skip(self))]
    pub fn start(&mut self, port: u16) -> Result<()> {
        if self.reactor.is_some() {
            return Err(ProtocolError::Setup(constants::ERR_ALREADY_RUNNING.into()));
        }

        let ip: IpAddr = self.shared.config.bind_address.parse().map_err(|e| {
            ProtocolError::Setup(format!(
                "Invalid bind address '{}': {e}",
                self.shared.config.bind_address
            ))
        })?;

        let runtime = build_runtime()?;
        let listener = runtime
            .block_on(TcpListener::bind((ip, port)))
            .map_err(|e| ProtocolError::Setup(format!("Failed to bind {ip}:{port}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        runtime.spawn(
            Arc::clone(&self.shared).accept_loop(listener, shutdown.clone()),
        );

        let reactor = Reactor::start(runtime, shutdown, &self.shared.config.thread_name)?;
        self.reactor = Some(reactor);
        self.local_addr = Some(local_addr);
        info!(%local_addr, "Server started");
        Ok(())
    }

    /// Stop accepting, stop the reactor and join its thread. Registered
    /// connections are closed but stay registered until the next send
    /// reaps them.
    pub fn stop(&mut self) {
        let Some(mut reactor) = self.reactor.take() else {
            return;
        };
        reactor.stop();

        for connection in self.connections() {
            connection.disconnect();
        }
        self.local_addr = None;
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_some()
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Send to one client, or report and remove it if it has gone away.
    pub fn message_client(&self, client: &Arc<Connection<T>>, msg: Message<T>) {
        if client.is_connected() {
            client.send(msg);
        } else {
            self.shared.handler.on_client_disconnect(client);
            self.shared.prune(&[client.id()]);
            warn!(conn_id = client.id(), "Removed disconnected client");
        }
    }

    /// Send to every connected client except `exclude`. Closed connections
    /// met along the way are reported and removed.
    pub fn message_all_clients(&self, msg: &Message<T>, exclude: Option<&Arc<Connection<T>>>) {
        let mut dead = Vec::new();

        for client in self.connections() {
            if client.is_connected() {
                let excluded = exclude.is_some_and(|ignored| Arc::ptr_eq(ignored, &client));
                if !excluded {
                    client.send(msg.clone());
                }
            } else {
                self.shared.handler.on_client_disconnect(&client);
                dead.push(client.id());
            }
        }

        if !dead.is_empty() {
            self.shared.prune(&dead);
            warn!(removed = ?dead, "Removed disconnected clients");
        }
    }

    /// Dispatch queued messages to [`ServerHandler::on_message`] in arrival
    /// order.
    ///
    /// With `wait`, blocks until at least one message is queued. Handles at
    /// most `max_messages` (`None` for all). Returns the number handled.
    ///
    /// A message whose connection was pruned after it was queued is still
    /// dispatched with that connection. Only messages with no known origin
    /// are logged and dropped.
    pub fn update(&self, max_messages: Option<usize>, wait: bool) -> usize {
        if wait {
            self.shared.inbound.wait();
        }

        let limit = max_messages.unwrap_or(usize::MAX);
        let mut handled = 0;
        while handled < limit {
            let Some(owned) = self.shared.inbound.pop_front() else {
                break;
            };
            handled += 1;

            match owned.origin.and_then(|id| self.shared.origin(id)) {
                Some(client) => self.shared.handler.on_message(self, &client, owned.msg),
                None => warn!(origin = ?owned.origin, msg = %owned.msg, "Dropped message from unknown connection"),
            }
        }

        if self.shared.inbound.is_empty() {
            self.shared.retired().clear();
        }
        handled
    }

    /// Messages waiting for [`Server::update`].
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.shared.inbound
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection<T>>> {
        self.shared.registry().get(&id).cloned()
    }

    /// Registered connections in acceptance order.
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.shared.registry().values().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }
}

impl<T: MessageKind, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}
