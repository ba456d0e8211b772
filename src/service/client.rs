//! # Client Orchestrator
//!
//! Owns exactly one [`Connection`] to a server and the reactor thread that
//! drives it. Received messages are not pushed to the application; it drains
//! [`Client::incoming`] at its own pace.
//!
//! ```rust,no_run
//! use framed_net::core::message::Message;
//! use framed_net::service::client::Client;
//!
//! let mut client = Client::<u32>::new();
//! client.connect("127.0.0.1", 60000)?;
//!
//! let mut msg = Message::new(3);
//! msg.push(&1.0f32)?.push(&2.0f32)?;
//! client.send(msg);
//!
//! while client.is_connected() {
//!     client.incoming().wait();
//!     while let Some(owned) = client.incoming().pop_front() {
//!         println!("{}", owned.msg);
//!     }
//! }
//! # Ok::<(), framed_net::error::ProtocolError>(())
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{ClientConfig, TransportConfig};
use crate::core::message::{Message, MessageKind, OwnedMessage};
use crate::core::queue::TsQueue;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::service::reactor::{build_runtime, Reactor};
use crate::utils::metrics::Metrics;

pub struct Client<T: MessageKind> {
    config: ClientConfig,
    transport: TransportConfig,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    connection: Option<Arc<Connection<T>>>,
    reactor: Option<Reactor>,
    metrics: Arc<Metrics>,
}

impl<T: MessageKind> Default for Client<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> Client<T> {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default(), TransportConfig::default())
    }

    pub fn with_config(config: ClientConfig, transport: TransportConfig) -> Self {
        Self {
            config,
            transport,
            inbound: Arc::new(TsQueue::new()),
            connection: None,
            reactor: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Resolve `host:port`, start connecting and start the reactor thread.
    ///
    /// Returns once the connect attempt is under way; poll
    /// [`Client::is_connected`] to learn whether it succeeded. Only resolution
    /// and reactor setup failures are reported here. An existing connection is
    /// dropped first.
    #[instrument(skip(self))]
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.connection.is_some() || self.reactor.is_some() {
            self.disconnect();
        }

        let runtime = build_runtime()?;
        let endpoints: Vec<SocketAddr> = runtime
            .block_on(tokio::net::lookup_host((host, port)))
            .map_err(|e| {
                ProtocolError::Setup(format!(
                    "{} '{host}:{port}': {e}",
                    constants::ERR_RESOLVE_FAILED
                ))
            })?
            .collect();
        if endpoints.is_empty() {
            return Err(ProtocolError::Setup(format!(
                "{} '{host}:{port}'",
                constants::ERR_NO_ADDRESSES
            )));
        }

        let connection = Connection::new_client(
            runtime.handle().clone(),
            Arc::clone(&self.inbound),
            &self.transport,
            Arc::clone(&self.metrics),
        );
        connection.connect_to_server(endpoints);

        let reactor = Reactor::start(runtime, CancellationToken::new(), &self.config.thread_name)?;
        self.connection = Some(connection);
        self.reactor = Some(reactor);
        info!("Connecting");
        Ok(())
    }

    /// Close the connection, stop the reactor and release the connection.
    pub fn disconnect(&mut self) {
        if let Some(connection) = &self.connection {
            connection.disconnect();
        }
        if let Some(mut reactor) = self.reactor.take() {
            reactor.stop();
        }
        if self.connection.take().is_some() {
            info!("Client disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Queue a message for the server. A no-op without a connection.
    pub fn send(&self, msg: Message<T>) {
        match &self.connection {
            Some(connection) => connection.send(msg),
            None => debug!("Send without a connection ignored"),
        }
    }

    /// Messages received from the server, oldest first.
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.inbound
    }

    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<T: MessageKind> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
