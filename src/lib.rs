//! # framed-net
//!
//! Typed, length-framed messages over TCP with a client/server pair.
//!
//! Every message is an 8-byte header (type tag and body length) followed by a
//! raw body of fixed-layout values pushed and popped in LIFO order. A server
//! challenges each new peer with a 64-bit handshake before any message flows,
//! and keeps a registry of validated connections that the application drives
//! through [`ServerHandler`] hooks.
//!
//! ## Modules
//! - [`core`]: messages, wire codec, blocking queue
//! - [`protocol`]: handshake and per-socket connection state machine
//! - [`service`]: client and server orchestrators
//! - [`config`]: TOML/env configuration
//! - [`utils`]: logging setup and metrics
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use framed_net::{Connection, Message, Server, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler<u32> for Echo {
//!     fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(&self, server: &Server<u32, Self>, client: &Arc<Connection<u32>>, msg: Message<u32>) {
//!         server.message_client(client, msg);
//!     }
//! }
//!
//! let mut server = Server::<u32, _>::new(Echo);
//! server.start(60000)?;
//! loop {
//!     server.update(None, true);
//! }
//! # Ok::<(), framed_net::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::message::{ConnectionId, Message, MessageHeader, MessageKind, OwnedMessage};
pub use crate::core::queue::TsQueue;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::connection::{Connection, ConnectionState, Owner};
pub use crate::service::{Client, Server, ServerHandler};
