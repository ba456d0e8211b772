//! # Error Types
//!
//! Error handling for the framed transport.
//!
//! This module defines every error variant that can occur during transport
//! operations, from socket-level I/O failures up to handshake validation and
//! message body misuse.
//!
//! ## Error Categories
//! - **Setup Errors**: address resolution, bind and runtime construction failures,
//!   returned synchronously from `Client::connect` / `Server::start`
//! - **Transport Errors**: read/write/accept failures mid-pipeline; contained in
//!   the connection, which closes itself
//! - **Validation Failures**: wrong handshake response; treated like a transport error
//! - **Protocol Misuse**: popping more bytes than a message body holds
//! - **Configuration Errors**: unreadable or invalid configuration
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use framed_net::core::message::Message;
//! use framed_net::error::ProtocolError;
//!
//! let mut msg = Message::<u32>::new(1);
//! msg.push(&7u16)?;
//! match msg.pop::<u64>() {
//!     Err(ProtocolError::OutOfRange { requested, available }) => {
//!         assert_eq!((requested, available), (8, 2));
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! # Ok::<(), framed_net::error::ProtocolError>(())
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Setup errors
    pub const ERR_RESOLVE_FAILED: &str = "Failed to resolve address";
    pub const ERR_NO_ADDRESSES: &str = "Address resolved to no endpoints";
    pub const ERR_RUNTIME_BUILD: &str = "Failed to build reactor runtime";
    pub const ERR_THREAD_SPAWN: &str = "Failed to spawn reactor thread";
    pub const ERR_ALREADY_RUNNING: &str = "Server is already running";

    /// Connection errors
    pub const ERR_PEER_CLOSED: &str = "Peer closed the connection";
    pub const ERR_IDS_EXHAUSTED: &str = "Connection ids exhausted";

    /// Handshake errors
    pub const ERR_VALIDATION_FAILED: &str = "Client failed validation";

    /// Codec errors
    pub const ERR_INVALID_HEADER: &str = "Invalid message header";
}

/// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake validation failed: expected {expected:#018x}, received {received:#018x}")]
    ValidationFailed { expected: u64, received: u64 },

    #[error("Pop of {requested} bytes out of range: body holds {available} bytes")]
    OutOfRange { requested: usize, available: usize },

    #[error("Message body too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for errors that end a connection's pipeline.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Transport(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::ValidationFailed { .. }
                | ProtocolError::OversizedPacket(_)
                | ProtocolError::UnknownMessageType(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
