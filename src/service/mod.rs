//! # Orchestrators
//!
//! The application-facing halves of the transport.
//!
//! ## Components
//! - **Client**: one connection to a server plus its reactor thread
//! - **Server**: accept loop, connection registry and message dispatch
//!
//! Each orchestrator owns a single background thread. Every network task it
//! starts runs there, while the application thread drains the inbound queue.

pub mod client;
pub(crate) mod reactor;
pub mod server;

pub use client::Client;
pub use server::{Server, ServerHandler};
