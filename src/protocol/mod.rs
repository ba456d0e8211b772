//! # Connection Protocol
//!
//! The per-socket state machine and the handshake that guards it.
//!
//! ## Components
//! - **Handshake**: 64-bit challenge/response proving the peer speaks this protocol
//! - **Connection**: socket lifecycle plus the read loop and write chain
//!
//! ## Handshake Flow
//! ```text
//! Server                          Client
//!   │ ── challenge C (u64 LE) ──▶  │
//!   │ ◀── scramble(C) (u64 LE) ──  │
//! ```
//! The handshake is obfuscation that filters out foreign clients. It is not
//! authentication and provides no confidentiality.

pub mod connection;
pub mod handshake;

#[cfg(test)]
mod tests;
