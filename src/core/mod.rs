//! # Core Components
//!
//! Messages, their wire framing, and the blocking queue that buffers them.
//!
//! ## Components
//! - **Message**: typed header plus raw body with LIFO push/pop of fixed-layout values
//! - **Codec**: Tokio codec framing messages over byte streams
//! - **Queue**: mutex + condvar double-ended queue shared between threads
//!
//! ## Wire Format
//! ```text
//! [TypeId(4, LE)] [BodyLength(4, LE)] [Body(N)]
//! ```
//!
//! ## Limits
//! - Maximum body size: 16MB by default (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod message;
pub mod queue;
