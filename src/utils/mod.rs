//! # Utility Modules
//!
//! Supporting utilities shared by clients and servers.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
