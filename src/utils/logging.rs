//! Structured logging setup.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_logging`] once at startup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a global fmt subscriber configured from `config`.
///
/// `RUST_LOG` takes precedence over `config.log_level` when set. Fails if a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_format {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    installed.map_err(|e| {
        ProtocolError::ConfigError(format!("Failed to install log subscriber: {e}"))
    })?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
