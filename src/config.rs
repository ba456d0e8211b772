//! # Configuration Management
//!
//! Centralized configuration for servers and clients.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML text via `from_toml()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Notes
//! - `first_client_id` defaults to 10000; ids below it are never handed out
//! - `handshake_seed` makes challenges reproducible and belongs in tests only

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Max allowed body size (16 MB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// First identifier a server assigns to an accepted connection
pub const FIRST_CLIENT_ID: u32 = 10000;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("FRAMED_NET_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        if let Ok(id) = std::env::var("FRAMED_NET_FIRST_CLIENT_ID") {
            config.server.first_client_id = id.parse::<u32>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid FRAMED_NET_FIRST_CLIENT_ID: {e}"))
            })?;
        }

        if let Ok(seed) = std::env::var("FRAMED_NET_HANDSHAKE_SEED") {
            config.server.handshake_seed = Some(seed.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid FRAMED_NET_HANDSHAKE_SEED: {e}"))
            })?);
        }

        if let Ok(size) = std::env::var("FRAMED_NET_MAX_BODY_SIZE") {
            config.transport.max_body_size = size.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid FRAMED_NET_MAX_BODY_SIZE: {e}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on; the port is passed to `Server::start`
    pub bind_address: String,

    /// Identifier given to the first accepted connection
    pub first_client_id: u32,

    /// Fixed seed for handshake challenges (tests only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_seed: Option<u64>,

    /// Name of the reactor thread
    pub thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            first_client_id: FIRST_CLIENT_ID,
            handshake_seed: None,
            thread_name: String::from("framed-net-server"),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Server bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.first_client_id == 0 {
            errors.push("First client id must be greater than 0 (0 marks unassigned)".to_string());
        }

        if self.thread_name.is_empty() {
            errors.push("Server thread name cannot be empty".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name of the reactor thread
    pub thread_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            thread_name: String::from("framed-net-client"),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.thread_name.is_empty() {
            errors.push("Client thread name cannot be empty".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum accepted body size in bytes
    pub max_body_size: usize,

    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_body_size == 0 {
            errors.push("Max body size cannot be 0".to_string());
        } else if self.max_body_size > u32::MAX as usize {
            errors.push(format!(
                "Max body size too large: {} bytes (the length field is 32 bits)",
                self.max_body_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("framed-net"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
