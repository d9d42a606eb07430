//! Configuration file layout.
//!
//! Every section has defaults, so an empty file (or none at all) is valid.

use super::error::{ConfigError, ConfigResult};
use crate::client::DEFAULT_PATH_PATTERN;
use crate::port::OpenOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.server.url.starts_with("ws://") || self.server.url.starts_with("wss://")) {
            return Err(ConfigError::ServerUrl(self.server.url.clone()));
        }

        let pattern =
            Regex::new(&self.serial.path_pattern).map_err(|source| ConfigError::PathPattern {
                pattern: self.serial.path_pattern.clone(),
                source,
            })?;
        if let Some(path) = self.serial.virtual_ports.iter().find(|p| !pattern.is_match(p)) {
            return Err(ConfigError::VirtualPortPath {
                path: path.clone(),
                pattern: self.serial.path_pattern.clone(),
            });
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Zero("serial.baud_rate"));
        }
        if self.session.handshake_timeout_ms == 0 {
            return Err(ConfigError::Zero("session.handshake_timeout_ms"));
        }
        Ok(())
    }
}

/// Remote server section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket URL of the serial server; the namespace is appended to it.
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:17991".to_string(),
        }
    }
}

/// Serial section: the remote device and the local virtual ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path on the server; also the session namespace.
    pub remote_path: String,
    pub baud_rate: u32,
    /// Regex every virtual port path must match.
    pub path_pattern: String,
    /// Virtual ports to register once the session is up.
    pub virtual_ports: Vec<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            remote_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            path_pattern: DEFAULT_PATH_PATTERN.to_string(),
            virtual_ports: vec!["/dev/ttyUSB1".to_string()],
        }
    }
}

impl SerialConfig {
    /// Options sent to the server in the handshake reply.
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions::new(self.remote_path.clone(), self.baud_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the handshake to complete.
    pub handshake_timeout_ms: u64,
    /// Log handshake traffic at info level.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5000,
            debug: false,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    /// Multi-line, coloured.
    #[default]
    Pretty,
    Compact,
}
