//! Errors raised while loading or validating configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between a config file and a usable [`Config`].
///
/// [`Config`]: super::Config
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read or written.
    #[error("cannot {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode configuration as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// `server.url` is not a WebSocket URL.
    #[error("server.url must start with ws:// or wss://, got '{0}'")]
    ServerUrl(String),

    /// `serial.path_pattern` does not compile.
    #[error("serial.path_pattern '{pattern}' is not a valid regex: {source}")]
    PathPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A configured virtual port would be refused by `create_port`.
    #[error("virtual port '{path}' does not match serial.path_pattern '{pattern}'")]
    VirtualPortPath { path: String, pattern: String },

    /// A numeric setting that must be positive is zero.
    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    /// A `REMOTE_SERIAL_*` override could not be parsed.
    #[error("environment variable {var}: {message}")]
    Env { var: String, message: String },
}

impl ConfigError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn env<V: Into<String>, M: Into<String>>(var: V, message: M) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
