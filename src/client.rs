//! Entry point: opens sessions against a remote serial server.

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::port::{MockBinding, OpenOptions, VirtualBinding};
use crate::session::{Session, SessionOptions};
use crate::transport::{TransportConnector, WsConnector};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::info;

/// Paths accepted when no pattern is configured: `/dev/ttyUSB<n>`,
/// `/dev/ttyAMA<n>`, `/dev/ttyACM<n>` and `COM<n>` (with or without a
/// leading slash).
pub const DEFAULT_PATH_PATTERN: &str = r"^(/dev/tty(USB|AMA|ACM)|/?COM)[0-9]+$";

static DEFAULT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_PATH_PATTERN).expect("default path pattern is valid"));

/// Compiled [`DEFAULT_PATH_PATTERN`].
pub fn default_path_pattern() -> Regex {
    DEFAULT_PATTERN.clone()
}

/// Factory for [`Session`]s.
///
/// Holds the connector used to reach the server, the path pattern new
/// sessions validate virtual port paths against, and the emulation backend
/// they register ports with.
#[derive(Debug, Clone)]
pub struct RemoteSerialClient {
    connector: Arc<dyn TransportConnector>,
    path_pattern: Regex,
    binding: Arc<dyn VirtualBinding>,
    debug: bool,
}

impl RemoteSerialClient {
    /// Client using the default path pattern and a fresh [`MockBinding`].
    pub fn new(connector: impl TransportConnector + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            path_pattern: default_path_pattern(),
            binding: Arc::new(MockBinding::new()),
            debug: false,
        }
    }

    /// Client validating virtual port paths against `pattern`.
    pub fn with_pattern(connector: impl TransportConnector + 'static, pattern: &str) -> ClientResult<Self> {
        let path_pattern = Regex::new(pattern)?;
        Ok(Self {
            path_pattern,
            ..Self::new(connector)
        })
    }

    /// WebSocket client built from a loaded configuration.
    pub fn from_config(config: &Config) -> ClientResult<Self> {
        Ok(Self::with_pattern(WsConnector::new(config.server.url.clone()), &config.serial.path_pattern)?
            .debug(config.session.debug))
    }

    /// Register virtual ports with `binding` instead of the built-in one.
    pub fn with_binding(mut self, binding: Arc<dyn VirtualBinding>) -> Self {
        self.binding = binding;
        self
    }

    /// Log handshake traffic at `info`.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn path_pattern(&self) -> &Regex {
        &self.path_pattern
    }

    pub fn binding(&self) -> &Arc<dyn VirtualBinding> {
        &self.binding
    }

    /// Check `path` against the configured pattern.
    pub fn validate_path(&self, path: &str) -> ClientResult<()> {
        if self.path_pattern.is_match(path) {
            Ok(())
        } else {
            Err(ClientError::InvalidPath(path.to_string()))
        }
    }

    /// Open a session for the remote device at `namespace`.
    ///
    /// `namespace` must match the path pattern. The `path` in `open_options`
    /// is replaced with `namespace` before it is sent in the handshake. No
    /// I/O is awaited; use [`Session::wait_ready`] to wait for the handshake.
    pub fn connect(&self, namespace: &str, open_options: Option<OpenOptions>) -> ClientResult<Session> {
        self.validate_path(namespace)?;
        let mut open_options = open_options
            .ok_or_else(|| ClientError::InvalidOpenOptions("open options are required".into()))?;
        open_options.path = namespace.to_string();

        let transport = self.connector.open(namespace)?;
        let session = Session::new(
            transport,
            open_options,
            SessionOptions {
                binding: Arc::clone(&self.binding),
                path_pattern: self.path_pattern.clone(),
                debug: self.debug,
            },
        );
        info!(session = %session.id(), namespace, "session opened");
        Ok(session)
    }
}
