//! Port-specific error types.
//!
//! Errors raised by the virtual-device emulation backend and the streams built
//! on top of it, kept apart from session-level errors.

use thiserror::Error;

/// Errors that can occur while operating on a virtual port.
#[derive(Debug, Error)]
pub enum PortError {
    /// No virtual device is registered under the given path.
    #[error("Virtual port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend was asked to register a path it already owns.
    #[error("Virtual port already registered: {0}")]
    AlreadyRegistered(String),

    /// The device is already held open by another stream.
    #[error("Port is already open")]
    AlreadyOpen,

    /// Attempted to use a port that's not open.
    #[error("Port is not open")]
    NotOpen,

    /// The device was created read-only and refuses writes.
    #[error("Port {0} is read-only")]
    ReadOnly(String),
}

impl PortError {
    /// Create a NotFound error from a port path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create the error returned by a non-blocking read on an empty buffer.
    pub fn would_block() -> Self {
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "No data available",
        ))
    }

    /// True when this error only signals that no bytes were buffered.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}

impl From<PortError> for std::io::Error {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Io(e) => e,
            PortError::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err.to_string()),
            PortError::NotOpen => std::io::Error::new(std::io::ErrorKind::NotConnected, err.to_string()),
            PortError::ReadOnly(_) => {
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, err.to_string())
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}
