use crate::port::PortError;
use thiserror::Error;

/// A specialized `Result` type for client and session operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Unified client error type.
///
/// Call-scoped errors (`InvalidPath`, `InvalidOpenOptions`, `PortNotRegistered`)
/// only fail the operation that raised them. `RemoteInitFailed`,
/// `InvalidInitResult` and `HandshakeTimeout` are fatal to the session.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Invalid serial port path: {0}")]
    InvalidPath(String),

    #[error("Invalid open options: {0}")]
    InvalidOpenOptions(String),

    #[error("Remote serial port failed to initialize")]
    RemoteInitFailed,

    #[error("Invalid serial port init result: {0}")]
    InvalidInitResult(String),

    #[error("Handshake did not complete within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The session already failed; carries the original failure.
    #[error("Session failed: {0}")]
    SessionFailed(Box<ClientError>),

    #[error("No virtual port registered for {0}")]
    PortNotRegistered(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Virtual port error: {0}")]
    Port(String),

    #[error("Invalid path pattern: {0}")]
    InvalidPattern(String),

    #[error("A serialization/deserialization error occurred: {0}")]
    Serde(String),
}

impl ClientError {
    /// Whether this error ends the session it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RemoteInitFailed
                | Self::InvalidInitResult(_)
                | Self::HandshakeTimeout(_)
                | Self::SessionFailed(_)
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

// `From` conversions so the `?` operator works across layers.
impl From<PortError> for ClientError {
    fn from(err: PortError) -> Self {
        ClientError::Port(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serde(err.to_string())
    }
}

impl From<regex::Error> for ClientError {
    fn from(err: regex::Error) -> Self {
        ClientError::InvalidPattern(err.to_string())
    }
}

impl From<ClientError> for std::io::Error {
    fn from(err: ClientError) -> Self {
        let kind = match &err {
            ClientError::Transport(_) => std::io::ErrorKind::BrokenPipe,
            ClientError::InvalidPath(_) | ClientError::InvalidOpenOptions(_) => {
                std::io::ErrorKind::InvalidInput
            }
            ClientError::PortNotRegistered(_) => std::io::ErrorKind::NotFound,
            ClientError::HandshakeTimeout(_) => std::io::ErrorKind::TimedOut,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ClientError::InvalidPath("/dev/sda".into()).to_string(),
            "Invalid serial port path: /dev/sda"
        );
        assert_eq!(
            ClientError::RemoteInitFailed.to_string(),
            "Remote serial port failed to initialize"
        );
        let wrapped = ClientError::SessionFailed(Box::new(ClientError::RemoteInitFailed));
        assert_eq!(
            wrapped.to_string(),
            "Session failed: Remote serial port failed to initialize"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(ClientError::RemoteInitFailed.is_fatal());
        assert!(ClientError::InvalidInitResult("x".into()).is_fatal());
        assert!(ClientError::HandshakeTimeout(std::time::Duration::from_secs(1)).is_fatal());
        assert!(!ClientError::InvalidPath("x".into()).is_fatal());
        assert!(!ClientError::InvalidOpenOptions("x".into()).is_fatal());
    }

    #[test]
    fn test_port_error_conversion() {
        let err: ClientError = PortError::NotOpen.into();
        assert!(matches!(err, ClientError::Port(msg) if msg == "Port is not open"));
    }

    #[test]
    fn test_io_error_kind() {
        let io: std::io::Error = ClientError::transport("closed").into();
        assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
