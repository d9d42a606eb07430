//! Message catalogue exchanged with the remote serial server.
//!
//! | Channel | Direction | Payload |
//! |---|---|---|
//! | `serialport_handshake` | both | `{code, data}` |
//! | `serialport_init_result` | server → client | `{code, data: bool}` |
//! | `serialport_packet` | server → client | raw bytes |
//! | `serialport_send_packet` | client → server | raw bytes |

use crate::error::{ClientError, ClientResult};
use crate::port::OpenOptions;
use crate::transport::Payload;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport lifecycle event raised on every (re)connection.
pub const CONNECT_EVENT: &str = "connect";
/// Transport lifecycle event raised when the connection drops.
pub const DISCONNECT_EVENT: &str = "disconnect";

pub const HANDSHAKE_CHANNEL: &str = "serialport_handshake";
pub const INIT_RESULT_CHANNEL: &str = "serialport_init_result";
pub const PACKET_CHANNEL: &str = "serialport_packet";
pub const SEND_PACKET_CHANNEL: &str = "serialport_send_packet";

/// `code` the server uses when asking for the handshake.
pub const HANDSHAKE_REQUEST_CODE: &str = "handshake";
/// `code` the client answers the handshake with.
pub const HANDSHAKE_REPLY_CODE: &str = "serialport_handshake";
pub const INIT_RESULT_CODE: &str = "serialport_init_result";

/// Generic `{code, data}` envelope the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub code: String,
    #[serde(default)]
    pub data: Value,
}

impl ServerMessage {
    pub fn new(code: impl Into<String>, data: Value) -> Self {
        Self {
            code: code.into(),
            data,
        }
    }

    /// Parse a transport payload, `None` when it is not a `{code, data}` object.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Json(value) => serde_json::from_value(value.clone()).ok(),
            Payload::Binary(_) => None,
        }
    }

    /// `{code: "handshake", data: true}`.
    pub fn is_handshake_request(&self) -> bool {
        self.code == HANDSHAKE_REQUEST_CODE && self.data == Value::Bool(true)
    }
}

/// The client's handshake reply: the options the remote port should use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandshakePayload {
    pub code: String,
    pub data: OpenOptions,
}

impl SessionHandshakePayload {
    pub fn new(options: OpenOptions) -> Self {
        Self {
            code: HANDSHAKE_REPLY_CODE.to_string(),
            data: options,
        }
    }

    pub fn to_payload(&self) -> ClientResult<Payload> {
        Ok(Payload::Json(serde_json::to_value(self)?))
    }
}

/// The server's verdict on remote device initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResultPayload {
    pub code: InitResultCode,
    pub data: bool,
}

/// Only one code is valid on the init-result channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitResultCode {
    #[serde(rename = "serialport_init_result")]
    InitResult,
}

impl InitResultPayload {
    /// Classify an init-result message.
    ///
    /// `Ok(())` for success, `RemoteInitFailed` for an explicit `false`,
    /// `InvalidInitResult` for anything else.
    pub fn evaluate(payload: &Payload) -> ClientResult<()> {
        let value = match payload {
            Payload::Json(value) => value,
            Payload::Binary(bytes) => {
                return Err(ClientError::InvalidInitResult(format!(
                    "binary payload of {} bytes",
                    bytes.len()
                )))
            }
        };
        match serde_json::from_value::<InitResultPayload>(value.clone()) {
            Ok(InitResultPayload { data: true, .. }) => Ok(()),
            Ok(InitResultPayload { data: false, .. }) => Err(ClientError::RemoteInitFailed),
            Err(_) => Err(ClientError::InvalidInitResult(value.to_string())),
        }
    }
}

/// Extract the bytes carried by a `serialport_packet` message.
///
/// Accepts a binary frame, a JSON byte array, a serialized Node `Buffer`
/// (`{"type": "Buffer", "data": [..]}`) or a `{code, data: [..]}` envelope.
pub fn decode_packet(payload: &Payload) -> ClientResult<Bytes> {
    match payload {
        Payload::Binary(bytes) => Ok(bytes.clone()),
        Payload::Json(value) => bytes_from_json(value).ok_or_else(|| {
            ClientError::Serde(format!("packet payload is not a byte sequence: {value}"))
        }),
    }
}

fn bytes_from_json(value: &Value) -> Option<Bytes> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(Bytes::from),
        Value::String(text) => Some(Bytes::copy_from_slice(text.as_bytes())),
        Value::Object(map) => map.get("data").and_then(bytes_from_json),
        _ => None,
    }
}
