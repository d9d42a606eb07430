//! WebSocket transport.
//!
//! One WebSocket per namespace: the namespace is appended to the server URL,
//! so `ws://localhost:17991` plus `/dev/ttyUSB0` connects to
//! `ws://localhost:17991/dev/ttyUSB0`.
//!
//! Framing:
//!
//! - JSON payloads travel as text frames `{"channel": "...", "payload": ...}`
//! - byte payloads travel as binary frames: one length byte, the UTF-8
//!   channel name, then the raw bytes
//!
//! Emits issued before the socket is up are queued and flushed once it is.
//! Reconnection is left to whoever owns the session.

use super::{
    check_inbound_channel, ListenerTable, Listener, OnceListener, Payload, Transport,
    TransportConnector,
};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{CONNECT_EVENT, DISCONNECT_EVENT};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Text-frame envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    channel: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Default)]
struct WsShared {
    listeners: ListenerTable,
    connected: AtomicBool,
    closed: AtomicBool,
    shutdown: Notify,
}

/// WebSocket client channel for one namespace.
#[derive(Debug)]
pub struct WsTransport {
    namespace: String,
    endpoint: String,
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<WsShared>,
}

impl WsTransport {
    /// Start connecting to `server_url` + `namespace` in the background.
    ///
    /// Must be called from within a Tokio runtime. The `connect` event fires
    /// once the socket is established.
    pub fn connect(server_url: &str, namespace: &str) -> ClientResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::transport("WebSocket transport requires a Tokio runtime"))?;

        let endpoint = endpoint_url(server_url, namespace);
        let (outbound, queue) = mpsc::unbounded_channel();
        let shared = Arc::new(WsShared::default());

        runtime.spawn(run_connection(endpoint.clone(), queue, Arc::clone(&shared)));
        debug!(%endpoint, "WebSocket transport starting");

        Ok(Self {
            namespace: namespace.to_string(),
            endpoint,
            outbound,
            shared,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for WsTransport {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn emit(&self, channel: &str, payload: Payload) -> ClientResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::transport(format!(
                "channel {} is disconnected",
                self.namespace
            )));
        }
        let frame = encode_frame(channel, payload)?;
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::transport("WebSocket connection task has stopped"))
    }

    fn on(&self, channel: &str, listener: Listener) {
        self.shared.listeners.on(channel, listener);
    }

    fn once(&self, channel: &str, listener: OnceListener) {
        self.shared.listeners.once(channel, listener);
    }

    fn disconnect(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.shutdown.notify_one();
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

/// Opens a `WsTransport` per namespace against one server URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    server_url: String,
}

impl WsConnector {
    /// `server_url` example: `ws://localhost:17991`.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl TransportConnector for WsConnector {
    fn open(&self, namespace: &str) -> ClientResult<Arc<dyn Transport>> {
        Ok(Arc::new(WsTransport::connect(&self.server_url, namespace)?))
    }
}

fn endpoint_url(server_url: &str, namespace: &str) -> String {
    let base = server_url.trim_end_matches('/');
    if namespace.starts_with('/') {
        format!("{base}{namespace}")
    } else {
        format!("{base}/{namespace}")
    }
}

fn encode_frame(channel: &str, payload: Payload) -> ClientResult<Message> {
    match payload {
        Payload::Json(payload) => {
            let text = serde_json::to_string(&Envelope {
                channel: channel.to_string(),
                payload,
            })?;
            Ok(Message::Text(text))
        }
        Payload::Binary(data) => {
            let name = channel.as_bytes();
            let len = u8::try_from(name.len()).map_err(|_| {
                ClientError::transport(format!("channel name too long for binary frame: {channel}"))
            })?;
            let mut frame = Vec::with_capacity(1 + name.len() + data.len());
            frame.push(len);
            frame.extend_from_slice(name);
            frame.extend_from_slice(&data);
            Ok(Message::Binary(frame))
        }
    }
}

fn decode_text(text: &str) -> ClientResult<(String, Payload)> {
    let envelope: Envelope = serde_json::from_str(text)?;
    check_inbound_channel(&envelope.channel)?;
    Ok((envelope.channel, Payload::Json(envelope.payload)))
}

fn decode_binary(frame: Vec<u8>) -> ClientResult<(String, Payload)> {
    let (&len, rest) = frame
        .split_first()
        .ok_or_else(|| ClientError::transport("empty binary frame"))?;
    let len = usize::from(len);
    if rest.len() < len {
        return Err(ClientError::transport("truncated binary frame"));
    }
    let channel = std::str::from_utf8(&rest[..len])
        .map_err(|e| ClientError::transport(format!("channel name is not UTF-8: {e}")))?
        .to_string();
    check_inbound_channel(&channel)?;
    let data = Bytes::copy_from_slice(&rest[len..]);
    Ok((channel, Payload::Binary(data)))
}

async fn run_connection(
    endpoint: String,
    mut queue: mpsc::UnboundedReceiver<Message>,
    shared: Arc<WsShared>,
) {
    let connecting = connect_async(endpoint.as_str());
    let socket = tokio::select! {
        result = connecting => match result {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(%endpoint, error = %e, "WebSocket connect failed");
                shared.closed.store(true, Ordering::SeqCst);
                return;
            }
        },
        _ = shared.shutdown.notified() => return,
    };

    shared.connected.store(true, Ordering::SeqCst);
    info!(%endpoint, "WebSocket connected");
    shared.listeners.dispatch(CONNECT_EVENT, Payload::Json(Value::Null));

    let (mut sink, mut stream) = socket.split();
    let reason = loop {
        tokio::select! {
            outgoing = queue.recv() => match outgoing {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        break format!("send failed: {e}");
                    }
                }
                None => break "transport dropped".to_string(),
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match decode_text(&text) {
                    Ok((channel, payload)) => {
                        shared.listeners.dispatch(&channel, payload);
                    }
                    Err(e) => warn!(error = %e, "ignoring text frame"),
                },
                Some(Ok(Message::Binary(frame))) => match decode_binary(frame) {
                    Ok((channel, payload)) => {
                        shared.listeners.dispatch(&channel, payload);
                    }
                    Err(e) => warn!(error = %e, "ignoring binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break "transport close".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("transport error: {e}"),
            },
            _ = shared.shutdown.notified() => {
                let _ = sink.send(Message::Close(None)).await;
                break "io client disconnect".to_string();
            }
        }
    };

    shared.connected.store(false, Ordering::SeqCst);
    shared.closed.store(true, Ordering::SeqCst);
    info!(%endpoint, %reason, "WebSocket disconnected");
    shared
        .listeners
        .dispatch(DISCONNECT_EVENT, Payload::Json(Value::from(reason)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("ws://localhost:17991", "/dev/ttyUSB0"),
            "ws://localhost:17991/dev/ttyUSB0"
        );
        assert_eq!(endpoint_url("ws://localhost:17991/", "COM3"), "ws://localhost:17991/COM3");
    }

    #[test]
    fn test_text_frame_roundtrip() {
        let frame = encode_frame("serialport_handshake", Payload::Json(json!({"code": "x"}))).unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let (channel, payload) = decode_text(&text).unwrap();
        assert_eq!(channel, "serialport_handshake");
        assert_eq!(payload, Payload::Json(json!({"code": "x"})));
    }

    #[test]
    fn test_binary_frame_layout() {
        let frame = encode_frame("ab", Payload::binary(vec![0x01u8, 0x02])).unwrap();
        let Message::Binary(data) = frame else {
            panic!("expected binary frame");
        };
        assert_eq!(data, vec![2, b'a', b'b', 0x01, 0x02]);

        let (channel, payload) = decode_binary(data).unwrap();
        assert_eq!(channel, "ab");
        assert_eq!(payload, Payload::binary(vec![0x01u8, 0x02]));
    }

    #[test]
    fn test_bad_binary_frames() {
        assert!(decode_binary(Vec::new()).is_err());
        assert!(decode_binary(vec![5, b'a']).is_err());
        assert!(decode_binary(vec![1, 0xFF]).is_err());
    }

    #[test]
    fn test_lifecycle_names_rejected_from_wire() {
        assert!(decode_text(r#"{"channel":"disconnect","payload":"x"}"#).is_err());
        assert!(decode_text(r#"{"channel":"connect"}"#).is_err());

        let mut frame = vec![7];
        frame.extend_from_slice(b"connect");
        frame.push(0x01);
        assert!(decode_binary(frame).is_err());
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let result = WsTransport::connect("ws://localhost:1", "/dev/ttyUSB0");
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_emit_after_disconnect_fails() {
        let transport = WsTransport::connect("ws://127.0.0.1:9", "/dev/ttyUSB0").unwrap();
        transport.disconnect();
        assert!(transport.emit("a", Payload::Json(json!(1))).is_err());
        assert!(!transport.is_connected());
    }
}
