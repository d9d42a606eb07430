//! In-process transport.
//!
//! `MemoryTransport` is the client end handed to a session; `MemoryServer` is
//! the remote end a test (or an embedding application) drives. Delivery is
//! synchronous: `MemoryServer::emit` runs the client's listeners before it
//! returns, and every client emit is recorded on the server side.

use super::{
    is_reserved_channel, ListenerTable, Listener, OnceListener, Payload, Transport,
    TransportConnector,
};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{CONNECT_EVENT, DISCONNECT_EVENT};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Shared {
    namespace: String,
    connected: AtomicBool,
    /// Set once the client called `disconnect`.
    closed: AtomicBool,
    /// Client listeners (server → client traffic).
    client: ListenerTable,
    /// Server listeners (client → server traffic).
    server: ListenerTable,
    /// Every message the client emitted while connected, in order.
    received: Mutex<Vec<(String, Payload)>>,
    /// Client emits issued before the connection came up.
    pending: Mutex<Vec<(String, Payload)>>,
}

/// Client end of an in-process channel.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Server end of an in-process channel.
#[derive(Debug, Clone)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Create a disconnected pair for `namespace`.
    pub fn pair(namespace: impl Into<String>) -> (MemoryTransport, MemoryServer) {
        let shared = Arc::new(Shared {
            namespace: namespace.into(),
            ..Default::default()
        });
        (
            MemoryTransport {
                shared: Arc::clone(&shared),
            },
            MemoryServer { shared },
        )
    }
}

impl Transport for MemoryTransport {
    fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    fn emit(&self, channel: &str, payload: Payload) -> ClientResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::transport(format!(
                "channel {} is disconnected",
                self.shared.namespace
            )));
        }
        if !self.shared.connected.load(Ordering::SeqCst) {
            self.shared
                .pending
                .lock()
                .push((channel.to_string(), payload));
            return Ok(());
        }
        self.shared
            .received
            .lock()
            .push((channel.to_string(), payload.clone()));
        self.shared.server.dispatch(channel, payload);
        Ok(())
    }

    fn on(&self, channel: &str, listener: Listener) {
        self.shared.client.on(channel, listener);
    }

    fn once(&self, channel: &str, listener: OnceListener) {
        self.shared.client.once(channel, listener);
    }

    fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        self.shared.pending.lock().clear();
        debug!(namespace = %self.shared.namespace, "memory transport disconnected by client");
        if was_connected {
            self.shared
                .client
                .dispatch(DISCONNECT_EVENT, Payload::Json(Value::from("io client disconnect")));
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl MemoryServer {
    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    /// Bring the connection up and raise `connect` on the client.
    ///
    /// Emits the client queued while disconnected are delivered after the
    /// client's `connect` listeners ran. No-op once the client disconnected.
    pub fn connect(&self) {
        if self.shared.closed.load(Ordering::SeqCst)
            || self.shared.connected.swap(true, Ordering::SeqCst)
        {
            return;
        }
        self.shared
            .client
            .dispatch(CONNECT_EVENT, Payload::Json(Value::Null));

        let pending: Vec<_> = std::mem::take(&mut *self.shared.pending.lock());
        for (channel, payload) in pending {
            self.shared
                .received
                .lock()
                .push((channel.clone(), payload.clone()));
            self.shared.server.dispatch(&channel, payload);
        }
    }

    /// Drop the connection from the server side and raise `disconnect`.
    pub fn drop_connection(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared
                .client
                .dispatch(DISCONNECT_EVENT, Payload::Json(Value::from("transport close")));
        }
    }

    /// Deliver a message to the client. Returns the number of listeners
    /// that saw it; messages sent while disconnected are lost.
    ///
    /// `connect` and `disconnect` are lifecycle events: use [`connect`] and
    /// [`drop_connection`]. Emitting on them delivers nothing.
    ///
    /// [`connect`]: MemoryServer::connect
    /// [`drop_connection`]: MemoryServer::drop_connection
    pub fn emit(&self, channel: &str, payload: Payload) -> usize {
        if is_reserved_channel(channel) {
            warn!(namespace = %self.shared.namespace, channel, "dropping message on reserved channel");
            return 0;
        }
        if !self.shared.connected.load(Ordering::SeqCst) {
            return 0;
        }
        self.shared.client.dispatch(channel, payload)
    }

    /// React to messages the client emits on `channel`.
    pub fn on(&self, channel: &str, listener: Listener) {
        self.shared.server.on(channel, listener);
    }

    /// Everything the client emitted so far.
    pub fn received(&self) -> Vec<(String, Payload)> {
        self.shared.received.lock().clone()
    }

    /// Payloads the client emitted on `channel`.
    pub fn received_on(&self, channel: &str) -> Vec<Payload> {
        self.shared
            .received
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear_received(&self) {
        self.shared.received.lock().clear();
    }

    /// Listeners the client has waiting on `channel`.
    pub fn client_listener_count(&self, channel: &str) -> usize {
        self.shared.client.listener_count(channel)
    }

    pub fn is_client_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Connector handing out in-process channels.
///
/// Each `open` creates a fresh pair; the server end is kept so the caller can
/// drive it with [`MemoryConnector::server`]. With `auto_connect` the
/// channel is already up when `open` returns.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    servers: Arc<Mutex<HashMap<String, MemoryServer>>>,
    auto_connect: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Server end of the most recent channel opened for `namespace`.
    pub fn server(&self, namespace: &str) -> Option<MemoryServer> {
        self.servers.lock().get(namespace).cloned()
    }
}

impl TransportConnector for MemoryConnector {
    fn open(&self, namespace: &str) -> ClientResult<Arc<dyn Transport>> {
        let (client, server) = MemoryTransport::pair(namespace);
        if self.auto_connect {
            server.connect();
        }
        self.servers.lock().insert(namespace.to_string(), server);
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_records_on_server() {
        let (client, server) = MemoryTransport::pair("/dev/ttyUSB0");
        server.connect();
        client
            .emit("serialport_send_packet", Payload::binary(vec![1u8]))
            .unwrap();
        assert_eq!(
            server.received_on("serialport_send_packet"),
            vec![Payload::binary(vec![1u8])]
        );
    }

    #[test]
    fn test_emits_before_connect_are_flushed_after() {
        let (client, server) = MemoryTransport::pair("/dev/ttyUSB0");
        client.emit("a", Payload::Json(json!(1))).unwrap();
        assert!(server.received().is_empty());

        server.connect();
        assert_eq!(server.received(), vec![("a".to_string(), Payload::Json(json!(1)))]);
    }

    #[test]
    fn test_connect_event_reaches_client() {
        let (client, server) = MemoryTransport::pair("/dev/ttyUSB0");
        let connects = Arc::new(AtomicUsize::new(0));
        {
            let connects = Arc::clone(&connects);
            client.on(
                CONNECT_EVENT,
                Arc::new(move |_| {
                    connects.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        server.connect();
        server.connect();
        server.drop_connection();
        server.connect();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_server_emit_while_down_is_lost() {
        let (client, server) = MemoryTransport::pair("/dev/ttyUSB0");
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            client.on(
                "x",
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(server.emit("x", Payload::Json(json!(1))), 0);
        server.connect();
        assert_eq!(server.emit("x", Payload::Json(json!(1))), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_cannot_emit_lifecycle_events() {
        let (client, server) = MemoryTransport::pair("/dev/ttyUSB0");
        let hits = Arc::new(AtomicUsize::new(0));
        for event in [CONNECT_EVENT, DISCONNECT_EVENT] {
            let hits = Arc::clone(&hits);
            client.on(
                event,
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        server.connect();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(server.emit(DISCONNECT_EVENT, Payload::Json(json!("spoof"))), 0);
        assert_eq!(server.emit(CONNECT_EVENT, Payload::Json(json!(null))), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(client.is_connected());
    }

    #[test]
    fn test_client_disconnect_is_final() {
        let (client, server) = MemoryTransport::pair("/dev/ttyUSB0");
        server.connect();
        client.disconnect();

        assert!(!client.is_connected());
        assert!(server.is_client_closed());
        assert!(client.emit("a", Payload::Json(json!(1))).is_err());

        server.connect();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connector_keeps_server_end() {
        let connector = MemoryConnector::new().auto_connect(true);
        let transport = connector.open("/dev/ttyUSB0").unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.namespace(), "/dev/ttyUSB0");
        assert!(connector.server("/dev/ttyUSB0").is_some());
        assert!(connector.server("/dev/ttyUSB1").is_none());
    }
}
