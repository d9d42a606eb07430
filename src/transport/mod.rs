//! Duplex, channel-addressed message transport.
//!
//! The session only needs four things from a connection: `emit` on a channel,
//! `on`/`once` listeners per channel, and `disconnect`. Lifecycle changes are
//! delivered as ordinary events on the `connect` and `disconnect` channels.
//! Those two names are raised locally only; a peer message carrying either
//! is dropped before dispatch.
//!
//! Two implementations ship with the crate:
//!
//! - [`memory`]: in-process pair, used by tests and for embedding
//! - [`ws`]: WebSocket client with a JSON envelope per message

pub mod memory;
pub mod ws;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{CONNECT_EVENT, DISCONNECT_EVENT};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub use memory::{MemoryConnector, MemoryServer, MemoryTransport};
pub use ws::{WsConnector, WsTransport};

/// Body of one transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
}

impl Payload {
    pub fn json<T: Serialize>(value: &T) -> ClientResult<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }
}

/// Whether `channel` is a lifecycle event name the peer may not use.
pub fn is_reserved_channel(channel: &str) -> bool {
    channel == CONNECT_EVENT || channel == DISCONNECT_EVENT
}

/// Accept `channel` as the target of a message received from the peer.
pub fn check_inbound_channel(channel: &str) -> ClientResult<()> {
    if is_reserved_channel(channel) {
        return Err(ClientError::transport(format!(
            "peer sent a message on reserved channel '{channel}'"
        )));
    }
    Ok(())
}

/// Persistent channel listener.
pub type Listener = Arc<dyn Fn(Payload) + Send + Sync>;

/// Listener removed after its first invocation.
pub type OnceListener = Box<dyn FnOnce(Payload) + Send>;

/// A connected (or connecting) channel to the remote peer.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Namespace this channel was opened for, e.g. `/dev/ttyUSB0`.
    fn namespace(&self) -> &str;

    /// Send `payload` on `channel`.
    fn emit(&self, channel: &str, payload: Payload) -> ClientResult<()>;

    /// Invoke `listener` for every message on `channel`.
    fn on(&self, channel: &str, listener: Listener);

    /// Invoke `listener` for the next message on `channel` only.
    fn once(&self, channel: &str, listener: OnceListener);

    /// Close the channel. Further emits fail.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Opens transport channels by namespace.
pub trait TransportConnector: Send + Sync + fmt::Debug {
    fn open(&self, namespace: &str) -> ClientResult<Arc<dyn Transport>>;
}

/// Per-channel listener bookkeeping shared by the transport implementations.
#[derive(Default)]
pub struct ListenerTable {
    persistent: Mutex<HashMap<String, Vec<Listener>>>,
    once: Mutex<HashMap<String, Vec<OnceListener>>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, channel: &str, listener: Listener) {
        self.persistent
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(listener);
    }

    pub fn once(&self, channel: &str, listener: OnceListener) {
        self.once
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(listener);
    }

    /// Deliver `payload` to every listener on `channel`.
    ///
    /// One-shot listeners are removed before any listener runs, so a listener
    /// that re-arms the same channel waits for the next message. No lock is
    /// held while listeners run. Returns the number of listeners invoked.
    pub fn dispatch(&self, channel: &str, payload: Payload) -> usize {
        let once = self.once.lock().remove(channel).unwrap_or_default();
        let persistent = self
            .persistent
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default();

        let count = once.len() + persistent.len();
        trace!(channel, listeners = count, "dispatching");
        for listener in once {
            listener(payload.clone());
        }
        for listener in persistent {
            listener(payload.clone());
        }
        count
    }

    /// Number of listeners, both kinds, waiting on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        let once = self.once.lock().get(channel).map_or(0, Vec::len);
        let persistent = self.persistent.lock().get(channel).map_or(0, Vec::len);
        once + persistent
    }

    pub fn clear(&self) {
        self.once.lock().clear();
        self.persistent.lock().clear();
    }
}

impl fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut channels: Vec<String> = self.persistent.lock().keys().cloned().collect();
        channels.extend(self.once.lock().keys().cloned());
        channels.sort();
        channels.dedup();
        f.debug_struct("ListenerTable")
            .field("channels", &channels)
            .finish()
    }
}
