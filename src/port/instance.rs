//! One virtual port: a registered device path plus, once the application
//! asks for it, the stream opened on that path.

use super::error::PortError;
use super::stream::{VirtualPortStream, WriteSink};
use super::traits::{OpenOptions, VirtualBinding};
use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Callback invoked for every write command issued on a port.
pub type WriteListener = Arc<dyn Fn(&str, &Bytes) -> ClientResult<()> + Send + Sync>;

/// Per-instance emitter for write commands.
///
/// The stream publishes here instead of writing to the device; whoever
/// subscribed (normally the session) forwards the bytes to the remote peer.
#[derive(Default)]
pub struct WriteEmitter {
    listeners: Mutex<Vec<WriteListener>>,
}

impl WriteEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: WriteListener) {
        self.listeners.lock().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl WriteSink for WriteEmitter {
    fn write_command(&self, path: &str, data: Bytes) -> ClientResult<()> {
        // Clone out so listeners run without the lock held.
        let listeners = self.listeners.lock().clone();
        if listeners.is_empty() {
            trace!(path, len = data.len(), "write command with no listeners");
        }
        for listener in listeners {
            listener(path, &data)?;
        }
        Ok(())
    }
}

impl fmt::Debug for WriteEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A registered virtual device and its (lazily opened) stream.
pub struct VirtualPortInstance {
    path: String,
    binding: Arc<dyn VirtualBinding>,
    events: Arc<WriteEmitter>,
    stream: Mutex<Option<Arc<VirtualPortStream>>>,
}

impl VirtualPortInstance {
    /// Wrap a path that is already registered with `binding`.
    pub fn new(path: impl Into<String>, binding: Arc<dyn VirtualBinding>) -> Self {
        Self {
            path: path.into(),
            binding,
            events: Arc::new(WriteEmitter::new()),
            stream: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn binding(&self) -> &Arc<dyn VirtualBinding> {
        &self.binding
    }

    /// Subscribe to write commands issued on this port's stream.
    pub fn on_write(&self, listener: WriteListener) {
        self.events.subscribe(listener);
    }

    /// Get the stream for this port, opening it on first call.
    ///
    /// `path` and `binding` in `open_options` are replaced with this
    /// instance's values. Once a stream exists it is returned as-is and any
    /// options passed later are ignored.
    pub fn get_port(&self, open_options: Option<OpenOptions>) -> ClientResult<Arc<VirtualPortStream>> {
        let mut open_options = open_options
            .ok_or_else(|| ClientError::InvalidOpenOptions("open options are required".into()))?;
        open_options.path = self.path.clone();
        open_options.binding = Some(Arc::clone(&self.binding));

        let mut slot = self.stream.lock();
        if let Some(stream) = slot.as_ref() {
            return Ok(Arc::clone(stream));
        }

        let sink: Arc<dyn WriteSink> = self.events.clone();
        let stream = Arc::new(VirtualPortStream::open(open_options, sink)?);
        debug!(path = %self.path, baud_rate = stream.options().baud_rate, "virtual port stream opened");
        *slot = Some(Arc::clone(&stream));
        Ok(stream)
    }

    /// The stream, if `get_port` has been called.
    pub fn stream(&self) -> Option<Arc<VirtualPortStream>> {
        self.stream.lock().clone()
    }

    /// Inject remote-origin bytes so local reads see them.
    ///
    /// Returns `Ok(false)` and drops the bytes when no stream is open yet.
    pub fn write(&self, data: &[u8]) -> Result<bool, PortError> {
        let stream = self.stream.lock().clone();
        match stream {
            Some(stream) => {
                stream.emit_data(data)?;
                Ok(true)
            }
            None => {
                trace!(path = %self.path, len = data.len(), "no stream yet, dropping inbound bytes");
                Ok(false)
            }
        }
    }

    /// Close the stream if one is open.
    pub fn close(&self) -> Result<(), PortError> {
        if let Some(stream) = self.stream.lock().as_ref() {
            if stream.is_open() {
                stream.close()?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for VirtualPortInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualPortInstance")
            .field("path", &self.path)
            .field("binding", &self.binding.name())
            .field("stream_open", &self.stream.lock().is_some())
            .finish()
    }
}
