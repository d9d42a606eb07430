//! Session: one transport channel, its handshake, and the virtual ports
//! multiplexed over it.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect--> Initializing --init ok--> Ready
//!                                 |
//!                                 +--init false / malformed / timeout--> Failed
//! ```
//!
//! Every `connect` event re-arms the handshake from scratch. `Failed` is
//! terminal.
//!
//! # Traffic
//!
//! Application writes on any virtual port are emitted on
//! `serialport_send_packet`. Every `serialport_packet` from the server is
//! injected into every registered port, in registration order.

use crate::error::{ClientError, ClientResult};
use crate::port::{CreatePortOptions, MockBinding, OpenOptions, VirtualBinding, VirtualPortInstance};
use crate::protocol::{
    decode_packet, InitResultPayload, ServerMessage, SessionHandshakePayload, CONNECT_EVENT,
    DISCONNECT_EVENT, HANDSHAKE_CHANNEL, INIT_RESULT_CHANNEL, PACKET_CHANNEL, SEND_PACKET_CHANNEL,
};
use crate::registry::PortRegistry;
use crate::transport::{Payload, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Initializing,
    Ready,
    Failed,
}

/// Construction parameters for a `Session`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Emulation backend virtual ports are registered with.
    pub binding: Arc<dyn VirtualBinding>,
    /// Pattern every virtual port path must match.
    pub path_pattern: Regex,
    /// Log handshake traffic at `info` instead of `debug`.
    pub debug: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            binding: Arc::new(MockBinding::new()),
            path_pattern: crate::client::default_path_pattern(),
            debug: false,
        }
    }
}

struct SessionInner {
    id: Uuid,
    transport: Arc<dyn Transport>,
    open_options: OpenOptions,
    options: SessionOptions,
    registry: PortRegistry,
    remote_init_status: AtomicBool,
    /// Bumped on every `connect`; listeners armed for an older connection
    /// ignore what they receive.
    generation: AtomicU64,
    state: watch::Sender<SessionState>,
    failure: Mutex<Option<ClientError>>,
}

/// Handle on a session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Wrap `transport` and start listening for the handshake.
    ///
    /// `open_options` is what the session sends to the server as the
    /// configuration for the remote device.
    pub fn new(transport: Arc<dyn Transport>, open_options: OpenOptions, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            transport,
            open_options,
            options,
            registry: PortRegistry::new(),
            remote_init_status: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            state,
            failure: Mutex::new(None),
        });
        SessionInner::install_listeners(&inner);
        if inner.transport.is_connected() {
            SessionInner::on_connected(&inner);
        }
        debug!(session = %inner.id, namespace = inner.transport.namespace(), "session created");
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn namespace(&self) -> &str {
        self.inner.transport.namespace()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// True once the server reported a successful remote init on the
    /// current connection.
    pub fn remote_init_status(&self) -> bool {
        self.inner.remote_init_status.load(Ordering::SeqCst)
    }

    /// The error that moved the session to `Failed`, if any.
    pub fn failure(&self) -> Option<ClientError> {
        self.inner.failure.lock().clone()
    }

    /// Options sent to the server in the handshake reply.
    pub fn open_options(&self) -> &OpenOptions {
        &self.inner.open_options
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Register a virtual port for `path`, or return the existing one.
    ///
    /// On first registration the backend device is created with `echo`
    /// forced on. On later calls `create_options` is ignored.
    pub fn create_port(
        &self,
        path: &str,
        create_options: Option<CreatePortOptions>,
    ) -> ClientResult<Arc<VirtualPortInstance>> {
        if !self.inner.options.path_pattern.is_match(path) {
            return Err(ClientError::InvalidPath(path.to_string()));
        }

        let (instance, created) = self.inner.registry.get_or_try_insert(path, || {
            let mut options = create_options.unwrap_or_default();
            options.echo = true;
            self.inner.options.binding.create_port(path, options)?;

            let instance = VirtualPortInstance::new(path, Arc::clone(&self.inner.options.binding));
            let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
            instance.on_write(Arc::new(move |path, data| match weak.upgrade() {
                Some(inner) => inner.send_packet(path, data),
                None => Err(ClientError::transport("session has been dropped")),
            }));
            Ok::<_, ClientError>(instance)
        })?;

        if created {
            info!(session = %self.inner.id, path, "virtual port registered");
        }
        Ok(instance)
    }

    pub fn port(&self, path: &str) -> Option<Arc<VirtualPortInstance>> {
        self.inner.registry.get(path)
    }

    /// Registered paths in registration order.
    pub fn ports(&self) -> Vec<String> {
        self.inner.registry.paths()
    }

    /// Unregister `path`, closing its stream and releasing the backend device.
    ///
    /// The registry entry is dropped only after the teardown succeeded, so a
    /// failed call leaves the port registered and can be retried.
    pub fn remove_port(&self, path: &str) -> ClientResult<Arc<VirtualPortInstance>> {
        let instance = self
            .inner
            .registry
            .get(path)
            .ok_or_else(|| ClientError::PortNotRegistered(path.to_string()))?;
        instance.close()?;
        let binding = &self.inner.options.binding;
        if binding.is_registered(path) {
            binding.remove_port(path)?;
        }
        self.inner.registry.remove(path);
        info!(session = %self.inner.id, path, "virtual port removed");
        Ok(instance)
    }

    /// Answer a handshake request.
    ///
    /// Replies with the session's open options when `payload` is
    /// `{code: "handshake", data: true}`. Returns whether a reply was sent.
    pub fn handle_handshake_request(&self, payload: &Payload) -> ClientResult<bool> {
        self.inner.handle_handshake_request(payload)
    }

    /// Apply the server's init verdict.
    ///
    /// Success marks the session `Ready`. A `false` verdict or a malformed
    /// message fails the session and is returned as the error.
    pub fn handle_init_result(&self, payload: &Payload) -> ClientResult<()> {
        self.inner.handle_init_result(payload)
    }

    /// Wait until the session is `Ready`.
    ///
    /// Returns the recorded failure if the session fails. When `timeout`
    /// elapses first the session is failed with `HandshakeTimeout`.
    pub async fn wait_ready(&self, timeout: Option<Duration>) -> ClientResult<()> {
        let mut state = self.inner.state.subscribe();
        let inner = Arc::clone(&self.inner);
        let wait = async move {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    SessionState::Ready => return Ok(()),
                    SessionState::Failed => return Err(inner.failure_or_unknown()),
                    SessionState::Disconnected | SessionState::Initializing => {}
                }
                if state.changed().await.is_err() {
                    return Err(ClientError::transport("session closed"));
                }
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    // The init result may have landed after the last poll.
                    if self.inner.fail_unless_ready(ClientError::HandshakeTimeout(limit)) {
                        Err(self.inner.failure_or_unknown())
                    } else {
                        Ok(())
                    }
                }
            },
        }
    }

    /// Close the transport channel. Registered ports stay registered.
    pub fn disconnect(&self) {
        info!(session = %self.inner.id, "disconnecting");
        self.inner.transport.disconnect();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("namespace", &self.inner.transport.namespace())
            .field("state", &self.state())
            .field("remote_init_status", &self.remote_init_status())
            .field("ports", &self.ports())
            .finish()
    }
}

impl SessionInner {
    fn install_listeners(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        this.transport.on(
            CONNECT_EVENT,
            Arc::new(move |_| {
                if let Some(inner) = weak.upgrade() {
                    SessionInner::on_connected(&inner);
                }
            }),
        );

        let weak = Arc::downgrade(this);
        this.transport.on(
            DISCONNECT_EVENT,
            Arc::new(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_disconnected(&reason);
                }
            }),
        );

        let weak = Arc::downgrade(this);
        this.transport.on(
            PACKET_CHANNEL,
            Arc::new(move |payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.route_packet(&payload);
                }
            }),
        );
    }

    /// Arm the handshake listeners for a fresh connection.
    fn on_connected(this: &Arc<Self>) {
        if this.is_failed() {
            warn!(session = %this.id, "transport reconnected but session already failed");
            return;
        }
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        this.remote_init_status.store(false, Ordering::SeqCst);
        this.set_state(SessionState::Initializing);
        info!(session = %this.id, generation, "transport connected, awaiting handshake");

        // The init-result listener goes in first so it is in place before
        // any handshake reply leaves.
        let weak = Arc::downgrade(this);
        this.transport.once(
            INIT_RESULT_CHANNEL,
            Box::new(move |payload| {
                let Some(inner) = weak.upgrade() else { return };
                if !inner.is_current(generation) {
                    return;
                }
                // Failures are recorded by the handler itself.
                let _ = inner.handle_init_result(&payload);
            }),
        );

        let weak = Arc::downgrade(this);
        this.transport.once(
            HANDSHAKE_CHANNEL,
            Box::new(move |payload| {
                let Some(inner) = weak.upgrade() else { return };
                if !inner.is_current(generation) {
                    return;
                }
                if let Err(e) = inner.handle_handshake_request(&payload) {
                    error!(session = %inner.id, error = %e, "failed to send handshake reply");
                }
            }),
        );
    }

    fn on_disconnected(&self, reason: &Payload) {
        self.remote_init_status.store(false, Ordering::SeqCst);
        if self.is_failed() {
            return;
        }
        self.set_state(SessionState::Disconnected);
        info!(session = %self.id, reason = ?reason.as_json(), "transport disconnected");
    }

    fn handle_handshake_request(&self, payload: &Payload) -> ClientResult<bool> {
        if let Some(original) = self.failure.lock().clone() {
            return Err(ClientError::SessionFailed(Box::new(original)));
        }
        match ServerMessage::from_payload(payload) {
            Some(message) if message.is_handshake_request() => {
                let reply = SessionHandshakePayload::new(self.open_options.clone());
                if self.options.debug {
                    info!(session = %self.id, options = ?reply.data, "handshake requested, replying");
                } else {
                    debug!(session = %self.id, options = ?reply.data, "handshake requested, replying");
                }
                self.transport.emit(HANDSHAKE_CHANNEL, reply.to_payload()?)?;
                Ok(true)
            }
            _ => {
                warn!(session = %self.id, payload = ?payload, "ignoring unexpected handshake message");
                Ok(false)
            }
        }
    }

    fn handle_init_result(&self, payload: &Payload) -> ClientResult<()> {
        if let Some(original) = self.failure.lock().clone() {
            return Err(ClientError::SessionFailed(Box::new(original)));
        }
        match InitResultPayload::evaluate(payload) {
            Ok(()) => {
                {
                    // Held across the transition so a concurrent timeout
                    // sees either Ready or nothing.
                    let failure = self.failure.lock();
                    if let Some(original) = failure.clone() {
                        return Err(ClientError::SessionFailed(Box::new(original)));
                    }
                    self.remote_init_status.store(true, Ordering::SeqCst);
                    self.set_state(SessionState::Ready);
                }
                if self.options.debug {
                    info!(session = %self.id, payload = ?payload, "remote serial port initialized");
                } else {
                    info!(session = %self.id, "remote serial port initialized");
                }
                Ok(())
            }
            Err(e) => {
                self.remote_init_status.store(false, Ordering::SeqCst);
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Fan an inbound packet out to every registered port.
    fn route_packet(&self, payload: &Payload) {
        let data = match decode_packet(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!(session = %self.id, error = %e, "dropping undecodable packet");
                return;
            }
        };

        let mut delivered = 0usize;
        for instance in self.registry.snapshot() {
            match instance.write(&data) {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(session = %self.id, path = instance.path(), error = %e, "failed to inject packet")
                }
            }
        }
        debug!(session = %self.id, len = data.len(), delivered, "inbound packet routed");
    }

    fn send_packet(&self, path: &str, data: &Bytes) -> ClientResult<()> {
        if let Some(original) = self.failure.lock().clone() {
            return Err(ClientError::SessionFailed(Box::new(original)));
        }
        debug!(session = %self.id, path, len = data.len(), "sending packet");
        self.transport
            .emit(SEND_PACKET_CHANNEL, Payload::Binary(data.clone()))
    }

    fn fail(&self, err: ClientError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            self.enter_failed(&mut failure, err);
        }
    }

    /// Fail with `err` unless the session is already `Ready`. Returns
    /// whether the session is failed afterwards.
    fn fail_unless_ready(&self, err: ClientError) -> bool {
        let mut failure = self.failure.lock();
        if failure.is_some() {
            return true;
        }
        if *self.state.borrow() == SessionState::Ready {
            return false;
        }
        self.enter_failed(&mut failure, err);
        true
    }

    fn enter_failed(&self, failure: &mut Option<ClientError>, err: ClientError) {
        *failure = Some(err.clone());
        // Disarm whatever handshake listeners are still pending.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.remote_init_status.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Failed);
        error!(session = %self.id, error = %err, "session failed");
    }

    fn failure_or_unknown(&self) -> ClientError {
        self.failure
            .lock()
            .clone()
            .unwrap_or_else(|| ClientError::transport("session failed without a recorded cause"))
    }

    fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(session = %self.id, ?previous, ?next, "session state changed");
        }
    }
}
