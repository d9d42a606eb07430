//! Shared helpers for the integration tests.
//!
//! Everything runs over the in-memory transport: the `MemoryServer` half
//! plays the remote serial server.

#![allow(dead_code)]

use remote_serialport_client::protocol::{HANDSHAKE_CHANNEL, INIT_RESULT_CHANNEL, SEND_PACKET_CHANNEL};
use remote_serialport_client::{
    MemoryConnector, MemoryServer, MockBinding, OpenOptions, Payload, RemoteSerialClient, Session,
    SessionState, VirtualPortStream,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const REMOTE_PATH: &str = "/dev/ttyUSB0";

/// A client wired to an in-memory connector and an inspectable binding.
pub struct Harness {
    pub connector: MemoryConnector,
    pub binding: MockBinding,
    pub client: RemoteSerialClient,
}

impl Harness {
    pub fn new() -> Self {
        let connector = MemoryConnector::new();
        let binding = MockBinding::new();
        let client = RemoteSerialClient::new(connector.clone()).with_binding(Arc::new(binding.clone()));
        Self {
            connector,
            binding,
            client,
        }
    }

    /// Open a session for `REMOTE_PATH`; the connection is not up yet.
    pub fn open(&self, options: OpenOptions) -> (Session, MemoryServer) {
        let session = self
            .client
            .connect(REMOTE_PATH, Some(options))
            .expect("connect should succeed");
        let server = self
            .connector
            .server(REMOTE_PATH)
            .expect("connector should keep the server end");
        (session, server)
    }

    /// Open a session and drive it through a successful handshake.
    pub fn ready(&self, options: OpenOptions) -> (Session, MemoryServer) {
        let (session, server) = self.open(options);
        server.connect();
        complete_handshake(&server);
        assert_eq!(session.state(), SessionState::Ready);
        (session, server)
    }
}

pub fn handshake_request() -> Payload {
    Payload::Json(json!({"code": "handshake", "data": true}))
}

pub fn init_result(ok: bool) -> Payload {
    Payload::Json(json!({"code": "serialport_init_result", "data": ok}))
}

/// Server side of the handshake: request, then report success.
pub fn complete_handshake(server: &MemoryServer) {
    server.emit(HANDSHAKE_CHANNEL, handshake_request());
    server.emit(INIT_RESULT_CHANNEL, init_result(true));
}

/// Byte payloads the client sent on `serialport_send_packet`.
pub fn sent_packets(server: &MemoryServer) -> Vec<Vec<u8>> {
    server
        .received_on(SEND_PACKET_CHANNEL)
        .into_iter()
        .map(|payload| {
            payload
                .as_bytes()
                .expect("outbound packets are binary")
                .to_vec()
        })
        .collect()
}

/// Everything currently buffered on `stream`, without waiting.
pub fn drain(stream: &VirtualPortStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    while let Ok(n) = stream.read(&mut buf) {
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Wait up to one second for the next chunk on `stream`.
pub async fn recv_chunk(stream: &VirtualPortStream) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(1), stream.recv(&mut buf))
        .await
        .expect("timed out waiting for data")
        .expect("recv failed");
    buf[..n].to_vec()
}
