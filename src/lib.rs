//! Virtual local serial ports backed by a device on a remote server.
//!
//! A [`Session`] owns one duplex channel to the server, namespaced by the
//! remote device path. After the server's handshake request the session
//! replies with the serial options for the remote device and waits for the
//! init verdict. Any number of local virtual ports can then be registered:
//! bytes the application writes to one are forwarded to the server, and
//! every packet the server sends is delivered to all of them.
//!
//! # Modules
//!
//! - `client`: [`RemoteSerialClient`], the session factory
//! - `session`: handshake state machine and packet routing
//! - `registry`: per-session virtual port registry
//! - `port`: virtual port instances, streams and the emulation backend
//! - `protocol`: channel names and message shapes
//! - `transport`: duplex transport trait, in-memory and WebSocket implementations
//! - `config`: TOML configuration with environment overrides
//! - `logging`: `tracing` subscriber setup
//!
//! # Example
//!
//! ```rust,no_run
//! use remote_serialport_client::port::OpenOptions;
//! use remote_serialport_client::transport::WsConnector;
//! use remote_serialport_client::RemoteSerialClient;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RemoteSerialClient::new(WsConnector::new("ws://localhost:17991"));
//! let session = client.connect("/dev/ttyUSB0", Some(OpenOptions::new("/dev/ttyUSB0", 115200)))?;
//! session.wait_ready(Some(Duration::from_secs(5))).await?;
//!
//! let stream = session
//!     .create_port("/dev/ttyUSB1", None)?
//!     .get_port(Some(OpenOptions::default()))?;
//! stream.write(b"AT\r\n")?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod port;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use client::{default_path_pattern, RemoteSerialClient, DEFAULT_PATH_PATTERN};
pub use error::{ClientError, ClientResult};
pub use port::{
    CreatePortOptions, DataBits, MockBinding, OpenOptions, Parity, PortError, StopBits,
    VirtualBinding, VirtualPortInstance, VirtualPortStream,
};
pub use registry::PortRegistry;
pub use session::{Session, SessionOptions, SessionState};
pub use transport::{MemoryConnector, MemoryServer, MemoryTransport, Payload, Transport, TransportConnector, WsConnector};
