//! Core traits for the virtual-device emulation backend.
//!
//! A `VirtualBinding` plays the part of an operating-system serial driver:
//! it owns a set of registered device paths and hands out `BindingPort`
//! handles when one of them is opened. The session never talks to a real
//! device; every local port is one of these emulated handles.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

/// Default baud rate used when the caller does not specify one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

fn default_baud() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Device-open parameters.
///
/// Serialized with camelCase keys because the same structure travels to the
/// remote peer inside the handshake reply. Fields the remote side understands
/// but this crate does not model are kept verbatim in `extra`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOptions {
    /// Device path. Always overwritten with the registered path before use.
    #[serde(default)]
    pub path: String,

    /// Baud rate (bits per second).
    #[serde(default = "default_baud")]
    pub baud_rate: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<DataBits>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<Parity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<StopBits>,

    /// Hardware (RTS/CTS) flow control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtscts: Option<bool>,

    /// Backend-specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Emulation backend the stream is opened against. Assigned by the
    /// port instance, never sent over the wire.
    #[serde(skip)]
    pub binding: Option<Arc<dyn VirtualBinding>>,
}

impl OpenOptions {
    /// Options for `path` at `baud_rate`, everything else left to the backend.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Builder-style setter for the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: None,
            parity: None,
            stop_bits: None,
            rtscts: None,
            extra: serde_json::Map::new(),
            binding: None,
        }
    }
}

impl PartialEq for OpenOptions {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.baud_rate == other.baud_rate
            && self.data_bits == other.data_bits
            && self.parity == other.parity
            && self.stop_bits == other.stop_bits
            && self.rtscts == other.rtscts
            && self.extra == other.extra
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("data_bits", &self.data_bits)
            .field("parity", &self.parity)
            .field("stop_bits", &self.stop_bits)
            .field("rtscts", &self.rtscts)
            .field("extra", &self.extra)
            .field("binding", &self.binding.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

/// Number of data bits per character. Serialized as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(format!("invalid data bits: {other}")),
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Number of stop bits. Serialized as the bare number (1, 1.5 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl From<StopBits> for f32 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

impl TryFrom<f32> for StopBits {
    type Error = String;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(StopBits::One)
        } else if value == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if value == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(format!("invalid stop bits: {value}"))
        }
    }
}

/// Options used when registering a virtual device with the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreatePortOptions {
    /// Loop bytes written through the normal write path back into the
    /// read buffer.
    pub echo: bool,
    /// Keep a log of every normal-path write.
    pub record: bool,
    /// Refuse normal-path writes.
    pub read_only: bool,
}

/// Emulation backend: registers device paths and opens handles on them.
pub trait VirtualBinding: Send + Sync + fmt::Debug {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Register a virtual device under `path`.
    fn create_port(&self, path: &str, options: CreatePortOptions) -> Result<(), PortError>;

    /// Forget the device registered under `path`, closing any open handle.
    fn remove_port(&self, path: &str) -> Result<(), PortError>;

    /// Whether `path` is currently registered.
    fn is_registered(&self, path: &str) -> bool;

    /// Open the device named by `options.path`.
    fn open(&self, options: &OpenOptions) -> Result<Arc<dyn BindingPort>, PortError>;
}

/// An open handle on one emulated device.
///
/// There are two ways to put bytes into a device. `write` is the path an
/// application uses on a real port; `emit_data` is the wire side, the bytes a
/// physical device would have produced. Only `emit_data` is guaranteed to
/// reach the read buffer.
pub trait BindingPort: Send + Sync + fmt::Debug {
    /// Path this handle was opened on.
    fn path(&self) -> &str;

    /// Normal application-side write.
    fn write(&self, data: &[u8]) -> Result<usize, PortError>;

    /// Physical-side write: makes `data` readable on this handle.
    fn emit_data(&self, data: &[u8]) -> Result<(), PortError>;

    /// Read buffered bytes without blocking.
    ///
    /// Returns `WouldBlock` when nothing is buffered.
    fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Number of bytes waiting in the read buffer.
    fn bytes_to_read(&self) -> usize;

    /// Close the handle and drop any buffered bytes.
    fn close(&self) -> Result<(), PortError>;

    fn is_open(&self) -> bool;

    /// Notified every time bytes land in the read buffer or the handle closes.
    fn readable(&self) -> Arc<Notify>;
}
