//! The stream handed to the application for one virtual device.
//!
//! Reads come from the emulated device's read buffer. Writes never reach the
//! device: they are handed to a `WriteSink`, which is how application bytes
//! get onto the transport without ever showing up in the local read buffer.

use super::error::PortError;
use super::traits::{BindingPort, OpenOptions};
use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Destination for bytes the application writes to a virtual port.
pub trait WriteSink: Send + Sync + fmt::Debug {
    /// Accept one write command issued on the port at `path`.
    fn write_command(&self, path: &str, data: Bytes) -> ClientResult<()>;
}

/// Readable/writable byte stream for one virtual serial device.
pub struct VirtualPortStream {
    options: OpenOptions,
    port: Arc<dyn BindingPort>,
    sink: Arc<dyn WriteSink>,
    bytes_written_total: AtomicU64,
    bytes_read_total: AtomicU64,
}

impl VirtualPortStream {
    /// Open `options.path` on `options.binding` and route writes to `sink`.
    pub fn open(options: OpenOptions, sink: Arc<dyn WriteSink>) -> ClientResult<Self> {
        let binding = options.binding.clone().ok_or_else(|| {
            ClientError::InvalidOpenOptions("no binding assigned to open options".to_string())
        })?;
        let port = binding.open(&options)?;
        Ok(Self {
            options,
            port,
            sink,
            bytes_written_total: AtomicU64::new(0),
            bytes_read_total: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &str {
        self.port.path()
    }

    /// Options the stream was opened with.
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Issue a write command. The bytes go to the sink only.
    pub fn write(&self, data: &[u8]) -> ClientResult<usize> {
        if !self.port.is_open() {
            return Err(PortError::NotOpen.into());
        }
        self.sink
            .write_command(self.path(), Bytes::copy_from_slice(data))?;
        self.bytes_written_total
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data.len())
    }

    /// Read buffered bytes without waiting.
    ///
    /// Fails with a `WouldBlock` I/O error when nothing is buffered.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let n = self.port.read(buffer)?;
        self.bytes_read_total.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Wait until bytes are buffered, then read them.
    pub async fn recv(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let readable = self.port.readable();
        loop {
            let notified = readable.notified();
            tokio::pin!(notified);
            // Register before checking so a wake between the check and the
            // await is not lost.
            notified.as_mut().enable();

            match self.read(buffer) {
                Ok(n) => return Ok(n),
                Err(e) if e.is_would_block() => {}
                Err(e) => return Err(e),
            }
            notified.await;
        }
    }

    pub fn bytes_to_read(&self) -> usize {
        self.port.bytes_to_read()
    }

    pub fn bytes_written_total(&self) -> u64 {
        self.bytes_written_total.load(Ordering::Relaxed)
    }

    pub fn bytes_read_total(&self) -> u64 {
        self.bytes_read_total.load(Ordering::Relaxed)
    }

    /// Close the underlying device handle.
    pub fn close(&self) -> Result<(), PortError> {
        self.port.close()
    }

    /// Physical-side injection, used for remote-origin bytes.
    pub(crate) fn emit_data(&self, data: &[u8]) -> Result<(), PortError> {
        self.port.emit_data(data)
    }
}

impl fmt::Debug for VirtualPortStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualPortStream")
            .field("path", &self.path())
            .field("baud_rate", &self.options.baud_rate)
            .field("open", &self.is_open())
            .field("bytes_to_read", &self.bytes_to_read())
            .finish()
    }
}

impl io::Read for &VirtualPortStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VirtualPortStream::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for &VirtualPortStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        VirtualPortStream::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
