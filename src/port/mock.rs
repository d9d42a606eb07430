//! In-memory emulation backend.
//!
//! `MockBinding` registers virtual devices by path and hands out loopback
//! handles on them. Nothing touches real hardware: a device is a byte queue
//! plus an optional write log, which is all a virtual port needs to look like
//! a serial device to the rest of the application.

use super::error::PortError;
use super::traits::{BindingPort, CreatePortOptions, OpenOptions, VirtualBinding};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Inner state of one emulated device.
#[derive(Debug, Default)]
struct DeviceState {
    /// Bytes waiting to be read by the application.
    read_queue: VecDeque<u8>,
    /// Normal-path writes, kept only when the device records.
    write_log: Vec<Vec<u8>>,
    /// Whether a handle currently holds the device open.
    open: bool,
}

#[derive(Debug)]
struct MockDevice {
    path: String,
    options: CreatePortOptions,
    state: Mutex<DeviceState>,
    readable: Arc<Notify>,
}

/// Loopback emulation backend.
///
/// Cloning is cheap and every clone sees the same set of devices.
///
/// # Example
/// ```
/// use remote_serialport_client::port::{CreatePortOptions, MockBinding, OpenOptions, VirtualBinding};
///
/// let binding = MockBinding::new();
/// binding
///     .create_port("/dev/ttyUSB1", CreatePortOptions { echo: true, ..Default::default() })
///     .unwrap();
///
/// let port = binding.open(&OpenOptions::new("/dev/ttyUSB1", 9600)).unwrap();
/// port.emit_data(b"hello").unwrap();
///
/// let mut buffer = [0u8; 5];
/// assert_eq!(port.read(&mut buffer).unwrap(), 5);
/// assert_eq!(&buffer, b"hello");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBinding {
    devices: Arc<Mutex<HashMap<String, Arc<MockDevice>>>>,
}

impl MockBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every registered device.
    pub fn reset(&self) {
        let drained: Vec<_> = self.devices.lock().drain().collect();
        for (_, device) in drained {
            device.state.lock().open = false;
            device.readable.notify_waiters();
        }
    }

    /// Paths of all registered devices, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.devices.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Options a device was registered with.
    pub fn port_options(&self, path: &str) -> Option<CreatePortOptions> {
        self.devices.lock().get(path).map(|d| d.options)
    }

    /// Copy of the normal-path write log for `path`.
    pub fn recorded(&self, path: &str) -> Result<Vec<Vec<u8>>, PortError> {
        let devices = self.devices.lock();
        let device = devices.get(path).ok_or_else(|| PortError::not_found(path))?;
        let log = device.state.lock().write_log.clone();
        Ok(log)
    }
}

impl VirtualBinding for MockBinding {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_port(&self, path: &str, options: CreatePortOptions) -> Result<(), PortError> {
        let mut devices = self.devices.lock();
        if devices.contains_key(path) {
            return Err(PortError::AlreadyRegistered(path.to_string()));
        }
        debug!(path, ?options, "registering virtual device");
        devices.insert(
            path.to_string(),
            Arc::new(MockDevice {
                path: path.to_string(),
                options,
                state: Mutex::new(DeviceState::default()),
                readable: Arc::new(Notify::new()),
            }),
        );
        Ok(())
    }

    fn remove_port(&self, path: &str) -> Result<(), PortError> {
        let device = self
            .devices
            .lock()
            .remove(path)
            .ok_or_else(|| PortError::not_found(path))?;
        {
            let mut state = device.state.lock();
            state.open = false;
            state.read_queue.clear();
        }
        device.readable.notify_waiters();
        debug!(path, "virtual device removed");
        Ok(())
    }

    fn is_registered(&self, path: &str) -> bool {
        self.devices.lock().contains_key(path)
    }

    fn open(&self, options: &OpenOptions) -> Result<Arc<dyn BindingPort>, PortError> {
        let device = self
            .devices
            .lock()
            .get(&options.path)
            .cloned()
            .ok_or_else(|| PortError::not_found(&options.path))?;

        {
            let mut state = device.state.lock();
            if state.open {
                return Err(PortError::AlreadyOpen);
            }
            state.open = true;
        }
        debug!(path = %options.path, baud_rate = options.baud_rate, "virtual device opened");
        Ok(Arc::new(MockPortHandle { device }))
    }
}

/// Open handle on a `MockBinding` device.
#[derive(Debug)]
pub struct MockPortHandle {
    device: Arc<MockDevice>,
}

impl MockPortHandle {
    fn ensure_open(&self) -> Result<(), PortError> {
        if self.device.state.lock().open {
            Ok(())
        } else {
            Err(PortError::NotOpen)
        }
    }
}

impl BindingPort for MockPortHandle {
    fn path(&self) -> &str {
        &self.device.path
    }

    fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        let options = self.device.options;
        if options.read_only {
            return Err(PortError::ReadOnly(self.device.path.clone()));
        }
        {
            let mut state = self.device.state.lock();
            if !state.open {
                return Err(PortError::NotOpen);
            }
            if options.record {
                state.write_log.push(data.to_vec());
            }
            if options.echo {
                state.read_queue.extend(data);
            }
        }
        if options.echo {
            self.device.readable.notify_waiters();
        }
        Ok(data.len())
    }

    fn emit_data(&self, data: &[u8]) -> Result<(), PortError> {
        {
            let mut state = self.device.state.lock();
            if !state.open {
                return Err(PortError::NotOpen);
            }
            state.read_queue.extend(data);
        }
        trace!(path = %self.device.path, len = data.len(), "bytes emitted into read buffer");
        self.device.readable.notify_waiters();
        Ok(())
    }

    fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.device.state.lock();
        if !state.open {
            return Err(PortError::NotOpen);
        }

        let mut bytes_read = 0;
        for byte in buffer.iter_mut() {
            match state.read_queue.pop_front() {
                Some(queued) => {
                    *byte = queued;
                    bytes_read += 1;
                }
                None => break,
            }
        }

        if bytes_read == 0 && !buffer.is_empty() {
            Err(PortError::would_block())
        } else {
            Ok(bytes_read)
        }
    }

    fn bytes_to_read(&self) -> usize {
        self.device.state.lock().read_queue.len()
    }

    fn close(&self) -> Result<(), PortError> {
        self.ensure_open()?;
        {
            let mut state = self.device.state.lock();
            state.open = false;
            state.read_queue.clear();
        }
        self.device.readable.notify_waiters();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.state.lock().open
    }

    fn readable(&self) -> Arc<Notify> {
        Arc::clone(&self.device.readable)
    }
}
