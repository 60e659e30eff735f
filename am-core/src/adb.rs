//! ADB Server Client
//!
//! Speaks the ADB server's smart-socket protocol over TCP: every request is a
//! four-hex-digit length prefix followed by the service name, answered with
//! `OKAY` or `FAIL`, optionally followed by a length-prefixed payload.
//!
//! Only the host services the controller needs are implemented:
//! - `host:devices` — the server's device table
//! - `host:connect:<host:port>` / `host:disconnect:<host:port>` — network endpoints
//! - `host-serial:<serial>:reconnect` — kick a USB-attached device

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::data::config::AdbSettings;
use crate::error::{AdbmendError, Result};

/// Maximum payload the client will accept from the server
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// One row of the ADB server's device table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDeviceEntry {
    pub serial: String,
    pub state: String,
}

impl AdbDeviceEntry {
    /// Whether the server considers the device live/usable
    pub fn is_online(&self) -> bool {
        self.state == crate::constants::adb::STATE_ONLINE
    }
}

/// Control surface the recovery executor needs from the ADB server.
/// A trait seam so executor tests run against a mock server.
#[cfg_attr(test, mockall::automock)]
pub trait AdbControl: Send + Sync {
    /// Disconnect-then-connect a network endpoint (`host:port` serial)
    fn reconnect_network(&self, serial: &str) -> Result<String>;

    /// Server-level reconnect of a USB-attached device by serial
    fn reconnect_usb(&self, serial: &str) -> Result<()>;
}

/// Client for the local ADB server
#[derive(Debug, Clone)]
pub struct AdbClient {
    addr: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl AdbClient {
    pub fn new(settings: &AdbSettings) -> Self {
        Self {
            addr: settings.addr(),
            connect_timeout: settings.connect_timeout(),
            io_timeout: settings.io_timeout(),
        }
    }

    /// Query the server's device table
    pub fn devices(&self) -> Result<Vec<AdbDeviceEntry>> {
        let mut stream = self.connect()?;
        self.send_request(&mut stream, "host:devices")?;
        let payload = self.read_payload(&mut stream)?;
        Ok(parse_devices_payload(&payload))
    }

    /// `adb connect` a network endpoint; returns the server's message
    pub fn connect_device(&self, serial: &str) -> Result<String> {
        let mut stream = self.connect()?;
        self.send_request(&mut stream, &format!("host:connect:{}", serial))?;
        self.read_payload(&mut stream)
    }

    /// `adb disconnect` a network endpoint; returns the server's message
    pub fn disconnect_device(&self, serial: &str) -> Result<String> {
        let mut stream = self.connect()?;
        self.send_request(&mut stream, &format!("host:disconnect:{}", serial))?;
        self.read_payload(&mut stream)
    }

    /// Ask the server to drop and re-detect a device by serial
    pub fn reconnect_serial(&self, serial: &str) -> Result<()> {
        let mut stream = self.connect()?;
        self.send_request(&mut stream, &format!("host-serial:{}:reconnect", serial))?;
        Ok(())
    }

    fn connect(&self) -> Result<TcpStream> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| AdbmendError::AdbConnection(format!("{}: {}", self.addr, e)))?
            .next()
            .ok_or_else(|| {
                AdbmendError::AdbConnection(format!("{}: no resolvable address", self.addr))
            })?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| AdbmendError::AdbConnection(format!("{}: {}", self.addr, e)))?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        Ok(stream)
    }

    /// Send one length-prefixed service request and check the status frame
    fn send_request(&self, stream: &mut TcpStream, service: &str) -> Result<()> {
        trace!(service, "ADB request");
        stream.write_all(format!("{:04x}{}", service.len(), service).as_bytes())?;

        let mut status = [0u8; 4];
        stream.read_exact(&mut status)?;
        match &status {
            b"OKAY" => Ok(()),
            b"FAIL" => {
                let message = self.read_payload(stream).unwrap_or_default();
                debug!(service, message, "ADB server rejected request");
                if message.contains("not found") {
                    Err(AdbmendError::DeviceNotFound(message))
                } else {
                    Err(AdbmendError::AdbProtocol(message))
                }
            }
            other => Err(AdbmendError::AdbProtocol(format!(
                "unexpected status frame: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Read one four-hex-digit length-prefixed payload
    fn read_payload(&self, stream: &mut TcpStream) -> Result<String> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| AdbmendError::AdbProtocol("non-UTF8 length prefix".to_string()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| AdbmendError::AdbProtocol(format!("bad length prefix {:?}", len_str)))?;
        if len > MAX_PAYLOAD_SIZE {
            return Err(AdbmendError::AdbProtocol(format!(
                "payload too large: {} bytes",
                len
            )));
        }

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload)?;
        String::from_utf8(payload)
            .map_err(|_| AdbmendError::AdbProtocol("non-UTF8 payload".to_string()))
    }
}

impl AdbControl for AdbClient {
    fn reconnect_network(&self, serial: &str) -> Result<String> {
        // A failed disconnect is fine; the endpoint may already be gone
        match self.disconnect_device(serial) {
            Ok(msg) => trace!(serial, msg, "disconnected"),
            Err(e) => debug!(serial, error = %e, "disconnect before reconnect failed"),
        }
        self.connect_device(serial)
    }

    fn reconnect_usb(&self, serial: &str) -> Result<()> {
        self.reconnect_serial(serial)
    }
}

/// Parse the `host:devices` payload: one `serial\tstate` pair per line
pub fn parse_devices_payload(payload: &str) -> Vec<AdbDeviceEntry> {
    payload
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(AdbDeviceEntry {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}
