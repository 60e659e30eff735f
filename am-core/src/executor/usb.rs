//! USB driver rebind at the kernel interface
//!
//! Unbind/rebind works by writing the bus path into the generic USB driver's
//! `unbind` and `bind` attributes. Both directories are injectable so tests
//! run against a temp tree.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use crate::data::config::UsbSettings;
use crate::error::{AdbmendError, Result};

/// What a rebind attempt found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebindStatus {
    /// Device present and already bound; left untouched
    AlreadyBound,
    /// Device present but unbound; driver was rebound
    Rebound,
    /// Device no longer on the bus; nothing to do
    DeviceGone,
}

/// Kernel-interface seam for the executor; mocked in tests
#[cfg_attr(test, mockall::automock)]
pub trait UsbControl: Send + Sync {
    /// Rebind the device's driver, idempotently. An already-healthy device
    /// is left alone; a departed device is a no-op.
    fn rebind(&self, bus_path: &str) -> Result<RebindStatus>;
}

/// sysfs-backed driver control
#[derive(Debug, Clone)]
pub struct SysfsUsbControl {
    devices_dir: PathBuf,
    driver_dir: PathBuf,
}

impl SysfsUsbControl {
    pub fn new(settings: &UsbSettings) -> Self {
        Self {
            devices_dir: settings.devices_dir.clone(),
            driver_dir: settings.driver_dir.clone(),
        }
    }

    pub fn with_base(devices_dir: impl Into<PathBuf>, driver_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
            driver_dir: driver_dir.into(),
        }
    }

    fn write_attr(&self, attr: &str, bus_path: &str) -> Result<()> {
        let path = self.driver_dir.join(attr);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| AdbmendError::FileWrite {
                path: path.clone(),
                source,
            })?;
        file.write_all(bus_path.as_bytes())
            .map_err(|source| AdbmendError::FileWrite { path, source })?;
        Ok(())
    }
}

/// Validate a bus path before it touches a sysfs attribute
fn validate_bus_path(bus_path: &str) -> Result<()> {
    if !crate::inventory::usb::is_bus_path(bus_path) {
        return Err(AdbmendError::invalid_path(
            Path::new(bus_path),
            "not a USB bus path",
        ));
    }
    Ok(())
}

impl UsbControl for SysfsUsbControl {
    fn rebind(&self, bus_path: &str) -> Result<RebindStatus> {
        validate_bus_path(bus_path)?;

        if !self.devices_dir.join(bus_path).exists() {
            debug!(bus_path, "device no longer on the bus, skipping rebind");
            return Ok(RebindStatus::DeviceGone);
        }

        if self.driver_dir.join(bus_path).exists() {
            debug!(bus_path, "device already bound, leaving untouched");
            return Ok(RebindStatus::AlreadyBound);
        }

        // The kernel may have dropped the binding on its own; a failed unbind
        // just means it is already unbound.
        if let Err(e) = self.write_attr("unbind", bus_path) {
            trace!(bus_path, error = %e, "unbind write failed (already unbound)");
        }
        self.write_attr("bind", bus_path)?;

        info!(bus_path, "USB driver rebound");
        Ok(RebindStatus::Rebound)
    }
}
