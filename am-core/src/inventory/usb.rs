//! USB bus enumeration
//!
//! Reads `/sys/bus/usb/devices`, keeping device entries of the `B-P[.P...]`
//! bus-path form. Root hubs (`usbN`) and interface entries (containing `:`)
//! are skipped; the directory name is the device's stable bus identity.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::data::config::UsbSettings;
use crate::data::{Authority, DeviceIdentity, DeviceStatus, InventorySnapshot};
use crate::error::{AdbmendError, Result};
use crate::inventory::InventoryReader;

/// `1-2`, `1-2.3`, `2-1.4.1`, ... the kernel's bus-port naming for devices
fn bus_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+-\d+(\.\d+)*$").unwrap_or_else(|_| unreachable!("pattern must compile"))
    })
}

/// Whether a sysfs entry name is a device bus path (not a hub or interface)
pub fn is_bus_path(name: &str) -> bool {
    bus_path_regex().is_match(name)
}

/// Inventory reader for the USB subsystem
#[derive(Debug, Clone)]
pub struct UsbReader {
    devices_dir: PathBuf,
}

impl UsbReader {
    pub fn new(settings: &UsbSettings) -> Self {
        Self {
            devices_dir: settings.devices_dir.clone(),
        }
    }

    pub fn with_base(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
        }
    }

    fn read_device(&self, bus_path: &str) -> DeviceStatus {
        let dir = self.devices_dir.join(bus_path);

        // A device the kernel failed to authorize (or that an error handler
        // deauthorized) is attached but not usable.
        let online = match read_attr(&dir, "authorized") {
            Some(v) => v != "0",
            None => true,
        };

        let mut meta = serde_json::Map::new();
        for attr in ["idVendor", "idProduct", "serial", "product"] {
            if let Some(value) = read_attr(&dir, attr) {
                meta.insert(attr.to_string(), json!(value));
            }
        }

        trace!(bus_path, online, "read USB device");
        let status = if online {
            DeviceStatus::online()
        } else {
            DeviceStatus::offline()
        };
        if meta.is_empty() {
            status
        } else {
            status.with_meta(serde_json::Value::Object(meta))
        }
    }
}

/// Read a sysfs attribute, trimmed; None when absent or unreadable
fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    let path = dir.join(attr);
    match fs::read_to_string(&path) {
        Ok(content) => Some(content.trim().to_string()),
        Err(e) => {
            if path.exists() {
                trace!(path = ?path, error = %e, "could not read sysfs attribute");
            }
            None
        }
    }
}

impl InventoryReader for UsbReader {
    fn authority(&self) -> Authority {
        Authority::Usb
    }

    fn capture(&self) -> Result<InventorySnapshot> {
        if !self.devices_dir.is_dir() {
            return Err(AdbmendError::unavailable(
                Authority::Usb.as_str(),
                format!("{} does not exist", self.devices_dir.display()),
            ));
        }

        let mut snapshot = InventorySnapshot::new(Authority::Usb);
        let entries = fs::read_dir(&self.devices_dir).map_err(|e| {
            AdbmendError::unavailable(Authority::Usb.as_str(), format!("read_dir: {}", e))
        })?;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable sysfs entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_bus_path(&name) {
                trace!(name, "skipped non-device entry");
                continue;
            }
            let status = self.read_device(&name);
            snapshot.insert(DeviceIdentity::UsbPath(name), status);
        }

        debug!(devices = snapshot.len(), "USB snapshot captured");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_path_filtering() {
        assert!(is_bus_path("1-2"));
        assert!(is_bus_path("1-2.3"));
        assert!(is_bus_path("2-1.4.1"));
        assert!(!is_bus_path("usb1")); // root hub
        assert!(!is_bus_path("1-2:1.0")); // interface
        assert!(!is_bus_path("1-0:1.0"));
        assert!(!is_bus_path(""));
    }

    fn fake_device(base: &Path, bus_path: &str, attrs: &[(&str, &str)]) {
        let dir = base.join(bus_path);
        fs::create_dir_all(&dir).unwrap();
        for (name, value) in attrs {
            fs::write(dir.join(name), format!("{}\n", value)).unwrap();
        }
    }

    #[test]
    fn captures_devices_and_skips_hubs() {
        let tmp = tempfile::tempdir().unwrap();
        fake_device(
            tmp.path(),
            "1-2.3",
            &[("authorized", "1"), ("idVendor", "18d1"), ("serial", "ABC123")],
        );
        fake_device(tmp.path(), "1-4", &[("authorized", "0")]);
        fake_device(tmp.path(), "usb1", &[]);
        fake_device(tmp.path(), "1-2:1.0", &[]);

        let reader = UsbReader::with_base(tmp.path());
        let snapshot = reader.capture().unwrap();

        assert_eq!(snapshot.len(), 2);
        let healthy = DeviceIdentity::UsbPath("1-2.3".to_string());
        assert!(snapshot.is_online(&healthy));
        let meta = snapshot.status(&healthy).unwrap().meta.clone().unwrap();
        assert_eq!(meta["idVendor"], "18d1");

        let deauthorized = DeviceIdentity::UsbPath("1-4".to_string());
        assert!(snapshot.contains(&deauthorized));
        assert!(!snapshot.is_online(&deauthorized));
    }

    #[test]
    fn empty_bus_is_a_valid_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let reader = UsbReader::with_base(tmp.path());
        let snapshot = reader.capture().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn missing_sysfs_is_unavailable() {
        let reader = UsbReader::with_base("/nonexistent/usb/devices");
        match reader.capture() {
            Err(AdbmendError::AuthorityUnavailable { authority, .. }) => {
                assert_eq!(authority, "usb");
            }
            other => panic!("expected AuthorityUnavailable, got {:?}", other),
        }
    }
}
