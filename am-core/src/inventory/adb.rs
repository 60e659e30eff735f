//! ADB server device-table snapshot

use serde_json::json;
use tracing::{debug, warn};

use crate::adb::AdbClient;
use crate::data::config::AdbSettings;
use crate::data::{Authority, DeviceIdentity, DeviceStatus, InventorySnapshot};
use crate::error::{AdbmendError, Result};
use crate::inventory::InventoryReader;

/// Inventory reader for the local ADB server.
///
/// Serials of the `host:port` form are emulator/network devices with no USB
/// backing; everything else is assumed USB-attached. Any state other than
/// `device` (offline, unauthorized, ...) counts as present but not online.
#[derive(Debug, Clone)]
pub struct AdbReader {
    client: AdbClient,
}

impl AdbReader {
    pub fn new(settings: &AdbSettings) -> Self {
        Self {
            client: AdbClient::new(settings),
        }
    }
}

impl InventoryReader for AdbReader {
    fn authority(&self) -> Authority {
        Authority::Adb
    }

    fn capture(&self) -> Result<InventorySnapshot> {
        let entries = self.client.devices().map_err(|e| match e {
            AdbmendError::AdbConnection(reason) => {
                AdbmendError::unavailable(Authority::Adb.as_str(), reason)
            }
            other => other,
        })?;

        let mut snapshot = InventorySnapshot::new(Authority::Adb);
        for entry in entries {
            let identity = match DeviceIdentity::from_serial(&entry.serial) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(serial = %entry.serial, error = %e, "skipping unparseable serial");
                    continue;
                }
            };
            let status = if entry.is_online() {
                DeviceStatus::online()
            } else {
                DeviceStatus::offline()
            }
            .with_meta(json!({ "state": entry.state }));
            snapshot.insert(identity, status);
        }

        debug!(devices = snapshot.len(), "ADB snapshot captured");
        Ok(snapshot)
    }
}
