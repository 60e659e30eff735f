//! Provider-scoped directory store snapshot

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::data::{Authority, DeviceIdentity, DeviceStatus, InventorySnapshot};
use crate::error::{AdbmendError, Result};
use crate::inventory::InventoryReader;
use crate::store::{DeviceFilter, DirectoryStore};

/// Inventory reader for the shared directory store, scoped to the records
/// belonging to this provider host.
pub struct DirectoryReader {
    store: Arc<dyn DirectoryStore>,
    provider: String,
}

impl DirectoryReader {
    pub fn new(store: Arc<dyn DirectoryStore>, provider: impl Into<String>) -> Self {
        Self {
            store,
            provider: provider.into(),
        }
    }
}

impl InventoryReader for DirectoryReader {
    fn authority(&self) -> Authority {
        Authority::Directory
    }

    fn capture(&self) -> Result<InventorySnapshot> {
        let records = self
            .store
            .query(&DeviceFilter::provider(self.provider.clone()))
            .map_err(|e| match e {
                AdbmendError::StoreConnection(reason) | AdbmendError::Store(reason) => {
                    AdbmendError::unavailable(Authority::Directory.as_str(), reason)
                }
                other => other,
            })?;

        let mut snapshot = InventorySnapshot::new(Authority::Directory);
        for record in records {
            let identity = match DeviceIdentity::from_serial(&record.serial) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(serial = %record.serial, error = %e, "skipping unparseable record");
                    continue;
                }
            };
            // The record's presence flag is the directory's notion of online
            let status = DeviceStatus {
                online: record.present,
                last_seen: record.last_seen,
                meta: record.owner.as_ref().map(|o| json!({ "owner": o })),
            };
            snapshot.insert(identity, status);
        }

        debug!(
            devices = snapshot.len(),
            provider = %self.provider,
            "directory snapshot captured"
        );
        Ok(snapshot)
    }
}
