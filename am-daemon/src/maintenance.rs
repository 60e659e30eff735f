//! One-shot maintenance commands
//!
//! `cleanup` and `annotate` are independent, idempotent house-keeping entry
//! points sharing the inventory interfaces with the reconcile loop. Missing
//! required environment input is an intentional skip with success exit, not
//! an error: "nothing configured" is an expected operating mode.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use am_core::data::{Authority, InventorySet};
use am_core::diff::diff;
use am_core::error::Result;
use am_core::inventory::{AdbReader, DirectoryReader, InventoryReader, UsbReader};
use am_core::store::{DeviceFilter, DirectoryStore};
use am_core::{AdbmendConfig, DeviceIdentity, DiscrepancyKind};

/// Outcome of one maintenance invocation, printed as JSON
#[derive(Debug, Serialize, Default)]
pub struct MaintenanceReport {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Candidate records considered
    pub matched: usize,
    /// Records actually deleted or modified
    pub affected: u64,
}

impl MaintenanceReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Delete this provider's directory records whose serials match the emulator
/// pattern and have no live USB/ADB presence.
///
/// Requires the host's public IP (config or `ADBMEND_PUBLIC_IP`) so deletions
/// stay scoped to serials advertising this host; without it the command is a
/// clean no-op.
pub fn run_cleanup(config: &AdbmendConfig, store: Arc<dyn DirectoryStore>) -> Result<MaintenanceReport> {
    let Some(public_ip) = config.provider.public_ip.clone() else {
        info!("no public IP configured, skipping emulator cleanup");
        return Ok(MaintenanceReport::skipped("public IP not configured"));
    };
    let provider = config.provider_name()?;
    let emulator = config.emulator_pattern()?;
    let prefix = format!("{}:", public_ip);

    let mut set = InventorySet::new();
    capture_into(&mut set, UsbReader::new(&config.usb));
    capture_into(&mut set, AdbReader::new(&config.adb));
    capture_into(&mut set, DirectoryReader::new(store.clone(), provider.clone()));
    if !set.is_available(Authority::Directory) {
        return Err(am_core::AdbmendError::unavailable(
            "directory",
            "directory store must be readable for cleanup",
        ));
    }

    let stale: Vec<DeviceIdentity> = diff(&set, &emulator)
        .into_iter()
        .filter(|d| d.kind == DiscrepancyKind::StaleDirectoryRecord)
        .map(|d| d.identity)
        .filter(|id| id.serial().starts_with(&prefix))
        .collect();

    let mut report = MaintenanceReport {
        matched: stale.len(),
        ..Default::default()
    };
    for identity in stale {
        let filter = DeviceFilter::serial(identity.serial()).and_provider(&provider);
        match store.delete(&filter) {
            Ok(deleted) => {
                info!(serial = %identity, deleted, "removed stale emulator record");
                report.affected += deleted;
            }
            Err(e) => {
                warn!(serial = %identity, error = %e, "could not delete stale record");
            }
        }
    }
    Ok(report)
}

/// Stamp the configured note onto every directory record owned by this host.
/// Overwrite semantics, so re-running is always safe.
pub fn run_annotate(config: &AdbmendConfig, store: Arc<dyn DirectoryStore>) -> Result<MaintenanceReport> {
    let note = match std::env::var(am_core::constants::env::PROVIDER_NOTE) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            info!("no provider note configured, skipping annotation");
            return Ok(MaintenanceReport::skipped("provider note not configured"));
        }
    };
    let provider = config.provider_name()?;
    let filter = DeviceFilter::provider(&provider);
    let matched = store.query(&filter)?.len();
    let modified = store.set_notes(&filter, &note)?;
    info!(provider = %provider, matched, modified, "annotated directory records");
    Ok(MaintenanceReport {
        skipped: false,
        reason: None,
        matched,
        affected: modified,
    })
}

fn capture_into<R: InventoryReader>(set: &mut InventorySet, reader: R) {
    let authority = reader.authority();
    match reader.capture() {
        Ok(snapshot) => set.record(snapshot),
        Err(e) => {
            warn!(%authority, error = %e, "inventory authority unavailable");
            set.mark_unavailable(authority, e.to_string());
        }
    }
}
