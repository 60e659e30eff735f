//! Core data types for adbmend
//!
//! Defines the primary data structures flowing through a reconciliation pass:
//! identities, per-authority snapshots, discrepancies, recovery actions, and
//! the pass summary. Snapshots from different authorities are never merged in
//! place; they are compared, not unioned.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AdbmendError, Result};

/// Seconds since the Unix epoch, saturating at zero on clock skew
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One independent source of truth about device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Authority {
    Usb,
    Adb,
    Directory,
}

impl Authority {
    pub const ALL: [Authority; 3] = [Authority::Usb, Authority::Adb, Authority::Directory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::Usb => "usb",
            Authority::Adb => "adb",
            Authority::Directory => "directory",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized key uniquely identifying a device as seen by any authority.
///
/// USB-attached hardware uses its stable bus path (e.g. `1-2.3`); networked
/// and emulator devices use their `host:port` serial. Comparison across
/// authorities is by this key, never by display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceIdentity {
    /// Stable USB bus path, e.g. `1-2.3`
    UsbPath(String),
    /// `host:port` serial, e.g. `203.0.113.5:10001`
    Network(String),
}

impl DeviceIdentity {
    /// Normalize a raw serial into an identity.
    ///
    /// A serial of the form `host:port` (non-empty host, numeric port) is a
    /// network identity with no USB backing; everything else is treated as a
    /// USB bus identity.
    pub fn from_serial(serial: &str) -> Result<Self> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(AdbmendError::InvalidSerial("empty serial".to_string()));
        }
        if let Some((host, port)) = serial.rsplit_once(':') {
            if !host.is_empty() && port.parse::<u16>().is_ok() {
                return Ok(DeviceIdentity::Network(serial.to_string()));
            }
        }
        Ok(DeviceIdentity::UsbPath(serial.to_string()))
    }

    /// The raw serial string as the authorities report it
    pub fn serial(&self) -> &str {
        match self {
            DeviceIdentity::UsbPath(s) | DeviceIdentity::Network(s) => s,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, DeviceIdentity::Network(_))
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.serial())
    }
}

/// Compiled matcher for the ephemeral/emulator identity pattern.
///
/// The fixed-port convention is site-specific, so the pattern comes from
/// configuration. Only network identities are ever tested against it.
#[derive(Debug, Clone)]
pub struct EmulatorPattern {
    regex: regex::Regex,
}

impl EmulatorPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = regex::Regex::new(pattern)
            .map_err(|e| AdbmendError::config(format!("invalid emulator pattern: {}", e)))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        match identity {
            DeviceIdentity::Network(s) => self.regex.is_match(s),
            DeviceIdentity::UsbPath(_) => false,
        }
    }
}

impl Default for EmulatorPattern {
    fn default() -> Self {
        // The default constant is a valid regex
        Self::new(crate::constants::emulator::DEFAULT_PATTERN)
            .unwrap_or_else(|_| unreachable!("default emulator pattern must compile"))
    }
}

/// Per-device status record inside one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Whether the authority considers the device live/usable
    pub online: bool,
    /// When the authority last saw the device (epoch seconds)
    pub last_seen: u64,
    /// Opaque authority-specific metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl DeviceStatus {
    pub fn online() -> Self {
        Self {
            online: true,
            last_seen: now_epoch_secs(),
            meta: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            last_seen: now_epoch_secs(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Immutable point-in-time view of one authority's device table
#[derive(Debug, Clone, Serialize)]
pub struct InventorySnapshot {
    pub authority: Authority,
    pub captured_at: u64,
    devices: BTreeMap<DeviceIdentity, DeviceStatus>,
}

impl InventorySnapshot {
    pub fn new(authority: Authority) -> Self {
        Self {
            authority,
            captured_at: now_epoch_secs(),
            devices: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, identity: DeviceIdentity, status: DeviceStatus) {
        self.devices.insert(identity, status);
    }

    pub fn contains(&self, identity: &DeviceIdentity) -> bool {
        self.devices.contains_key(identity)
    }

    pub fn status(&self, identity: &DeviceIdentity) -> Option<&DeviceStatus> {
        self.devices.get(identity)
    }

    pub fn is_online(&self, identity: &DeviceIdentity) -> bool {
        self.devices.get(identity).map(|s| s.online).unwrap_or(false)
    }

    pub fn identities(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.devices.keys()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// The set of snapshots gathered for one pass, with per-authority availability.
///
/// An authority that could not be queried is recorded as unavailable and is
/// excluded from every identity's comparison for the pass; it never implies
/// absence.
#[derive(Debug, Default)]
pub struct InventorySet {
    snapshots: BTreeMap<Authority, InventorySnapshot>,
    unavailable: BTreeMap<Authority, String>,
}

impl InventorySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, snapshot: InventorySnapshot) {
        self.snapshots.insert(snapshot.authority, snapshot);
    }

    pub fn mark_unavailable(&mut self, authority: Authority, reason: impl Into<String>) {
        self.unavailable.insert(authority, reason.into());
    }

    /// Snapshot for an authority, if it was readable this pass
    pub fn snapshot(&self, authority: Authority) -> Option<&InventorySnapshot> {
        self.snapshots.get(&authority)
    }

    pub fn is_available(&self, authority: Authority) -> bool {
        self.snapshots.contains_key(&authority)
    }

    pub fn readable_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn unavailable(&self) -> impl Iterator<Item = (Authority, &str)> {
        self.unavailable.iter().map(|(a, r)| (*a, r.as_str()))
    }

    /// Union of identities across all available snapshots, in stable order
    pub fn identities(&self) -> BTreeSet<DeviceIdentity> {
        self.snapshots
            .values()
            .flat_map(|s| s.identities().cloned())
            .collect()
    }
}

/// One mismatch between two authorities for a given identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyKind {
    /// Directory and USB know the device, the ADB server does not
    MissingFromAdb,
    /// Directory and ADB know the device, the USB bus does not
    MissingFromUsb,
    /// Ephemeral directory record with no backing live authority
    StaleDirectoryRecord,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::MissingFromAdb => "missing_from_adb",
            DiscrepancyKind::MissingFromUsb => "missing_from_usb",
            DiscrepancyKind::StaleDirectoryRecord => "stale_directory_record",
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected mismatch; recomputed fresh every pass, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub identity: DeviceIdentity,
    /// The live authority whose view is trusted for this rule
    pub expected: Authority,
    /// The authority missing the device
    pub actual: Authority,
    pub kind: DiscrepancyKind,
}

/// Minimal corrective command derived from a discrepancy; a transient work
/// item scoped to one pass, not stored state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    RebindUsbDriver(DeviceIdentity),
    RestartAdbConnection(DeviceIdentity),
    DeleteDirectoryRecord(DeviceIdentity),
    AnnotateDirectoryRecord(DeviceIdentity, String),
}

impl RecoveryAction {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            RecoveryAction::RebindUsbDriver(id)
            | RecoveryAction::RestartAdbConnection(id)
            | RecoveryAction::DeleteDirectoryRecord(id)
            | RecoveryAction::AnnotateDirectoryRecord(id, _) => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryAction::RebindUsbDriver(_) => "rebind_usb_driver",
            RecoveryAction::RestartAdbConnection(_) => "restart_adb_connection",
            RecoveryAction::DeleteDirectoryRecord(_) => "delete_directory_record",
            RecoveryAction::AnnotateDirectoryRecord(_, _) => "annotate_directory_record",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.identity())
    }
}

/// Result of executing one recovery action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// The corrective action was applied
    Recovered,
    /// Nothing needed doing (already healthy, device departed, zero records)
    Unchanged,
    /// Retries exhausted; reason is logged and counted, never fatal
    Failed(String),
}

/// Device record as stored in the shared directory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial: String,
    pub provider: ProviderRef,
    /// Whether the provider currently considers the device attached
    #[serde(default)]
    pub present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub last_seen: u64,
}

/// Provider half of a directory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRef {
    pub name: String,
}

/// Serializable end-of-pass report
#[derive(Debug, Clone, Serialize, Default)]
pub struct PassSummary {
    pub started_at: u64,
    pub duration_ms: u64,
    /// True when the pass took no actions (inventory failure or single-flight)
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub authorities_unavailable: Vec<String>,
    pub discrepancies: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub recovered: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub failures: Vec<ActionFailure>,
}

/// One exhausted action, surfaced in the pass summary
#[derive(Debug, Clone, Serialize)]
pub struct ActionFailure {
    pub identity: String,
    pub action: String,
    pub reason: String,
}

impl PassSummary {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            started_at: now_epoch_secs(),
            skipped: true,
            skip_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn record_outcome(&mut self, action: &RecoveryAction, outcome: &Outcome) {
        match outcome {
            Outcome::Recovered => self.recovered += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(ActionFailure {
                    identity: action.identity().serial().to_string(),
                    action: action.name().to_string(),
                    reason: reason.clone(),
                });
            }
        }
    }
}
