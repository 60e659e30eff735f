//! adbmend Core Library
//!
//! Self-healing management for a fleet of Android devices exposed through an
//! ADB server and tracked in a shared device-directory store.
//!
//! # Features
//!
//! - **Inventory Readers**: normalized snapshots from the USB bus, the local
//!   ADB server, and the provider-scoped directory records
//! - **State Differencer**: pure comparison of the three views, classifying
//!   each mismatch into a recovery category
//! - **Recovery Executor**: minimal corrective actions (driver rebind, ADB
//!   reconnect, record cleanup) with idempotency and bounded backoff
//! - **Configuration**: JSON config with environment-derived host identity
//!
//! # Module Structure
//!
//! - `inventory/` - the three authority probes
//! - `diff` - discrepancy classification and action planning
//! - `executor/` - action execution, retry policy, USB driver control
//! - `adb` - ADB server smart-socket client
//! - `store/` - directory store interface and HTTP client
//! - `data/` - data types and configuration
//!
//! # Example
//!
//! ```no_run
//! use am_core::inventory::{InventoryReader, UsbReader};
//! use am_core::data::{EmulatorPattern, InventorySet, UsbSettings};
//!
//! let reader = UsbReader::new(&UsbSettings::default());
//! let mut set = InventorySet::new();
//! match reader.capture() {
//!     Ok(snapshot) => set.record(snapshot),
//!     Err(e) => set.mark_unavailable(am_core::data::Authority::Usb, e.to_string()),
//! }
//! let discrepancies = am_core::diff::diff(&set, &EmulatorPattern::default());
//! ```

// Grouped modules
pub mod data;
pub mod executor;
pub mod inventory;
pub mod store;

// Standalone modules
pub mod adb;
pub mod constants;
pub mod diff;
pub mod error;
pub mod system;

// Re-export primary types from data/
pub use data::{
    Authority, AdbmendConfig, DeviceIdentity, DeviceRecord, DeviceStatus, Discrepancy,
    DiscrepancyKind, EmulatorPattern, InventorySet, InventorySnapshot, Outcome, PassSummary,
    RecoveryAction,
};

// Re-export the seams the daemon wires together
pub use adb::{AdbClient, AdbControl};
pub use diff::{diff, plan_actions};
pub use executor::{Executor, RetryPolicy, SysfsUsbControl, UsbControl};
pub use inventory::{AdbReader, DirectoryReader, InventoryReader, UsbReader};
pub use store::{DeviceFilter, DirectoryStore, HttpDirectoryStore};

// Re-export error types
pub use error::{AdbmendError, Result};
