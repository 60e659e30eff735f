//! Device inventory readers
//!
//! Three independent probes, one per authority (USB bus, ADB server,
//! directory store), each producing a normalized point-in-time snapshot.
//! A reachable authority with zero devices is a valid empty snapshot; only
//! an unreachable authority is an error.

pub mod adb;
pub mod directory;
pub mod usb;

pub use adb::AdbReader;
pub use directory::DirectoryReader;
pub use usb::UsbReader;

use crate::data::{Authority, InventorySnapshot};
use crate::error::Result;

/// One inventory probe
pub trait InventoryReader: Send + Sync {
    fn authority(&self) -> Authority;

    /// Capture a fresh snapshot, or `AuthorityUnavailable` when the backing
    /// authority cannot be queried at all.
    fn capture(&self) -> Result<InventorySnapshot>;
}
