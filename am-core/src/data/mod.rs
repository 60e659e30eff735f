//! Data types and configuration

pub mod config;
pub mod types;

pub use config::{
    AdbSettings, AdbmendConfig, DirectorySettings, ProviderSettings, ReconcileSettings,
    RetrySettings, UsbSettings,
};
pub use types::{
    now_epoch_secs, ActionFailure, Authority, DeviceIdentity, DeviceRecord, DeviceStatus,
    Discrepancy, DiscrepancyKind, EmulatorPattern, InventorySet, InventorySnapshot, Outcome,
    PassSummary, ProviderRef, RecoveryAction,
};
