//! Constants and configuration defaults for adbmend
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for all configuration values.
//! Never use magic numbers in other files - add them here first.

/// System paths
pub mod paths {
    /// Base path for USB device entries on the bus
    pub const USB_DEVICES: &str = "/sys/bus/usb/devices";

    /// Generic USB driver directory holding the unbind/bind attributes
    pub const USB_DRIVER: &str = "/sys/bus/usb/drivers/usb";

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/adbmend";

    /// Configuration file name
    pub const CONFIG_FILE: &str = "config.json";

    /// PID file for single-instance detection
    pub const PID_FILE: &str = "/run/adbmend.pid";
}

/// ADB server defaults
pub mod adb {
    /// Host the local ADB server listens on
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Default ADB server port
    pub const DEFAULT_PORT: u16 = 5037;

    /// TCP connect timeout to the ADB server
    pub const CONNECT_TIMEOUT_MS: u64 = 3_000;

    /// Read/write timeout on an established ADB server socket
    pub const IO_TIMEOUT_MS: u64 = 5_000;

    /// Device state string the ADB server reports for a healthy device
    pub const STATE_ONLINE: &str = "device";
}

/// Directory store defaults
pub mod directory {
    /// Default directory store port
    pub const DEFAULT_PORT: u16 = 7700;

    /// Logical name of the device collection
    pub const DEFAULT_TABLE: &str = "devices";

    /// Per-request timeout against the store
    pub const REQUEST_TIMEOUT_MS: u64 = 5_000;
}

/// Retry/backoff defaults for recovery actions
pub mod retry {
    /// Attempts per action before reporting Failed
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Base delay before the first retry
    pub const BASE_DELAY_MS: u64 = 1_000;

    /// Exponential backoff factor
    pub const FACTOR: u32 = 2;
}

/// Reconciliation pass defaults
pub mod reconcile {
    /// Interval between passes in `run` mode
    pub const DEFAULT_INTERVAL_SECS: u64 = 30;

    /// Per-authority inventory capture timeout
    pub const CAPTURE_TIMEOUT_MS: u64 = 10_000;

    /// Bounded parallelism for recovery actions within a pass
    pub const MAX_PARALLEL_ACTIONS: usize = 4;
}

/// Ephemeral/emulator identity defaults
pub mod emulator {
    /// Serial pattern for ephemeral emulator identities (host:fixed-port).
    /// Only network serials are ever tested against this; hardware bus
    /// paths can never match.
    pub const DEFAULT_PATTERN: &str = "^[0-9.]+:10001$";
}

/// Environment variable names
pub mod env {
    /// Log level filter (trace, debug, info, warn, error)
    pub const LOG: &str = "ADBMEND_LOG";

    /// Config file path override
    pub const CONFIG: &str = "ADBMEND_CONFIG";

    /// Public IP of this provider host (scopes directory queries)
    pub const PUBLIC_IP: &str = "ADBMEND_PUBLIC_IP";

    /// Note text stamped onto this host's directory records
    pub const PROVIDER_NOTE: &str = "ADBMEND_PROVIDER_NOTE";
}
