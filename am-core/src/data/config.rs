//! Configuration management
//!
//! Loads the adbmend configuration from JSON (default `/etc/adbmend/config.json`,
//! overridable via `ADBMEND_CONFIG`) with serde defaults for every field, then
//! applies environment-derived host identity on top.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::data::types::EmulatorPattern;
use crate::error::{AdbmendError, Result};

/// Root configuration for the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbmendConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub directory: DirectorySettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Serial pattern classifying ephemeral/emulator identities
    #[serde(default = "default_emulator_pattern")]
    pub emulator_pattern: String,
}

fn default_emulator_pattern() -> String {
    constants::emulator::DEFAULT_PATTERN.to_string()
}

impl Default for AdbmendConfig {
    fn default() -> Self {
        Self {
            adb: AdbSettings::default(),
            directory: DirectorySettings::default(),
            usb: UsbSettings::default(),
            provider: ProviderSettings::default(),
            reconcile: ReconcileSettings::default(),
            retry: RetrySettings::default(),
            emulator_pattern: default_emulator_pattern(),
        }
    }
}

/// Local ADB server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbSettings {
    #[serde(default = "default_adb_host")]
    pub host: String,
    #[serde(default = "default_adb_port")]
    pub port: u16,
    #[serde(default = "default_adb_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_adb_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_adb_host() -> String {
    constants::adb::DEFAULT_HOST.to_string()
}
fn default_adb_port() -> u16 {
    constants::adb::DEFAULT_PORT
}
fn default_adb_connect_timeout_ms() -> u64 {
    constants::adb::CONNECT_TIMEOUT_MS
}
fn default_adb_io_timeout_ms() -> u64 {
    constants::adb::IO_TIMEOUT_MS
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            host: default_adb_host(),
            port: default_adb_port(),
            connect_timeout_ms: default_adb_connect_timeout_ms(),
            io_timeout_ms: default_adb_io_timeout_ms(),
        }
    }
}

impl AdbSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Shared directory store connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    #[serde(default = "default_directory_host")]
    pub host: String,
    #[serde(default = "default_directory_port")]
    pub port: u16,
    /// Bearer key; absent means unauthenticated store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    /// Logical name of the device collection
    #[serde(default = "default_directory_table")]
    pub table: String,
    #[serde(default = "default_directory_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_directory_host() -> String {
    "127.0.0.1".to_string()
}
fn default_directory_port() -> u16 {
    constants::directory::DEFAULT_PORT
}
fn default_directory_table() -> String {
    constants::directory::DEFAULT_TABLE.to_string()
}
fn default_directory_timeout_ms() -> u64 {
    constants::directory::REQUEST_TIMEOUT_MS
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            host: default_directory_host(),
            port: default_directory_port(),
            auth_key: None,
            table: default_directory_table(),
            request_timeout_ms: default_directory_timeout_ms(),
        }
    }
}

impl DirectorySettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// USB sysfs locations; injectable so tests can point at a temp tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    #[serde(default = "default_usb_devices")]
    pub devices_dir: PathBuf,
    #[serde(default = "default_usb_driver")]
    pub driver_dir: PathBuf,
}

fn default_usb_devices() -> PathBuf {
    PathBuf::from(constants::paths::USB_DEVICES)
}
fn default_usb_driver() -> PathBuf {
    PathBuf::from(constants::paths::USB_DRIVER)
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            devices_dir: default_usb_devices(),
            driver_dir: default_usb_driver(),
        }
    }
}

/// Identity used to scope directory queries to this provider host
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    /// Provider name as recorded in the directory; defaults to the hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Public IP of this host; env `ADBMEND_PUBLIC_IP` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

/// Pass orchestration tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    #[serde(default = "default_max_parallel_actions")]
    pub max_parallel_actions: usize,
}

fn default_interval_secs() -> u64 {
    constants::reconcile::DEFAULT_INTERVAL_SECS
}
fn default_capture_timeout_ms() -> u64 {
    constants::reconcile::CAPTURE_TIMEOUT_MS
}
fn default_max_parallel_actions() -> usize {
    constants::reconcile::MAX_PARALLEL_ACTIONS
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            capture_timeout_ms: default_capture_timeout_ms(),
            max_parallel_actions: default_max_parallel_actions(),
        }
    }
}

impl ReconcileSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

/// Bounded exponential backoff tunables for recovery actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: u32,
}

fn default_retry_attempts() -> u32 {
    constants::retry::MAX_ATTEMPTS
}
fn default_retry_base_ms() -> u64 {
    constants::retry::BASE_DELAY_MS
}
fn default_retry_factor() -> u32 {
    constants::retry::FACTOR
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
            factor: default_retry_factor(),
        }
    }
}

impl AdbmendConfig {
    /// Default config file location, honoring `ADBMEND_CONFIG`
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(constants::env::CONFIG) {
            return PathBuf::from(path);
        }
        Path::new(constants::paths::CONFIG_DIR).join(constants::paths::CONFIG_FILE)
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist. A present-but-invalid file is an error; silently
    /// running with defaults against the wrong store would be worse.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| AdbmendError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&raw)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay environment-derived identity onto the loaded config
    fn apply_env(&mut self) {
        if let Ok(ip) = std::env::var(constants::env::PUBLIC_IP) {
            if !ip.trim().is_empty() {
                self.provider.public_ip = Some(ip.trim().to_string());
            }
        }
    }

    /// Provider name scoping directory queries: configured name, else hostname
    pub fn provider_name(&self) -> Result<String> {
        if let Some(ref name) = self.provider.name {
            return Ok(name.clone());
        }
        crate::system::hostname()
    }

    pub fn emulator_pattern(&self) -> Result<EmulatorPattern> {
        EmulatorPattern::new(&self.emulator_pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = AdbmendConfig::default();
        assert_eq!(config.adb.addr(), "127.0.0.1:5037");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.factor, 2);
        assert_eq!(config.emulator_pattern, "^[0-9.]+:10001$");
        assert!(config.emulator_pattern().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AdbmendConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.directory.table, "devices");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"adb": {{"port": 5038}}, "provider": {{"name": "provider-7"}}}}"#
        )
        .unwrap();

        let config = AdbmendConfig::load(&path).unwrap();
        assert_eq!(config.adb.port, 5038);
        assert_eq!(config.adb.host, "127.0.0.1");
        assert_eq!(config.provider_name().unwrap(), "provider-7");
        assert_eq!(config.reconcile.max_parallel_actions, 4);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(AdbmendConfig::load(&path).is_err());
    }
}
