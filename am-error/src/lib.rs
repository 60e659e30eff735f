//! Unified error handling for adbmend
//!
//! This crate provides a single error type used across all adbmend components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using AdbmendError
pub type Result<T> = std::result::Result<T, AdbmendError>;

/// Unified error type for all adbmend operations
#[derive(thiserror::Error, Debug)]
pub enum AdbmendError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Inventory Errors
    // ============================================================================
    #[error("Authority {authority} unavailable: {reason}")]
    AuthorityUnavailable {
        authority: String,
        reason: String,
    },

    #[error("No inventory authority was readable for this pass")]
    PartialInventoryFailure,

    #[error("Invalid device serial: {0}")]
    InvalidSerial(String),

    // ============================================================================
    // ADB Server Errors
    // ============================================================================
    #[error("ADB server connection failed: {0}")]
    AdbConnection(String),

    #[error("ADB protocol error: {0}")]
    AdbProtocol(String),

    #[error("ADB device not found: {0}")]
    DeviceNotFound(String),

    // ============================================================================
    // Directory Store Errors
    // ============================================================================
    #[error("Directory store error: {0}")]
    Store(String),

    #[error("Directory store connection failed: {0}")]
    StoreConnection(String),

    // ============================================================================
    // Recovery Errors
    // ============================================================================
    #[error("Recovery action failed for {identity}: {reason}")]
    ActionFailed {
        identity: String,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required configuration: {0}")]
    ConfigurationMissing(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl AdbmendError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a directory store error from a string
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an authority-unavailable error
    pub fn unavailable(authority: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthorityUnavailable {
            authority: authority.into(),
            reason: reason.into(),
        }
    }

    /// Create an action-failed error
    pub fn action_failed(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActionFailed {
            identity: identity.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is worth retrying with backoff.
    ///
    /// Transient errors are the ones a restarting collaborator produces
    /// (connection refused to the ADB server or directory store, timeouts).
    /// Everything else is terminal for the current attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AdbConnection(_) | Self::StoreConnection(_) | Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

// Allow converting from String to AdbmendError
impl From<String> for AdbmendError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to AdbmendError
impl From<&str> for AdbmendError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
