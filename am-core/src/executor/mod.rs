//! Recovery action executor
//!
//! Applies the minimal corrective action for each discrepancy with per-action
//! idempotency and bounded retry on transient failures. One device's failure
//! never blocks recovery of others: every path out of `execute` is an
//! `Outcome`, and `Failed` is counted, not raised.

pub mod retry;
pub mod usb;

pub use retry::{run_with_retry, RetryPolicy, SleepFn};
pub use usb::{RebindStatus, SysfsUsbControl, UsbControl};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adb::AdbControl;
use crate::data::{DeviceIdentity, Outcome, RecoveryAction};
use crate::error::{AdbmendError, Result};
use crate::store::{DeviceFilter, DirectoryStore};

/// Executes recovery actions against the three external interfaces
pub struct Executor {
    usb: Box<dyn UsbControl>,
    adb: Box<dyn AdbControl>,
    store: Arc<dyn DirectoryStore>,
    provider: String,
    policy: RetryPolicy,
    sleep: SleepFn,
}

impl Executor {
    pub fn new(
        usb: Box<dyn UsbControl>,
        adb: Box<dyn AdbControl>,
        store: Arc<dyn DirectoryStore>,
        provider: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            usb,
            adb,
            store,
            provider: provider.into(),
            policy,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replace the backoff sleep; tests pass a no-op
    pub fn with_sleep(mut self, sleep: SleepFn) -> Self {
        self.sleep = sleep;
        self
    }

    /// Apply one action, retrying transient failures per the policy.
    /// Never panics, never propagates: the result is always an `Outcome`.
    pub fn execute(&self, action: &RecoveryAction) -> Outcome {
        debug!(action = %action, "executing recovery action");
        let result = run_with_retry(&self.policy, &self.sleep, || self.attempt(action));
        match result {
            Ok(outcome) => {
                info!(action = %action, outcome = ?outcome, "recovery action finished");
                outcome
            }
            Err(e) => {
                let failure =
                    AdbmendError::action_failed(action.identity().serial(), e.to_string());
                warn!(action = %action, error = %failure, "recovery action exhausted retries");
                Outcome::Failed(e.to_string())
            }
        }
    }

    fn attempt(&self, action: &RecoveryAction) -> Result<Outcome> {
        match action {
            RecoveryAction::RebindUsbDriver(identity) => self.rebind_usb(identity),
            RecoveryAction::RestartAdbConnection(identity) => self.restart_adb(identity),
            RecoveryAction::DeleteDirectoryRecord(identity) => self.delete_record(identity),
            RecoveryAction::AnnotateDirectoryRecord(identity, note) => {
                self.annotate_record(identity, note)
            }
        }
    }

    fn rebind_usb(&self, identity: &DeviceIdentity) -> Result<Outcome> {
        let DeviceIdentity::UsbPath(bus_path) = identity else {
            // Network devices have no driver to rebind
            debug!(%identity, "rebind requested for network identity, nothing to do");
            return Ok(Outcome::Unchanged);
        };
        Ok(match self.usb.rebind(bus_path)? {
            RebindStatus::Rebound => Outcome::Recovered,
            RebindStatus::AlreadyBound | RebindStatus::DeviceGone => Outcome::Unchanged,
        })
    }

    fn restart_adb(&self, identity: &DeviceIdentity) -> Result<Outcome> {
        match identity {
            DeviceIdentity::Network(serial) => {
                let message = match self.adb.reconnect_network(serial) {
                    Ok(message) => message,
                    // Departed between diff and execution: expected, benign
                    Err(AdbmendError::DeviceNotFound(_)) => return Ok(Outcome::Unchanged),
                    Err(e) => return Err(e),
                };
                let lowered = message.to_lowercase();
                if lowered.contains("already connected") {
                    Ok(Outcome::Unchanged)
                } else if lowered.contains("failed") || lowered.contains("unable") {
                    Err(AdbmendError::AdbProtocol(message))
                } else {
                    Ok(Outcome::Recovered)
                }
            }
            DeviceIdentity::UsbPath(serial) => match self.adb.reconnect_usb(serial) {
                Ok(()) => Ok(Outcome::Recovered),
                Err(AdbmendError::DeviceNotFound(_)) => Ok(Outcome::Unchanged),
                Err(e) => Err(e),
            },
        }
    }

    fn delete_record(&self, identity: &DeviceIdentity) -> Result<Outcome> {
        let filter =
            DeviceFilter::serial(identity.serial()).and_provider(self.provider.clone());
        let deleted = self.store.delete(&filter)?;
        info!(%identity, deleted, "directory cleanup");
        Ok(if deleted == 0 {
            Outcome::Unchanged
        } else {
            Outcome::Recovered
        })
    }

    fn annotate_record(&self, identity: &DeviceIdentity, note: &str) -> Result<Outcome> {
        if note.trim().is_empty() {
            // Nothing configured is an expected operating mode, not a fault
            debug!(%identity, "no note configured, skipping annotation");
            return Ok(Outcome::Unchanged);
        }
        let filter =
            DeviceFilter::serial(identity.serial()).and_provider(self.provider.clone());
        let modified = self.store.set_notes(&filter, note)?;
        Ok(if modified == 0 {
            Outcome::Unchanged
        } else {
            Outcome::Recovered
        })
    }
}
