//! Reconciliation pass orchestration
//!
//! One pass is `CollectInventory -> Diff -> ExecuteActions -> ReportSummary`,
//! stateless and self-contained; the next pass recomputes everything from the
//! three authorities. The loop does not own scheduling: `run_once` is the
//! single entry point an external periodic trigger drives, and it enforces
//! single-flight itself in case the trigger double-fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task;
use tracing::{debug, error, info, warn};

use am_core::data::{Authority, InventorySet, PassSummary, RecoveryAction};
use am_core::diff::{diff, plan_actions};
use am_core::error::{AdbmendError, Result};
use am_core::executor::{Executor, RetryPolicy, SysfsUsbControl};
use am_core::inventory::{AdbReader, DirectoryReader, InventoryReader, UsbReader};
use am_core::store::DirectoryStore;
use am_core::{AdbClient, AdbmendConfig, EmulatorPattern};

/// Drives reconciliation passes over the three authorities
pub struct Reconciler {
    config: AdbmendConfig,
    provider: String,
    emulator: EmulatorPattern,
    store: Arc<dyn DirectoryStore>,
    executor: Arc<Executor>,
    /// Single-flight guard; a second trigger while a pass runs is skipped
    in_flight: AtomicBool,
    /// Set by the signal handler; stops new actions, lets in-flight ones finish
    shutdown: Arc<AtomicBool>,
}

/// Resets the in-flight flag even on early return
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(
        config: AdbmendConfig,
        store: Arc<dyn DirectoryStore>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let provider = config.provider_name()?;
        let emulator = config.emulator_pattern()?;
        let executor = Arc::new(Executor::new(
            Box::new(SysfsUsbControl::new(&config.usb)),
            Box::new(AdbClient::new(&config.adb)),
            store.clone(),
            provider.clone(),
            RetryPolicy::from_settings(&config.retry),
        ));
        Ok(Self {
            config,
            provider,
            emulator,
            store,
            executor,
            in_flight: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Execute one full reconciliation pass and report its summary.
    /// Never returns an error: every failure mode is contained in the summary.
    pub async fn run_once(&self) -> PassSummary {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("pass already in flight, skipping trigger");
            return PassSummary::skipped("pass already in flight");
        }
        let _guard = InFlightGuard(&self.in_flight);

        let started = Instant::now();
        let mut summary = PassSummary {
            started_at: am_core::data::now_epoch_secs(),
            ..Default::default()
        };

        // CollectInventory: the three probes are independent, gather them
        // concurrently, each bounded by the capture timeout.
        let timeout = self.config.reconcile.capture_timeout();
        let (usb, adb, directory) = tokio::join!(
            capture(UsbReader::new(&self.config.usb), timeout),
            capture(AdbReader::new(&self.config.adb), timeout),
            capture(
                DirectoryReader::new(self.store.clone(), self.provider.clone()),
                timeout
            ),
        );

        let mut set = InventorySet::new();
        for (authority, result) in [
            (Authority::Usb, usb),
            (Authority::Adb, adb),
            (Authority::Directory, directory),
        ] {
            match result {
                Ok(snapshot) => set.record(snapshot),
                Err(e) => {
                    warn!(%authority, error = %e, "inventory authority unavailable");
                    set.mark_unavailable(authority, e.to_string());
                }
            }
        }
        summary.authorities_unavailable =
            set.unavailable().map(|(a, r)| format!("{}: {}", a, r)).collect();

        if set.readable_count() == 0 {
            let e = AdbmendError::PartialInventoryFailure;
            error!(error = %e, "skipping pass");
            summary.skipped = true;
            summary.skip_reason = Some(e.to_string());
            summary.duration_ms = started.elapsed().as_millis() as u64;
            return summary;
        }

        // Diff: pure classification over whatever was readable
        let discrepancies = diff(&set, &self.emulator);
        summary.discrepancies = discrepancies.len();
        for d in &discrepancies {
            *summary.by_kind.entry(d.kind.as_str().to_string()).or_insert(0) += 1;
        }
        let actions = plan_actions(&discrepancies);
        debug!(
            discrepancies = discrepancies.len(),
            authorities = set.readable_count(),
            "diff complete"
        );

        // ExecuteActions: bounded parallelism; one action per identity per
        // pass, so actions never race on the same device.
        let outcomes = self.execute_all(actions).await;
        for (action, outcome) in &outcomes {
            summary.record_outcome(action, outcome);
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        match serde_json::to_string(&summary) {
            Ok(json) => info!(summary = %json, "pass complete"),
            Err(e) => warn!(error = %e, "could not serialize pass summary"),
        }
        summary
    }

    async fn execute_all(
        &self,
        actions: Vec<RecoveryAction>,
    ) -> Vec<(RecoveryAction, am_core::Outcome)> {
        let semaphore = Arc::new(Semaphore::new(
            self.config.reconcile.max_parallel_actions.max(1),
        ));
        let mut handles = Vec::with_capacity(actions.len());

        for action in actions {
            // Cancellation stops issuing new actions; in-flight external
            // calls complete or time out on their own.
            if self.shutdown.load(Ordering::SeqCst) {
                warn!(action = %action, "shutdown requested, not issuing action");
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed, shutting down
            };
            let executor = self.executor.clone();
            handles.push(task::spawn_blocking(move || {
                let outcome = executor.execute(&action);
                drop(permit);
                (action, outcome)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(pair) => outcomes.push(pair),
                Err(e) => error!(error = %e, "action task panicked"),
            }
        }
        outcomes
    }
}

/// Run one probe on the blocking pool under a timeout
async fn capture<R>(reader: R, timeout: Duration) -> Result<am_core::InventorySnapshot>
where
    R: InventoryReader + 'static,
{
    let authority = reader.authority();
    match tokio::time::timeout(timeout, task::spawn_blocking(move || reader.capture())).await {
        Err(_) => Err(AdbmendError::Timeout(format!(
            "{} capture exceeded {:?}",
            authority, timeout
        ))),
        Ok(Err(join)) => Err(AdbmendError::generic(format!(
            "{} capture task failed: {}",
            authority, join
        ))),
        Ok(Ok(result)) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_core::data::{DeviceRecord, UsbSettings};
    use am_core::store::DeviceFilter;

    /// Store that refuses every call, as if the directory host were down
    struct DownStore;

    impl DirectoryStore for DownStore {
        fn query(&self, _: &DeviceFilter) -> Result<Vec<DeviceRecord>> {
            Err(AdbmendError::StoreConnection("connection refused".into()))
        }
        fn delete(&self, _: &DeviceFilter) -> Result<u64> {
            Err(AdbmendError::StoreConnection("connection refused".into()))
        }
        fn set_notes(&self, _: &DeviceFilter, _: &str) -> Result<u64> {
            Err(AdbmendError::StoreConnection("connection refused".into()))
        }
    }

    fn unreachable_config(usb_dir: &std::path::Path) -> AdbmendConfig {
        let mut config = AdbmendConfig::default();
        // Port 1 is never an ADB server; the sysfs tree does not exist
        config.adb.port = 1;
        config.adb.connect_timeout_ms = 200;
        config.usb = UsbSettings {
            devices_dir: usb_dir.join("missing"),
            driver_dir: usb_dir.join("missing-driver"),
        };
        config.provider.name = Some("provider-7".to_string());
        config.reconcile.capture_timeout_ms = 2_000;
        config
    }

    #[tokio::test]
    async fn zero_readable_authorities_skips_the_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let config = unreachable_config(tmp.path());
        let reconciler = Reconciler::new(
            config,
            Arc::new(DownStore),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        let summary = reconciler.run_once().await;
        assert!(summary.skipped);
        assert_eq!(summary.authorities_unavailable.len(), 3);
        assert_eq!(summary.discrepancies, 0);
        assert_eq!(summary.recovered + summary.unchanged + summary.failed, 0);

        // The guard released the single-flight flag; a fresh pass runs again
        let summary = reconciler.run_once().await;
        assert!(summary.skipped);
    }

    #[tokio::test]
    async fn degraded_pass_with_one_authority_is_not_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("usb")).unwrap();
        let mut config = unreachable_config(tmp.path());
        config.usb.devices_dir = tmp.path().join("usb");

        let reconciler = Reconciler::new(
            config,
            Arc::new(DownStore),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        let summary = reconciler.run_once().await;
        assert!(!summary.skipped);
        assert_eq!(summary.authorities_unavailable.len(), 2);
        assert_eq!(summary.discrepancies, 0);
    }
}
