/*
 * End-to-end reconciliation scenarios
 *
 * Drives inventory snapshots through diff -> plan -> execute against
 * in-memory collaborators, covering the recovery paths the controller
 * exists for: ADB reconnect, stale emulator cleanup, and annotation.
 */

use std::sync::{Arc, Mutex};

use am_core::data::{
    Authority, DeviceIdentity, DeviceRecord, DeviceStatus, DiscrepancyKind, EmulatorPattern,
    InventorySet, InventorySnapshot, Outcome, ProviderRef, RecoveryAction,
};
use am_core::error::Result;
use am_core::executor::{Executor, RebindStatus, RetryPolicy, UsbControl};
use am_core::store::{DeviceFilter, DirectoryStore};
use am_core::{diff, plan_actions, AdbControl};

const PROVIDER: &str = "provider-7";

// ----------------------------------------------------------------------------
// In-memory collaborators
// ----------------------------------------------------------------------------

#[derive(Default)]
struct InMemoryStore {
    records: Mutex<Vec<DeviceRecord>>,
}

impl InMemoryStore {
    fn with_records(records: Vec<DeviceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn matches(record: &DeviceRecord, filter: &DeviceFilter) -> bool {
        if let Some(ref serial) = filter.serial {
            if &record.serial != serial {
                return false;
            }
        }
        if let Some(ref provider) = filter.provider {
            if &record.provider.name != provider {
                return false;
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl DirectoryStore for InMemoryStore {
    fn query(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| Self::matches(r, filter))
            .cloned()
            .collect())
    }

    fn delete(&self, filter: &DeviceFilter) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !Self::matches(r, filter));
        Ok((before - records.len()) as u64)
    }

    fn set_notes(&self, filter: &DeviceFilter, note: &str) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let mut modified = 0;
        for record in records.iter_mut().filter(|r| Self::matches(r, filter)) {
            record.notes = Some(note.to_string());
            modified += 1;
        }
        Ok(modified)
    }
}

#[derive(Default)]
struct RecordingAdb {
    usb_reconnects: Mutex<Vec<String>>,
    network_reconnects: Mutex<Vec<String>>,
}

impl AdbControl for RecordingAdb {
    fn reconnect_network(&self, serial: &str) -> Result<String> {
        self.network_reconnects.lock().unwrap().push(serial.to_string());
        Ok(format!("connected to {}", serial))
    }

    fn reconnect_usb(&self, serial: &str) -> Result<()> {
        self.usb_reconnects.lock().unwrap().push(serial.to_string());
        Ok(())
    }
}

struct NoopUsb;

impl UsbControl for NoopUsb {
    fn rebind(&self, _bus_path: &str) -> Result<RebindStatus> {
        Ok(RebindStatus::AlreadyBound)
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn record(serial: &str) -> DeviceRecord {
    DeviceRecord {
        serial: serial.to_string(),
        provider: ProviderRef {
            name: PROVIDER.to_string(),
        },
        present: true,
        owner: None,
        notes: None,
        last_seen: 0,
    }
}

fn snapshot(authority: Authority, serials: &[&str]) -> InventorySnapshot {
    let mut snap = InventorySnapshot::new(authority);
    for serial in serials {
        snap.insert(
            DeviceIdentity::from_serial(serial).unwrap(),
            DeviceStatus::online(),
        );
    }
    snap
}

fn executor(adb: Arc<RecordingAdb>, store: Arc<InMemoryStore>) -> Executor {
    struct AdbProxy(Arc<RecordingAdb>);
    impl AdbControl for AdbProxy {
        fn reconnect_network(&self, serial: &str) -> Result<String> {
            self.0.reconnect_network(serial)
        }
        fn reconnect_usb(&self, serial: &str) -> Result<()> {
            self.0.reconnect_usb(serial)
        }
    }

    Executor::new(
        Box::new(NoopUsb),
        Box::new(AdbProxy(adb)),
        store,
        PROVIDER,
        RetryPolicy::new(3, std::time::Duration::from_millis(1), 2),
    )
    .with_sleep(Box::new(|_| {}))
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[test]
fn usb_device_missing_from_adb_is_reconnected() {
    // USB reports 1-2.3; ADB reports nothing; directory has a record for it
    let mut set = InventorySet::new();
    set.record(snapshot(Authority::Usb, &["1-2.3"]));
    set.record(snapshot(Authority::Adb, &[]));
    set.record(snapshot(Authority::Directory, &["1-2.3"]));

    let discrepancies = diff(&set, &EmulatorPattern::default());
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0].kind, DiscrepancyKind::MissingFromAdb);

    let actions = plan_actions(&discrepancies);
    assert_eq!(actions.len(), 1);

    let adb = Arc::new(RecordingAdb::default());
    let store = Arc::new(InMemoryStore::with_records(vec![record("1-2.3")]));
    let exec = executor(adb.clone(), store);

    assert_eq!(exec.execute(&actions[0]), Outcome::Recovered);
    assert_eq!(*adb.usb_reconnects.lock().unwrap(), vec!["1-2.3"]);

    // Next pass: ADB now sees the device; nothing left to do
    let mut set = InventorySet::new();
    set.record(snapshot(Authority::Usb, &["1-2.3"]));
    set.record(snapshot(Authority::Adb, &["1-2.3"]));
    set.record(snapshot(Authority::Directory, &["1-2.3"]));
    assert!(diff(&set, &EmulatorPattern::default()).is_empty());
}

#[test]
fn stale_emulator_record_is_deleted_exactly_once() {
    // Directory has 203.0.113.5:10001 for this host; USB and ADB report nothing
    let mut set = InventorySet::new();
    set.record(snapshot(Authority::Usb, &[]));
    set.record(snapshot(Authority::Adb, &[]));
    set.record(snapshot(Authority::Directory, &["203.0.113.5:10001"]));

    let discrepancies = diff(&set, &EmulatorPattern::default());
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0].kind, DiscrepancyKind::StaleDirectoryRecord);

    let actions = plan_actions(&discrepancies);
    let store = Arc::new(InMemoryStore::with_records(vec![
        record("203.0.113.5:10001"),
        record("1-2.3"), // unrelated hardware record survives
    ]));
    let exec = executor(Arc::new(RecordingAdb::default()), store.clone());

    assert_eq!(exec.execute(&actions[0]), Outcome::Recovered);
    assert_eq!(store.len(), 1);
    assert_eq!(store.records.lock().unwrap()[0].serial, "1-2.3");

    // Idempotence: re-executing after recovery is Unchanged, not Failed
    assert_eq!(exec.execute(&actions[0]), Outcome::Unchanged);
    assert_eq!(store.len(), 1);
}

#[test]
fn annotation_without_note_touches_nothing() {
    let store = Arc::new(InMemoryStore::with_records(vec![record("1-2.3")]));
    let exec = executor(Arc::new(RecordingAdb::default()), store.clone());

    let action = RecoveryAction::AnnotateDirectoryRecord(
        DeviceIdentity::from_serial("1-2.3").unwrap(),
        String::new(),
    );
    assert_eq!(exec.execute(&action), Outcome::Unchanged);
    assert!(store.records.lock().unwrap()[0].notes.is_none());
}

#[test]
fn annotation_is_an_idempotent_overwrite() {
    let store = Arc::new(InMemoryStore::with_records(vec![record("1-2.3")]));
    let exec = executor(Arc::new(RecordingAdb::default()), store.clone());

    let action = RecoveryAction::AnnotateDirectoryRecord(
        DeviceIdentity::from_serial("1-2.3").unwrap(),
        "maintenance window".to_string(),
    );
    assert_eq!(exec.execute(&action), Outcome::Recovered);
    assert_eq!(exec.execute(&action), Outcome::Recovered);
    assert_eq!(
        store.records.lock().unwrap()[0].notes.as_deref(),
        Some("maintenance window")
    );
}
