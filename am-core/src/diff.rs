//! State differencer
//!
//! Pure comparison of the three authority snapshots. Each pass recomputes
//! everything from freshly captured state; there is no long-lived "known
//! devices" registry to drift.
//!
//! Classification rules, in priority order (first match wins per identity):
//! 1. Online in directory and USB, absent from ADB        -> MissingFromAdb
//! 2. Online in directory and ADB, absent from USB,
//!    and not an emulator identity                        -> MissingFromUsb
//! 3. In directory, absent from both USB and ADB,
//!    and matching the emulator pattern                   -> StaleDirectoryRecord
//! 4. Otherwise no discrepancy.
//!
//! An authority unavailable for the pass is excluded from every identity's
//! comparison; it never implies absence.

use tracing::{debug, trace};

use crate::data::{
    Authority, DeviceIdentity, Discrepancy, DiscrepancyKind, EmulatorPattern, InventorySet,
    RecoveryAction,
};

/// Presence of one identity in one authority's snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    /// Authority was not readable this pass; excluded from comparison
    Unavailable,
    Absent,
    Present { online: bool },
}

impl Presence {
    fn online(self) -> bool {
        matches!(self, Presence::Present { online: true })
    }

    /// Known-absent: only meaningful when the authority was readable
    fn absent(self) -> bool {
        matches!(self, Presence::Absent)
    }

    fn present(self) -> bool {
        matches!(self, Presence::Present { .. })
    }
}

fn presence(set: &InventorySet, authority: Authority, identity: &DeviceIdentity) -> Presence {
    match set.snapshot(authority) {
        None => Presence::Unavailable,
        Some(snapshot) => match snapshot.status(identity) {
            None => Presence::Absent,
            Some(status) => Presence::Present {
                online: status.online,
            },
        },
    }
}

/// Compute the discrepancies between the available snapshots.
/// Pure and deterministic given its inputs; no side effects.
pub fn diff(set: &InventorySet, emulator: &EmulatorPattern) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    for identity in set.identities() {
        let usb = presence(set, Authority::Usb, &identity);
        let adb = presence(set, Authority::Adb, &identity);
        let directory = presence(set, Authority::Directory, &identity);

        trace!(%identity, ?usb, ?adb, ?directory, "classifying");

        let kind = if directory.online() && usb.online() && adb.absent() {
            Some((DiscrepancyKind::MissingFromAdb, Authority::Usb, Authority::Adb))
        } else if directory.online()
            && adb.online()
            && usb.absent()
            && !emulator.matches(&identity)
        {
            Some((DiscrepancyKind::MissingFromUsb, Authority::Adb, Authority::Usb))
        } else if directory.present()
            && usb.absent()
            && adb.absent()
            && emulator.matches(&identity)
        {
            Some((
                DiscrepancyKind::StaleDirectoryRecord,
                Authority::Directory,
                Authority::Adb,
            ))
        } else {
            None
        };

        if let Some((kind, expected, actual)) = kind {
            debug!(%identity, %kind, "discrepancy detected");
            discrepancies.push(Discrepancy {
                identity,
                expected,
                actual,
                kind,
            });
        }
    }

    discrepancies
}

/// Derive the minimal corrective action for each discrepancy.
/// Exactly one action per discrepancy; hardware records are recovered via
/// rebind/reconnect, never deleted.
pub fn plan_actions(discrepancies: &[Discrepancy]) -> Vec<RecoveryAction> {
    discrepancies
        .iter()
        .map(|d| match d.kind {
            DiscrepancyKind::MissingFromAdb => {
                RecoveryAction::RestartAdbConnection(d.identity.clone())
            }
            DiscrepancyKind::MissingFromUsb => RecoveryAction::RebindUsbDriver(d.identity.clone()),
            DiscrepancyKind::StaleDirectoryRecord => {
                RecoveryAction::DeleteDirectoryRecord(d.identity.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DeviceStatus, InventorySnapshot};

    fn usb_id(path: &str) -> DeviceIdentity {
        DeviceIdentity::UsbPath(path.to_string())
    }

    fn net_id(serial: &str) -> DeviceIdentity {
        DeviceIdentity::Network(serial.to_string())
    }

    fn snapshot(authority: Authority, devices: &[(&DeviceIdentity, bool)]) -> InventorySnapshot {
        let mut snap = InventorySnapshot::new(authority);
        for (identity, online) in devices {
            let status = if *online {
                DeviceStatus::online()
            } else {
                DeviceStatus::offline()
            };
            snap.insert((*identity).clone(), status);
        }
        snap
    }

    fn pattern() -> EmulatorPattern {
        EmulatorPattern::default()
    }

    #[test]
    fn all_online_everywhere_yields_nothing() {
        let id = usb_id("1-2.3");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[(&id, true)]));
        set.record(snapshot(Authority::Adb, &[(&id, true)]));
        set.record(snapshot(Authority::Directory, &[(&id, true)]));

        assert!(diff(&set, &pattern()).is_empty());
    }

    #[test]
    fn missing_from_adb() {
        let id = usb_id("1-2.3");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[(&id, true)]));
        set.record(snapshot(Authority::Adb, &[]));
        set.record(snapshot(Authority::Directory, &[(&id, true)]));

        let discrepancies = diff(&set, &pattern());
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].kind, DiscrepancyKind::MissingFromAdb);
        assert_eq!(discrepancies[0].expected, Authority::Usb);
        assert_eq!(discrepancies[0].actual, Authority::Adb);

        let actions = plan_actions(&discrepancies);
        assert_eq!(actions, vec![RecoveryAction::RestartAdbConnection(id)]);
    }

    #[test]
    fn missing_from_usb_is_hardware_only() {
        let hw = usb_id("1-2.3");
        let emu = net_id("203.0.113.5:10001");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[]));
        set.record(snapshot(Authority::Adb, &[(&hw, true), (&emu, true)]));
        set.record(snapshot(Authority::Directory, &[(&hw, true), (&emu, true)]));

        let discrepancies = diff(&set, &pattern());
        // The emulator has no USB backing by construction; only the hardware
        // device is missing from the bus.
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].kind, DiscrepancyKind::MissingFromUsb);
        assert_eq!(discrepancies[0].identity, hw);

        let actions = plan_actions(&discrepancies);
        assert_eq!(actions, vec![RecoveryAction::RebindUsbDriver(hw)]);
    }

    #[test]
    fn stale_emulator_record_is_exactly_one_discrepancy() {
        let emu = net_id("203.0.113.5:10001");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[]));
        set.record(snapshot(Authority::Adb, &[]));
        set.record(snapshot(Authority::Directory, &[(&emu, true)]));

        let discrepancies = diff(&set, &pattern());
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].kind, DiscrepancyKind::StaleDirectoryRecord);
        assert_eq!(discrepancies[0].expected, Authority::Directory);

        let actions = plan_actions(&discrepancies);
        assert_eq!(actions, vec![RecoveryAction::DeleteDirectoryRecord(emu)]);
    }

    #[test]
    fn stale_hardware_record_is_never_deleted() {
        // Directory knows a hardware device that no live authority sees.
        // No rule fires: hardware records are recovered, not cleaned up.
        let hw = usb_id("1-2.3");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[]));
        set.record(snapshot(Authority::Adb, &[]));
        set.record(snapshot(Authority::Directory, &[(&hw, true)]));

        assert!(diff(&set, &pattern()).is_empty());
    }

    #[test]
    fn unavailable_authority_never_implies_absence() {
        // Directory store down for the whole pass: USB-only discrepancies are
        // skipped, not misclassified as MissingFromUsb.
        let hw = usb_id("1-2.3");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[]));
        set.record(snapshot(Authority::Adb, &[(&hw, true)]));
        set.mark_unavailable(Authority::Directory, "connection refused");

        assert!(diff(&set, &pattern()).is_empty());

        // ADB down: an emulator record with live directory presence is not
        // treated as stale.
        let emu = net_id("203.0.113.5:10001");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[]));
        set.mark_unavailable(Authority::Adb, "server restarting");
        set.record(snapshot(Authority::Directory, &[(&emu, true)]));

        assert!(diff(&set, &pattern()).is_empty());
    }

    #[test]
    fn offline_in_an_authority_is_not_online() {
        // Present-but-offline in ADB does not satisfy the MissingFromUsb
        // rule's "online in ADB" requirement.
        let hw = usb_id("1-2.3");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[]));
        set.record(snapshot(Authority::Adb, &[(&hw, false)]));
        set.record(snapshot(Authority::Directory, &[(&hw, true)]));

        assert!(diff(&set, &pattern()).is_empty());
    }

    #[test]
    fn one_action_per_discrepancy() {
        let a = usb_id("1-2.3");
        let b = net_id("203.0.113.5:10001");
        let mut set = InventorySet::new();
        set.record(snapshot(Authority::Usb, &[(&a, true)]));
        set.record(snapshot(Authority::Adb, &[]));
        set.record(snapshot(Authority::Directory, &[(&a, true), (&b, true)]));

        let discrepancies = diff(&set, &pattern());
        let actions = plan_actions(&discrepancies);
        assert_eq!(discrepancies.len(), actions.len());
        // No duplicate identities within a pass
        let mut identities: Vec<_> = actions.iter().map(|a| a.identity().clone()).collect();
        identities.sort();
        identities.dedup();
        assert_eq!(identities.len(), actions.len());
    }
}
