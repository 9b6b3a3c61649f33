//! Controller, enclosure-reference, block-device, and slot data model
//! (`SPEC_FULL.md` §3).
//!
//! Relations are expressed as small `Copy` id newtypes rather than borrowed
//! references or raw pointers (`spec.md` §9, "No raw pointer graphs") — the
//! engine's registries own the actual records and look them up by id for
//! the duration of a `set`/`flush` call.

use std::cell::RefCell;
use std::path::PathBuf;

use crate::Pattern;

/// Canonical sysfs path used as the stable key for a block device.
pub type DeviceKey = PathBuf;

/// Opaque handle into the engine's controller registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(pub u32);

/// Opaque handle into the engine's enclosure registry (owned by
/// `bayled-enclosure`; referenced here only by id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnclosureId(pub u32);

/// Which register interface an AMD backplane controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmdInterface {
    /// Three-register SGPIO frame (`SPEC_FULL.md` §4.11).
    Sgpio,
    /// MG9098 register read-modify-write over IPMI (`SPEC_FULL.md` §4.12).
    Ipmi,
}

/// The kind of storage HBA or management endpoint a [`Controller`] is.
#[derive(Debug, Clone)]
pub enum ControllerKind {
    /// AHCI SATA host controller, addressed via `em_message`.
    Ahci,
    /// SCSI host, addressed via SES or SMP depending on topology.
    Scsi {
        /// True when the `isci` driver is bound (direct-attached SGPIO path).
        isci_present: bool,
    },
    /// Dell iDRAC-managed NVMe/SAS backplane, addressed via OEM IPMI.
    DellSsd,
    /// Intel VMD root port, addressed via PCIe hotplug `attention`.
    Vmd {
        /// PCIe domain string this VMD instance owns.
        domain: String,
    },
    /// PCIe Native Enclosure Management capable endpoint.
    Npem {
        /// Config-space offset the extended capability (id `0x29`) was
        /// found at; register offsets are relative to this base.
        cap_offset: u16,
    },
    /// AMD backplane, SGPIO or IPMI depending on platform.
    Amd {
        /// Which register interface this platform uses.
        interface: AmdInterface,
    },
    /// Classified as storage-adjacent but no transport could be determined.
    Unknown,
}

/// Per-host isci direct-attached SGPIO staging state (`spec.md` §4.7).
#[derive(Debug, Clone, Default)]
pub struct IsciStaging {
    /// SFF-8485 GPIO_TX\[1\] 4-byte bitstream shared by all phys on this host.
    pub bitstream: [u8; 4],
    /// Set by `set`, cleared by `flush`.
    pub dirty: bool,
}

/// A SCSI host attached to a [`Controller`] of kind [`ControllerKind::Scsi`].
#[derive(Debug)]
pub struct Host {
    /// Kernel `hostN` id.
    pub id: u32,
    /// Number of phys on this host.
    pub phy_count: u8,
    /// Per-phy IBPI staging buffer (length `phy_count`), used by the
    /// non-isci SMP path (`spec.md` §4.7).
    pub staging: RefCell<Vec<Pattern>>,
    /// Set when any phy's staged pattern changed since the last flush.
    pub dirty: RefCell<bool>,
    /// Direct-attached isci staging; `None` unless the owning controller has
    /// `isci_present = true`.
    pub isci: Option<RefCell<IsciStaging>>,
}

impl Host {
    /// Builds a host record with an all-`Unknown` staging buffer.
    #[must_use]
    pub fn new(id: u32, phy_count: u8, isci_present: bool) -> Self {
        Self {
            id,
            phy_count,
            staging: RefCell::new(vec![Pattern::Unknown; phy_count as usize]),
            dirty: RefCell::new(false),
            isci: isci_present.then(|| RefCell::new(IsciStaging::default())),
        }
    }
}

/// A storage HBA or management endpoint (`spec.md` §3, "Controller").
#[derive(Debug)]
pub struct Controller {
    /// Canonical device-tree path; the stable identifier.
    pub path: PathBuf,
    /// Transport classification.
    pub kind: ControllerKind,
    /// Attached SCSI hosts; empty for non-SCSI kinds.
    pub hosts: Vec<Host>,
}

impl Controller {
    /// Builds a controller with no attached hosts.
    #[must_use]
    pub fn new(path: PathBuf, kind: ControllerKind) -> Self {
        Self {
            path,
            kind,
            hosts: Vec::new(),
        }
    }
}

/// A reference to an enclosure slot, used by SES-attached block devices and
/// by the slot API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnclosureRef {
    /// Enclosure this slot belongs to.
    pub enclosure: EnclosureId,
    /// Element index within the enclosure's additional-element-status list.
    pub element_index: u16,
}

/// How a [`BlockDevice`] is addressed on the wire, computed by binding
/// (`spec.md` §4.2).
#[derive(Debug, Clone)]
pub enum ControlPath {
    /// AHCI: the `scsi_host` directory for this device's `hostN`.
    AhciScsiHost {
        /// `.../scsi_host/hostN` sysfs directory.
        scsi_host_dir: PathBuf,
    },
    /// SCSI, direct-attached (no `/expander` segment in the topology).
    ScsiBsg {
        /// `hostN/bsg/sas_hostN` bsg node.
        host_bsg: PathBuf,
    },
    /// SCSI, expander-attached: same bsg node, plus the enclosure slot.
    ScsiExpanderBsg {
        /// `hostN/bsg/sas_hostN` bsg node.
        host_bsg: PathBuf,
        /// Enclosure element containing this drive's SAS end-device address.
        enclosure: EnclosureRef,
    },
    /// NPEM, VMD, or Dell: the controller's own canonical path addresses it directly.
    Controller {
        /// Canonical controller path.
        path: PathBuf,
    },
    /// AMD SGPIO: nearest `em_buffer` file under the AHCI root.
    AmdSgpioEmBuffer {
        /// Path to the `em_buffer` sysfs file.
        em_buffer: PathBuf,
    },
    /// AMD IPMI: truncated sysfs path up to (and including) the bay segment.
    AmdIpmiBay {
        /// Truncated sysfs path identifying the bay.
        bay_path: PathBuf,
    },
}

/// A snapshot of the MD-RAID array a drive participates in (`spec.md` §6);
/// populated from `md/*` sysfs attributes by whatever collaborator
/// maintains RAID state (the watcher daemon is out of scope here).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaidRecord {
    /// `md/array_state`.
    pub array_state: String,
    /// `md/sync_action`.
    pub sync_action: String,
    /// `md/level`.
    pub level: String,
    /// `md/degraded`.
    pub degraded: bool,
    /// `md/raid_disks`.
    pub raid_disks: u32,
}

/// One addressable drive (`spec.md` §3, "BlockDevice").
#[derive(Debug, Clone)]
pub struct BlockDevice {
    /// Canonical sysfs path; doubles as the registry key.
    pub sysfs_path: DeviceKey,
    /// `/dev` node path, with NVMe multipath namespaces dereferenced to their primary.
    pub devnode: PathBuf,
    /// The controller that owns this device.
    pub controller: ControllerId,
    /// How to address this device on the wire.
    pub control_path: ControlPath,
    /// Most recently requested pattern.
    pub current: Pattern,
    /// Last pattern actually applied to hardware.
    pub previous: Pattern,
    /// SCSI host id, meaningful only for SCSI-attached devices.
    pub host_id: Option<u32>,
    /// SCSI phy index, meaningful only for SCSI-attached devices.
    pub phy_index: Option<u8>,
    /// SES enclosure slot, meaningful only for SES-attached devices.
    pub enclosure: Option<EnclosureRef>,
    /// RAID array this drive participates in, if any.
    pub raid: Option<RaidRecord>,
}

impl BlockDevice {
    /// Builds a freshly-bound block device with `previous = current = None_`.
    #[must_use]
    pub fn new(
        sysfs_path: DeviceKey,
        devnode: PathBuf,
        controller: ControllerId,
        control_path: ControlPath,
    ) -> Self {
        Self {
            sysfs_path,
            devnode,
            controller,
            control_path,
            current: Pattern::None_,
            previous: Pattern::None_,
            host_id: None,
            phy_index: None,
            enclosure: None,
            raid: None,
        }
    }
}

/// Where a [`SlotProperty`] is actually addressed, independent of whether a
/// [`BlockDevice`] currently occupies it (`spec.md` §3, §4.13).
#[derive(Debug, Clone)]
pub enum SlotTarget {
    /// VMD: a PCIe hotplug slot.
    PciHotplug {
        /// `/sys/bus/pci/slots/*/address` value.
        slot_address: String,
    },
    /// NPEM: the controller itself exposes the capability.
    Controller {
        /// Controller owning the NPEM capability.
        controller: ControllerId,
    },
    /// SES: an enclosure element.
    Enclosure {
        /// Reference to the enclosure slot.
        slot: EnclosureRef,
    },
}

/// A uniform slot handle usable whether or not a block device occupies it
/// (`spec.md` §3, "SlotProperty"; `spec.md` §6 slot enumeration: `{kind, id,
/// optional devnode, current pattern}`).
#[derive(Debug, Clone)]
pub struct SlotProperty {
    /// Opaque slot identifier (e.g. `"bay3"`, a PCI slot address, an enclosure index).
    pub slot_id: String,
    /// Canonical sysfs key of the device occupying this slot, if any.
    pub occupant: Option<DeviceKey>,
    /// `/dev` node of the occupying device, if any.
    pub devnode: Option<PathBuf>,
    /// Pattern currently applied to the slot's transport.
    pub pattern: Pattern,
    /// Where the slot is actually addressed.
    pub target: SlotTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_staging_starts_unknown() {
        let host = Host::new(3, 4, false);
        assert_eq!(host.staging.borrow().len(), 4);
        assert!(host.staging.borrow().iter().all(|&p| p == Pattern::Unknown));
        assert!(host.isci.is_none());
    }

    #[test]
    fn isci_host_gets_staging_buffer() {
        let host = Host::new(1, 8, true);
        assert!(host.isci.is_some());
    }

    #[test]
    fn block_device_starts_at_none() {
        let bd = BlockDevice::new(
            PathBuf::from("/sys/block/sda"),
            PathBuf::from("/dev/sda"),
            ControllerId(0),
            ControlPath::Controller {
                path: PathBuf::from("/sys/bus/pci/devices/0000:00:1f.2"),
            },
        );
        assert_eq!(bd.current, Pattern::None_);
        assert_eq!(bd.previous, Pattern::None_);
    }
}
