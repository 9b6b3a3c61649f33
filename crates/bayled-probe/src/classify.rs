//! Device-tree probe: PCI device enumeration and controller classification
//! (`spec.md` §4.1), grounded on the teacher's capability-list walker
//! (`kernel/hadron-drivers/src/pci/caps.rs`) adapted from raw port I/O to
//! the [`SysEnv`] config-space boundary, and its driver-matching cascade
//! (`kernel/hadron-drivers/src/registry.rs`).

use std::path::{Path, PathBuf};

use bayled_core::{AmdInterface, Controller, ControllerKind, Host, ProbeFilter};
use bayled_sysenv::SysEnv;

const NPEM_CAP_ID: u16 = 0x29;
const DELL_VENDOR_ID: u16 = 0x1028;
const AMD_VENDOR_ID: u16 = 0x1022;

/// DMI product names that use the IPMI sub-kind rather than SGPIO (`spec.md` §4.1).
const AMD_IPMI_PLATFORMS: &[&str] = &["ETHANOL_X", "DAYTONA_X"];

/// One extended-capability header read while walking a device's extended
/// config space, mirroring [`RawCapability`] in the teacher's legacy-list
/// walker but over the 4 KB extended region (next-pointer in bits 20..32).
#[derive(Debug, Clone, Copy)]
struct ExtendedCapability {
    id: u16,
    next_offset: u16,
}

fn read_extended_capability(
    sysenv: &impl SysEnv,
    pci_path: &Path,
    offset: u16,
) -> Option<ExtendedCapability> {
    let mut header = [0u8; 4];
    sysenv.pci_config_read(pci_path, offset, &mut header).ok()?;
    let word = u32::from_le_bytes(header);
    let id = (word & 0xffff) as u16;
    if id == 0 || id == 0xffff {
        return None;
    }
    let next_offset = ((word >> 20) & 0xffc) as u16;
    Some(ExtendedCapability { id, next_offset })
}

/// Walks the PCIe extended capability list (starting at offset 0x100)
/// looking for `target_id`, returning the config-space offset it was found
/// at so callers can address its registers relative to that base.
fn find_extended_capability(sysenv: &impl SysEnv, pci_path: &Path, target_id: u16) -> Option<u16> {
    let mut offset = 0x100u16;
    let mut visited = 0;
    while offset != 0 && visited < 64 {
        let cap = read_extended_capability(sysenv, pci_path, offset)?;
        if cap.id == target_id {
            return Some(offset);
        }
        offset = cap.next_offset;
        visited += 1;
    }
    None
}

fn read_vendor_device(sysenv: &impl SysEnv, pci_path: &Path) -> Option<(u16, u16)> {
    let mut buf = [0u8; 4];
    sysenv.pci_config_read(pci_path, 0, &mut buf).ok()?;
    Some((
        u16::from_le_bytes([buf[0], buf[1]]),
        u16::from_le_bytes([buf[2], buf[3]]),
    ))
}

fn driver_name(sysenv: &impl SysEnv, pci_path: &Path) -> Option<String> {
    let target = sysenv.read_link(&pci_path.join("driver")).ok()?;
    target.file_name()?.to_str().map(str::to_owned)
}

/// True if the device has any child sysfs entry whose name contains
/// `"enclosure"` (SES target attached under this controller).
fn has_enclosure_child(sysenv: &impl SysEnv, pci_path: &Path) -> bool {
    sysenv
        .read_dir(pci_path)
        .map(|entries| {
            entries.iter().any(|e| {
                e.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("enclosure"))
            })
        })
        .unwrap_or(false)
}

/// AHCI enclosure-management gate: `ahci_em_messages` module parameter must
/// be `1` (`spec.md` §4.1).
fn ahci_em_messages_enabled(sysenv: &impl SysEnv) -> bool {
    sysenv
        .read_attr(Path::new("/sys/module/libahci/parameters/ahci_em_messages"))
        .map(|v| v.trim() == "1")
        .unwrap_or(false)
}

fn is_dell_backplane(sysenv: &impl SysEnv, pci_path: &Path, query_succeeds: bool) -> bool {
    if query_succeeds {
        return true;
    }
    matches!(read_vendor_device(sysenv, pci_path), Some((DELL_VENDOR_ID, _)))
}

/// Classifies one PCI device into a [`ControllerKind`], or `None` if it
/// isn't a storage-management endpoint at all. Never fails hard: probe
/// failures (missing attrs, IO errors) are treated as "doesn't match" and
/// logged at DEBUG rather than propagated (`spec.md` §7).
#[must_use]
pub fn classify_controller(
    sysenv: &impl SysEnv,
    pci_path: &Path,
    dell_idrac_query_succeeds: bool,
    dmi_product_name: Option<&str>,
) -> Option<ControllerKind> {
    if let Some(cap_offset) = find_extended_capability(sysenv, pci_path, NPEM_CAP_ID) {
        return Some(ControllerKind::Npem { cap_offset });
    }

    if driver_name(sysenv, pci_path).as_deref() == Some("vmd") {
        let domain = pci_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();
        return Some(ControllerKind::Vmd { domain });
    }

    if is_dell_backplane(sysenv, pci_path, dell_idrac_query_succeeds) {
        return Some(ControllerKind::DellSsd);
    }

    let vendor_device = read_vendor_device(sysenv, pci_path);
    let driver = driver_name(sysenv, pci_path);

    if driver.as_deref() == Some("ahci") {
        if matches!(vendor_device, Some((AMD_VENDOR_ID, _))) {
            log::debug!("{}: AMD AHCI controller", pci_path.display());
            return Some(amd_kind(dmi_product_name));
        }
        if ahci_em_messages_enabled(sysenv) {
            return Some(ControllerKind::Ahci);
        }
        log::debug!(
            "{}: ahci driver bound but ahci_em_messages disabled",
            pci_path.display()
        );
        return None;
    }

    if matches!(vendor_device, Some((AMD_VENDOR_ID, _)))
        && matches!(driver.as_deref(), Some("ahci" | "nvme"))
    {
        return Some(amd_kind(dmi_product_name));
    }

    let isci_present = driver.as_deref() == Some("isci");
    if isci_present || has_enclosure_child(sysenv, pci_path) {
        return Some(ControllerKind::Scsi { isci_present });
    }

    None
}

fn amd_kind(dmi_product_name: Option<&str>) -> ControllerKind {
    let interface = match dmi_product_name {
        Some(name) if AMD_IPMI_PLATFORMS.contains(&name) => AmdInterface::Ipmi,
        _ => AmdInterface::Sgpio,
    };
    ControllerKind::Amd { interface }
}

/// Enumerates `/sys/bus/pci/devices/*`, classifies each device, and returns
/// the resulting controller set. Devices excluded by `filter`, or that
/// don't classify as any known kind, are silently omitted.
pub fn probe_controllers(
    sysenv: &impl SysEnv,
    pci_root: &Path,
    filter: &ProbeFilter,
    dell_idrac_query_succeeds: impl Fn(&Path) -> bool,
    dmi_product_name: Option<&str>,
) -> Vec<Controller> {
    let entries = sysenv.read_dir(pci_root).unwrap_or_default();
    let mut controllers = Vec::new();
    for path in entries {
        if !filter.permits(&path) {
            continue;
        }
        let dell_query = dell_idrac_query_succeeds(&path);
        match classify_controller(sysenv, &path, dell_query, dmi_product_name) {
            Some(kind) => {
                let hosts = scsi_hosts(sysenv, &path, &kind);
                let mut controller = Controller::new(path, kind);
                controller.hosts = hosts;
                controllers.push(controller);
            }
            None => log::debug!("{}: not a recognized storage controller", path.display()),
        }
    }
    controllers
}

/// Enumerates `hostN` children for a SCSI controller, building one [`Host`]
/// record per host (`spec.md` §3, "Controller").
fn scsi_hosts(sysenv: &impl SysEnv, pci_path: &Path, kind: &ControllerKind) -> Vec<Host> {
    let ControllerKind::Scsi { isci_present } = kind else {
        return Vec::new();
    };
    let Ok(entries) = sysenv.read_dir(pci_path) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let id = name.strip_prefix("host")?.parse::<u32>().ok()?;
            let phy_count = sysenv
                .read_attr(&path.join("phy_count"))
                .ok()
                .and_then(|v| v.trim().parse::<u8>().ok())
                .unwrap_or(0);
            Some(Host::new(id, phy_count, *isci_present))
        })
        .collect()
}
