//! Block-device binding: matches each block device to its controller and
//! computes the control path the owning transport addresses it through
//! (`spec.md` §4.2).

use std::path::{Path, PathBuf};

use bayled_core::{
    BlockDevice, Controller, ControllerId, ControllerKind, ControlPath, DeviceKey, Error,
};
use bayled_sysenv::SysEnv;

/// Finds the controller whose canonical path is the longest prefix of
/// `block_path`, preferring an NPEM controller among ties (it is the leaf
/// closest to the drive, per `spec.md` §4.2).
fn matching_controller(controllers: &[Controller], block_path: &Path) -> Option<ControllerId> {
    controllers
        .iter()
        .enumerate()
        .filter(|(_, c)| block_path.starts_with(&c.path))
        .max_by_key(|(_, c)| {
            (
                matches!(c.kind, ControllerKind::Npem { .. }),
                c.path.as_os_str().len(),
            )
        })
        .map(|(i, _)| ControllerId(i as u32))
}

/// True if `segment` in an expander topology indicates an expander hop
/// rather than a direct host attachment (`spec.md` §4.2).
fn is_expander_attached(block_path: &Path) -> bool {
    block_path
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| s.contains("expander")))
}

fn host_bsg_path(scsi_host_dir: &Path, host_id: u32) -> PathBuf {
    scsi_host_dir.join(format!("bsg/sas_host{host_id}"))
}

/// Truncates a sysfs path to (and including) its `ataNN` segment, for the
/// AMD IPMI SATA control path (`spec.md` §4.2).
fn truncate_to_ata_segment(block_path: &Path) -> Option<PathBuf> {
    let mut truncated = PathBuf::new();
    for component in block_path.components() {
        let is_ata = component
            .as_os_str()
            .to_str()
            .is_some_and(|s| s.starts_with("ata") && s[3..].chars().all(|c| c.is_ascii_digit()));
        truncated.push(component);
        if is_ata {
            return Some(truncated);
        }
    }
    None
}

fn nearest_em_buffer(sysenv: &impl SysEnv, block_path: &Path) -> Option<PathBuf> {
    let mut current = block_path;
    loop {
        let candidate = current.join("em_buffer");
        if sysenv.exists(&candidate) {
            return Some(candidate);
        }
        current = current.parent()?;
    }
}

/// Computes the [`ControlPath`] for a block device owned by `controller`,
/// found at `host_id` (for SCSI kinds) on `scsi_host_dir`.
fn compute_control_path(
    sysenv: &impl SysEnv,
    controller: &Controller,
    block_path: &Path,
    scsi_host_dir: &Path,
    host_id: Option<u32>,
) -> Result<ControlPath, Error> {
    match &controller.kind {
        ControllerKind::Ahci => Ok(ControlPath::AhciScsiHost {
            scsi_host_dir: scsi_host_dir.to_path_buf(),
        }),
        ControllerKind::Scsi { .. } => {
            let host_id = host_id.ok_or_else(|| Error::InvalidPath("missing hostN id".into()))?;
            let host_bsg = host_bsg_path(scsi_host_dir, host_id);
            if is_expander_attached(block_path) {
                Err(Error::not_supported(
                    "expander-attached binding requires an enclosure lookup; use bind_expander_attached",
                ))
            } else {
                Ok(ControlPath::ScsiBsg { host_bsg })
            }
        }
        ControllerKind::DellSsd | ControllerKind::Vmd { .. } | ControllerKind::Npem { .. } => {
            Ok(ControlPath::Controller {
                path: controller.path.clone(),
            })
        }
        ControllerKind::Amd {
            interface: bayled_core::AmdInterface::Sgpio,
        } => {
            let em_buffer = nearest_em_buffer(sysenv, block_path)
                .ok_or_else(|| Error::InvalidPath("no em_buffer found under AHCI root".into()))?;
            Ok(ControlPath::AmdSgpioEmBuffer { em_buffer })
        }
        ControllerKind::Amd {
            interface: bayled_core::AmdInterface::Ipmi,
        } => {
            let bay_path =
                truncate_to_ata_segment(block_path).unwrap_or_else(|| block_path.to_path_buf());
            Ok(ControlPath::AmdIpmiBay { bay_path })
        }
        ControllerKind::Unknown => Err(Error::not_supported("unknown controller kind")),
    }
}

/// Canonicalizes an NVMe multipath devnode name (`nvmeXcYnZ`) to its
/// primary namespace (`nvmeXnZ`), per testable boundary behavior `spec.md` §8.
#[must_use]
pub fn canonicalize_nvme_devnode(name: &str) -> String {
    let Some(rest) = name.strip_prefix("nvme") else {
        return name.to_owned();
    };
    let Some(x_end) = rest.find('c') else {
        return name.to_owned();
    };
    let (x, after_c) = rest.split_at(x_end);
    let after_c = &after_c[1..];
    let Some(n_pos) = after_c.find('n') else {
        return name.to_owned();
    };
    if !after_c[..n_pos].chars().all(|c| c.is_ascii_digit()) {
        return name.to_owned();
    }
    format!("nvme{x}{}", &after_c[n_pos..])
}

/// Binds one block device against the already-probed controller set,
/// computing its control path and dereferencing its devnode.
pub fn bind_block_device(
    sysenv: &impl SysEnv,
    controllers: &[Controller],
    block_path: &Path,
    scsi_host_dir: &Path,
    host_id: Option<u32>,
    phy_index: Option<u8>,
) -> Result<BlockDevice, Error> {
    let controller_id = matching_controller(controllers, block_path)
        .ok_or_else(|| Error::InvalidPath(format!("no controller owns {}", block_path.display())))?;
    let controller = &controllers[controller_id.0 as usize];

    let control_path = compute_control_path(sysenv, controller, block_path, scsi_host_dir, host_id)?;

    let devnode_name = block_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath("block device path has no file name".into()))?;
    let canonical_name = canonicalize_nvme_devnode(devnode_name);
    let devnode = PathBuf::from("/dev").join(canonical_name);

    let key: DeviceKey = block_path.to_path_buf();
    let mut device = BlockDevice::new(key, devnode, controller_id, control_path);
    device.host_id = host_id;
    device.phy_index = phy_index;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_core::AmdInterface;
    use bayled_sysenv::mock::MockSysEnv;

    #[test]
    fn nvme_multipath_devnode_canonicalizes() {
        assert_eq!(canonicalize_nvme_devnode("nvme0c1n1"), "nvme0n1");
        assert_eq!(canonicalize_nvme_devnode("nvme0n1"), "nvme0n1");
        assert_eq!(canonicalize_nvme_devnode("sda"), "sda");
    }

    #[test]
    fn npem_leaf_preferred_over_parent_scsi_controller() {
        let mut scsi = Controller::new(PathBuf::from("/sys/devices/pci0/0000:00:1f.2"), ControllerKind::Scsi { isci_present: false });
        scsi.hosts = vec![];
        let npem = Controller::new(
            PathBuf::from("/sys/devices/pci0/0000:00:1f.2/ata1/host0/target0:0:0"),
            ControllerKind::Npem { cap_offset: 0x100 },
        );
        let controllers = vec![scsi, npem];
        let sysenv = MockSysEnv::new();
        let block_path = PathBuf::from("/sys/devices/pci0/0000:00:1f.2/ata1/host0/target0:0:0/block/sda");
        let bound = bind_block_device(&sysenv, &controllers, &block_path, Path::new(""), None, None).unwrap();
        assert_eq!(bound.controller, ControllerId(1));
    }

    #[test]
    fn ahci_binds_to_scsi_host_control_path() {
        let controllers = vec![Controller::new(
            PathBuf::from("/sys/devices/pci0/0000:00:1f.2"),
            ControllerKind::Ahci,
        )];
        let sysenv = MockSysEnv::new();
        let block_path = PathBuf::from("/sys/devices/pci0/0000:00:1f.2/ata1/host0/target0:0:0/block/sda");
        let host_dir = PathBuf::from("/sys/class/scsi_host/host0");
        let bound =
            bind_block_device(&sysenv, &controllers, &block_path, &host_dir, None, None).unwrap();
        assert!(matches!(bound.control_path, ControlPath::AhciScsiHost { .. }));
        assert_eq!(bound.devnode, PathBuf::from("/dev/sda"));
    }

    #[test]
    fn amd_sgpio_finds_nearest_em_buffer() {
        let controllers = vec![Controller::new(
            PathBuf::from("/sys/devices/pci0/0000:00:14.0"),
            ControllerKind::Amd {
                interface: AmdInterface::Sgpio,
            },
        )];
        let sysenv = MockSysEnv::new();
        sysenv.set_dir("/sys/devices/pci0/0000:00:14.0", vec![]);
        sysenv.set_attr(
            "/sys/devices/pci0/0000:00:14.0/em_buffer_marker",
            "unused",
        );
        // em_buffer exists at the controller root, two levels up from the block device.
        sysenv.set_dev("/sys/devices/pci0/0000:00:14.0/em_buffer", 0, 0);
        let block_path = PathBuf::from("/sys/devices/pci0/0000:00:14.0/ata1/host0/target0:0:0/block/sda");
        let bound = bind_block_device(&sysenv, &controllers, &block_path, Path::new(""), None, None).unwrap();
        assert!(matches!(bound.control_path, ControlPath::AmdSgpioEmBuffer { .. }));
    }

    #[test]
    fn unmatched_block_device_is_invalid_path() {
        let sysenv = MockSysEnv::new();
        let err = bind_block_device(&sysenv, &[], Path::new("/sys/block/sda"), Path::new(""), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }
}
