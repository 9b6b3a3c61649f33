//! `Engine::flush`: dispatches every changed block device to its owning
//! transport, then flushes the batching transports (SES, SMP) it staged
//! into (`spec.md` §4 "State machine", §4.14).

use bayled_core::{Controller, ControllerId, ControllerKind, ControlPath, DeviceKey, Error, Host, Pattern};
use bayled_sysenv::SysEnv;
use bayled_transports::{ahci, amd_ipmi, amd_sgpio, dell_ipmi, npem, ses, smp, vmd};

use crate::context::{Engine, FlushReport};

fn find_host(controller: &Controller, host_id: Option<u32>) -> Result<&Host, Error> {
    let host_id = host_id.ok_or_else(|| Error::DataError("SCSI device has no host id".into()))?;
    controller
        .hosts
        .iter()
        .find(|h| h.id == host_id)
        .ok_or_else(|| Error::InvalidPath(format!("no host record for host{host_id}")))
}

/// One-shot transports write immediately; batching transports (SES, SMP)
/// stage into a shared buffer and report `true` without touching hardware
/// yet — the caller flushes the owning host/enclosure afterwards.
enum Applied {
    Written(bool),
    StagedHost(ControllerId, u32),
    StagedEnclosure(bayled_core::EnclosureId),
}

fn apply_one<S: SysEnv>(
    sysenv: &S,
    device: &mut bayled_core::BlockDevice,
    controller: &Controller,
    enclosures: &mut std::collections::HashMap<bayled_core::EnclosureId, bayled_enclosure::Enclosure>,
    dell_generations: &mut std::collections::HashMap<ControllerId, dell_ipmi::Generation>,
    amd_backplane_validated: &mut std::collections::HashSet<ControllerId>,
) -> Result<Applied, Error> {
    let previous = device.previous;
    let current = device.current;

    match device.control_path.clone() {
        ControlPath::AhciScsiHost { scsi_host_dir } => {
            let wrote = ahci::set(sysenv, &scsi_host_dir, previous, current)?;
            Ok(Applied::Written(wrote))
        }
        ControlPath::Controller { path } => match &controller.kind {
            ControllerKind::Npem { cap_offset } => {
                Ok(Applied::Written(npem::set(sysenv, &path, *cap_offset, previous, current)?))
            }
            ControllerKind::Vmd { .. } => Ok(Applied::Written(vmd::set(sysenv, &path, previous, current)?)),
            ControllerKind::DellSsd => {
                let generation = match dell_generations.get(&device.controller) {
                    Some(g) => *g,
                    None => {
                        let g = dell_ipmi::query_generation(sysenv)?;
                        dell_generations.insert(device.controller, g);
                        g
                    }
                };
                let pci_bdf = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                let (bay, slot) = dell_ipmi::resolve_bay_slot(sysenv, generation, pci_bdf)?;
                let wrote = dell_ipmi::set(sysenv, generation, bay, slot, previous, current)?;
                Ok(Applied::Written(wrote))
            }
            other => Err(Error::not_supported(format!("{other:?} has no direct control-path dispatch"))),
        },
        ControlPath::AmdSgpioEmBuffer { em_buffer } => {
            // The model doesn't carry a dedicated `ata_port` field; derive a
            // surrogate from the bound phy index (`spec.md` §4.11 groups by
            // `(ata_port - 1) / 4`, so any stable 1-based numbering per host
            // preserves the grouping behavior this transport depends on).
            let ata_port = u32::from(device.phy_index.unwrap_or(0)) + 1;
            let wrote = amd_sgpio::set(sysenv, &em_buffer, ata_port, previous, current)?;
            Ok(Applied::Written(wrote))
        }
        ControlPath::AmdIpmiBay { .. } => {
            let kind = if device.devnode.to_string_lossy().contains("nvme") {
                amd_ipmi::BayKind::Nvme
            } else {
                amd_ipmi::BayKind::SataLow
            };
            // Channel isn't modeled on `BlockDevice` either; the owning
            // controller's registry index is a stable per-controller value.
            let channel = (device.controller.0 % 256) as u8;
            if !amd_backplane_validated.contains(&device.controller) {
                amd_ipmi::validate_backplane_for(sysenv, kind, channel)?;
                amd_backplane_validated.insert(device.controller);
            }
            let wrote = amd_ipmi::set(sysenv, kind, channel, previous, current)?;
            Ok(Applied::Written(wrote))
        }
        ControlPath::ScsiBsg { .. } => {
            let host = find_host(controller, device.host_id)?;
            let phy_index = device.phy_index.unwrap_or(0);
            let staged = if host.isci.is_some() {
                smp::set_isci(host, phy_index, previous, current)?
            } else {
                smp::set(host, phy_index, previous, current)?
            };
            if staged {
                Ok(Applied::StagedHost(device.controller, host.id))
            } else {
                Ok(Applied::Written(false))
            }
        }
        ControlPath::ScsiExpanderBsg { enclosure, .. } => {
            let encl = enclosures
                .get_mut(&enclosure.enclosure)
                .ok_or_else(|| Error::InvalidPath("unknown enclosure".into()))?;
            let staged = ses::set(encl, enclosure.element_index, true, previous, current)?;
            if staged {
                Ok(Applied::StagedEnclosure(enclosure.enclosure))
            } else {
                Ok(Applied::Written(false))
            }
        }
    }
}

fn rearm(device: &mut bayled_core::BlockDevice) {
    device.previous = device.current;
    if device.current == Pattern::OneshotNormal {
        device.current = Pattern::Unknown;
    }
}

fn host_bsg_path(host_id: u32) -> std::path::PathBuf {
    // Mirrors `bayled_probe::bind`'s `host_bsg_path`; the flush path only
    // has the controller/host pair, not the originating block device's
    // `scsi_host_dir`, so it's recomputed from the well-known sysfs layout.
    std::path::PathBuf::from(format!("/sys/class/scsi_host/host{host_id}/bsg/sas_host{host_id}"))
}

impl Engine {
    /// Dispatches every device with `current != previous` to its owning
    /// transport, flushes the batching transports it staged into, and
    /// updates `previous` (plus `ONESHOT_NORMAL` re-arming) only for writes
    /// that actually succeeded (`spec.md` §8 property 1).
    ///
    /// Errors are collected per device rather than aborting the loop
    /// (`spec.md` §4.14, §7).
    pub fn flush<S: SysEnv>(&mut self, sysenv: &S) -> FlushReport {
        let mut errors = Vec::new();
        let mut dirty_hosts: std::collections::HashSet<(ControllerId, u32)> = std::collections::HashSet::new();
        let mut dirty_enclosures: std::collections::HashSet<bayled_core::EnclosureId> = std::collections::HashSet::new();
        let mut staged_keys: Vec<(DeviceKey, (ControllerId, u32))> = Vec::new();
        let mut staged_encl_keys: Vec<(DeviceKey, bayled_core::EnclosureId)> = Vec::new();

        let keys: Vec<DeviceKey> = self.devices.keys().cloned().collect();
        for key in &keys {
            let Some(device) = self.devices.get_mut(key) else { continue };
            if device.current == device.previous {
                continue;
            }
            let Some(controller) = self.controllers.get(device.controller.0 as usize) else {
                errors.push((key.clone(), Error::InvalidPath("controller no longer in registry".into())));
                continue;
            };

            match apply_one(
                sysenv,
                device,
                controller,
                &mut self.enclosures,
                &mut self.dell_generations,
                &mut self.amd_backplane_validated,
            ) {
                Ok(Applied::Written(true)) => rearm(device),
                Ok(Applied::Written(false)) => {}
                Ok(Applied::StagedHost(controller_id, host_id)) => {
                    dirty_hosts.insert((controller_id, host_id));
                    staged_keys.push((key.clone(), (controller_id, host_id)));
                }
                Ok(Applied::StagedEnclosure(enclosure_id)) => {
                    dirty_enclosures.insert(enclosure_id);
                    staged_encl_keys.push((key.clone(), enclosure_id));
                }
                Err(err) => errors.push((key.clone(), err)),
            }
        }

        let mut failed_hosts = std::collections::HashSet::new();
        for (controller_id, host_id) in dirty_hosts {
            let Some(controller) = self.controllers.get(controller_id.0 as usize) else { continue };
            let Some(host) = controller.hosts.iter().find(|h| h.id == host_id) else { continue };
            let host_bsg = host_bsg_path(host_id);
            let result = if host.isci.is_some() {
                smp::flush_isci_host(sysenv, host, &host_bsg)
            } else {
                smp::flush_host(sysenv, host, &host_bsg)
            };
            if let Err(err) = result {
                self.log.emit(log::Level::Warn, &format!("host{host_id} flush failed: {err}"));
                failed_hosts.insert((controller_id, host_id));
            }
        }

        let mut failed_enclosures = std::collections::HashSet::new();
        for enclosure_id in dirty_enclosures {
            let Some(enclosure) = self.enclosures.get_mut(&enclosure_id) else { continue };
            if let Err(err) = ses::flush(enclosure, sysenv) {
                self.log.emit(log::Level::Warn, &format!("enclosure {} flush failed: {err}", enclosure_id.0));
                failed_enclosures.insert(enclosure_id);
            }
        }

        for (key, host_key) in staged_keys {
            if failed_hosts.contains(&host_key) {
                errors.push((key, Error::DataError("owning host's SMP flush failed".into())));
            } else if let Some(device) = self.devices.get_mut(&key) {
                rearm(device);
            }
        }
        for (key, enclosure_id) in staged_encl_keys {
            if failed_enclosures.contains(&enclosure_id) {
                errors.push((key, Error::DataError("owning enclosure's SES flush failed".into())));
            } else if let Some(device) = self.devices.get_mut(&key) {
                rearm(device);
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_core::{AmdInterface, BlockDevice, ControllerKind, ProbeFilter};
    use bayled_sysenv::mock::MockSysEnv;
    use bayled_sysenv::IpmiReply;
    use std::path::PathBuf;

    #[test]
    fn amd_ipmi_bay_validates_backplane_once_before_first_set() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply { completion_code: 0, data: vec![0x98] });

        let mut engine = Engine::new(ProbeFilter::default());
        engine.controllers.push(Controller::new(
            PathBuf::from("/sys/bus/pci/devices/0000:05:00.0"),
            ControllerKind::Amd { interface: AmdInterface::Ipmi },
        ));
        let key = PathBuf::from("/sys/block/sda");
        let mut device = BlockDevice::new(
            key.clone(),
            PathBuf::from("/dev/sda"),
            ControllerId(0),
            ControlPath::AmdIpmiBay { bay_path: PathBuf::from("/sys/block/sda") },
        );
        device.current = Pattern::Locate;
        engine.devices.insert(key.clone(), device);

        let errors = engine.flush(&sysenv);
        assert!(errors.is_empty(), "{errors:?}");
        // validate_backplane_for, set's status read, set's write.
        assert_eq!(sysenv.log().ipmi_calls.len(), 3);
        assert!(engine.amd_backplane_validated.contains(&ControllerId(0)));

        // A second set on the same controller skips re-validation.
        engine.devices.get_mut(&key).unwrap().previous = Pattern::Locate;
        engine.devices.get_mut(&key).unwrap().current = Pattern::Normal;
        engine.flush(&sysenv);
        assert_eq!(sysenv.log().ipmi_calls.len(), 5);
    }
}
