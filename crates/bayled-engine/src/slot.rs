//! The slot API: addresses LEDs by `(controller-kind, slot-id)` whether or
//! not a block device currently occupies the slot (`spec.md` §4.13/§13).

use std::path::PathBuf;

use bayled_core::{ControllerId, ControllerKind, EnclosureRef, Error, Pattern, SlotProperty, SlotTarget};
use bayled_sysenv::SysEnv;
use bayled_transports::{npem, vmd};

use crate::context::Engine;

impl Engine {
    /// Enumerates every addressable slot: NPEM controllers, VMD hotplug
    /// slots, and SES enclosure elements. Each entry carries the occupying
    /// block device's key and devnode (if any) and the pattern currently
    /// applied to the slot's transport (`spec.md` §6 slot enumeration).
    ///
    /// A slot whose current pattern can't be read is reported as
    /// [`Pattern::Unknown`] rather than failing the whole enumeration.
    pub fn slots<S: SysEnv>(&self, sysenv: &S) -> Vec<SlotProperty> {
        let mut out = Vec::new();

        for (index, controller) in self.controllers.iter().enumerate() {
            let controller_id = ControllerId(index as u32);
            let target = match &controller.kind {
                ControllerKind::Npem { .. } => Some(SlotTarget::Controller { controller: controller_id }),
                ControllerKind::Vmd { .. } => Some(SlotTarget::PciHotplug {
                    slot_address: controller.path.display().to_string(),
                }),
                _ => None,
            };
            let Some(target) = target else { continue };
            let occupant_device = self.occupant_of_controller(controller_id);
            let pattern = self.slot_get_state(sysenv, &target).unwrap_or(Pattern::Unknown);
            out.push(SlotProperty {
                slot_id: controller.path.display().to_string(),
                occupant: occupant_device.map(|d| d.sysfs_path.clone()),
                devnode: occupant_device.map(|d| d.devnode.clone()),
                pattern,
                target,
            });
        }

        for (&enclosure_id, enclosure) in &self.enclosures {
            for ses_slot in enclosure.slots() {
                let element_index = ses_slot.element_index;
                let slot_ref = EnclosureRef { enclosure: enclosure_id, element_index };
                let occupant_device = self.devices.values().find(|d| d.enclosure == Some(slot_ref));
                let target = SlotTarget::Enclosure { slot: slot_ref };
                let pattern = self.slot_get_state(sysenv, &target).unwrap_or(Pattern::Unknown);
                out.push(SlotProperty {
                    slot_id: format!("{}:{}", enclosure_id.0, element_index),
                    occupant: occupant_device.map(|d| d.sysfs_path.clone()),
                    devnode: occupant_device.map(|d| d.devnode.clone()),
                    pattern,
                    target,
                });
            }
        }

        out
    }

    fn occupant_of_controller(&self, controller_id: ControllerId) -> Option<&bayled_core::BlockDevice> {
        self.devices.values().find(|d| d.controller == controller_id)
    }

    /// Reads the pattern currently applied to a slot, independent of
    /// whether a block device occupies it.
    pub fn slot_get_state<S: SysEnv>(&self, sysenv: &S, target: &SlotTarget) -> Result<Pattern, Error> {
        match target {
            SlotTarget::Controller { controller } => {
                let controller = self.controller_by_id(*controller)?;
                let ControllerKind::Npem { cap_offset } = &controller.kind else {
                    return Err(Error::not_supported("controller slot is not NPEM"));
                };
                npem::get_state(sysenv, &controller.path, *cap_offset)
            }
            SlotTarget::PciHotplug { slot_address } => {
                let attention = vmd::get_attention(sysenv, &PathBuf::from(slot_address))?;
                Ok(attention_to_pattern(attention))
            }
            SlotTarget::Enclosure { slot } => {
                let enclosure = self
                    .enclosures
                    .get(&slot.enclosure)
                    .ok_or_else(|| Error::InvalidPath("unknown enclosure".into()))?;
                enclosure.get_state(slot.element_index)
            }
        }
    }

    /// Writes `pattern` directly to a slot's transport, bypassing the
    /// block-device `set`/`flush` staging cycle (`spec.md` §6 `slot_set`).
    /// Returns `true` if a hardware write was issued.
    pub fn slot_set<S: SysEnv>(&mut self, sysenv: &S, target: &SlotTarget, pattern: Pattern) -> Result<bool, Error> {
        match target {
            SlotTarget::Controller { controller } => {
                let controller_id = *controller;
                let previous = self.slot_get_state(sysenv, target)?;
                let controller = self.controller_by_id(controller_id)?;
                let ControllerKind::Npem { cap_offset } = &controller.kind else {
                    return Err(Error::not_supported("controller slot is not NPEM"));
                };
                npem::set(sysenv, &controller.path, *cap_offset, previous, pattern)
            }
            SlotTarget::PciHotplug { slot_address } => {
                let slot_dir = PathBuf::from(slot_address);
                let previous = self.slot_get_state(sysenv, target)?;
                vmd::set(sysenv, &slot_dir, previous, pattern)
            }
            SlotTarget::Enclosure { slot } => {
                let array_slot = true;
                let enclosure = self
                    .enclosures
                    .get_mut(&slot.enclosure)
                    .ok_or_else(|| Error::InvalidPath("unknown enclosure".into()))?;
                let previous = enclosure.get_state(slot.element_index)?;
                let staged = bayled_transports::ses::set(enclosure, slot.element_index, array_slot, previous, pattern)?;
                if staged {
                    bayled_transports::ses::flush(enclosure, sysenv)?;
                }
                Ok(staged)
            }
        }
    }

    fn controller_by_id(&self, id: ControllerId) -> Result<&bayled_core::Controller, Error> {
        self.controllers
            .get(id.0 as usize)
            .ok_or_else(|| Error::InvalidPath(format!("no such controller: {}", id.0)))
    }
}

fn attention_to_pattern(attention: u8) -> Pattern {
    match attention {
        0x7 => Pattern::Locate,
        0x5 => Pattern::Rebuild,
        0xd => Pattern::FailedDrive,
        0xf => Pattern::Normal,
        _ => Pattern::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_core::ProbeFilter;
    use bayled_sysenv::mock::MockSysEnv;
    use std::path::PathBuf;

    #[test]
    fn vmd_slot_state_round_trips_through_attention() {
        let sysenv = MockSysEnv::new();
        sysenv.set_attr("/sys/bus/pci/slots/3/attention", "5");
        let mut engine = Engine::new(ProbeFilter::default());
        engine.controllers.push(bayled_core::Controller::new(
            PathBuf::from("/sys/bus/pci/slots/3"),
            ControllerKind::Vmd { domain: "0000:80".into() },
        ));
        let target = SlotTarget::PciHotplug { slot_address: "/sys/bus/pci/slots/3".into() };
        assert_eq!(engine.slot_get_state(&sysenv, &target).unwrap(), Pattern::Rebuild);

        let wrote = engine.slot_set(&sysenv, &target, Pattern::LocateOff).unwrap();
        assert!(wrote);
        assert_eq!(engine.slot_get_state(&sysenv, &target).unwrap(), Pattern::Normal);
    }

    #[test]
    fn slots_lists_npem_controller_with_no_occupant() {
        let sysenv = MockSysEnv::new();
        let mut engine = Engine::new(ProbeFilter::default());
        engine.controllers.push(bayled_core::Controller::new(
            PathBuf::from("/sys/bus/pci/devices/0000:05:00.0"),
            ControllerKind::Npem { cap_offset: 0x100 },
        ));
        let slots = engine.slots(&sysenv);
        assert_eq!(slots.len(), 1);
        assert!(slots[0].occupant.is_none());
        assert!(slots[0].devnode.is_none());
        assert!(matches!(slots[0].target, SlotTarget::Controller { .. }));
    }

    #[test]
    fn slots_reports_unknown_pattern_when_state_unreadable() {
        let sysenv = MockSysEnv::new();
        let mut engine = Engine::new(ProbeFilter::default());
        engine
            .controllers
            .push(bayled_core::Controller::new(PathBuf::from("/sys/bus/pci/slots/9"), ControllerKind::Vmd { domain: "0000:90".into() }));
        let slots = engine.slots(&sysenv);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].pattern, Pattern::Unknown);
    }
}
