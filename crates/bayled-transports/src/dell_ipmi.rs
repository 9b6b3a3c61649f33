//! Dell OEM IPMI transport: iDRAC generation discovery, PCI BDF → bay:slot,
//! and the 12-byte set-drive-status payload (`spec.md` §4.10, §6, §9 Open
//! Question 3).

use bayled_core::{Error, Pattern};
use bayled_sysenv::{IpmiRequest, SysEnv};

use crate::tables;

const NETFN_DELL_OEM: u8 = 0x30;
const CMD_DELL_OEM: u8 = 0xd5;

/// iDRAC generation, used to pick the sub-command pair (`spec.md` §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// 12G: monolithic.
    Gen12,
    /// 13G.
    Gen13,
    /// 14G and later; per Open Question 3, the opcode differs but the
    /// payload layout has not been validated on real 14G hardware.
    Gen14Plus,
}

impl Generation {
    fn sub_commands(self) -> (u8, u8) {
        match self {
            Generation::Gen12 => (0x07, 0x04),
            Generation::Gen13 => (0x17, 0x14),
            Generation::Gen14Plus => (0x37, 0x34),
        }
    }
}

/// Queries `GetIdracInfo` and maps the returned generation byte.
pub fn query_generation(sysenv: &impl SysEnv) -> Result<Generation, Error> {
    let reply = sysenv.ipmi_command(&IpmiRequest {
        netfn: NETFN_DELL_OEM,
        cmd: CMD_DELL_OEM,
        data: vec![0x20], // GetIdracInfo sub-command
    })?;
    if !reply.ok() {
        return Err(Error::DataError(format!(
            "GetIdracInfo failed: completion code {:#04x}",
            reply.completion_code
        )));
    }
    match reply.data.first() {
        Some(0x0c | 0x0d) => Ok(Generation::Gen12),
        Some(0x10 | 0x11 | 0x20 | 0x21) => Ok(Generation::Gen13),
        Some(g) if *g >= 0x30 => Ok(Generation::Gen14Plus),
        _ => Err(Error::DataError("unrecognized iDRAC generation byte".into())),
    }
}

/// Translates a PCI B:D.F address into a `(bay, slot)` pair via the
/// generation's get-drive-map sub-command.
pub fn resolve_bay_slot(
    sysenv: &impl SysEnv,
    generation: Generation,
    pci_bdf: &str,
) -> Result<(u8, u8), Error> {
    let (get_map, _set_status) = generation.sub_commands();
    let mut data = vec![get_map];
    data.extend_from_slice(pci_bdf.as_bytes());
    let reply = sysenv.ipmi_command(&IpmiRequest {
        netfn: NETFN_DELL_OEM,
        cmd: CMD_DELL_OEM,
        data,
    })?;
    if !reply.ok() || reply.data.len() < 2 {
        return Err(Error::DataError("get-drive-map reply malformed".into()));
    }
    Ok((reply.data[0], reply.data[1]))
}

/// Issues the 12-byte set-drive-status payload for `(bay, slot)` if
/// `current` differs from `previous`.
pub fn set(
    sysenv: &impl SysEnv,
    generation: Generation,
    bay: u8,
    slot: u8,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let mask = tables::dell_state_mask(current).ok_or_else(|| Error::invalid_state(current))?;
    let (_get_map, set_status) = generation.sub_commands();

    let mut payload = vec![0u8; 12];
    payload[0] = set_status;
    payload[1] = bay;
    payload[2] = slot;
    payload[3] = (mask & 0xff) as u8;
    payload[4] = (mask >> 8) as u8;

    let reply = sysenv.ipmi_command(&IpmiRequest {
        netfn: NETFN_DELL_OEM,
        cmd: CMD_DELL_OEM,
        data: payload,
    })?;
    if !reply.ok() {
        return Err(Error::DataError(format!(
            "set-drive-status failed: completion code {:#04x}",
            reply.completion_code
        )));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_sysenv::mock::MockSysEnv;
    use bayled_sysenv::IpmiReply;

    /// Scenario S5: generation 0x20 (13G) → `set(NORMAL)` issues
    /// `D5/0x17` (get map) then `D5/0x14` (set status) with state LSB=0x2.
    #[test]
    fn scenario_s5_normal_on_13g() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![0x20],
        });
        let generation = query_generation(&sysenv).unwrap();
        assert_eq!(generation, Generation::Gen13);

        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![3, 1],
        });
        let (bay, slot) = resolve_bay_slot(&sysenv, generation, "0000:05:00.0").unwrap();
        assert_eq!((bay, slot), (3, 1));

        sysenv.set_ipmi_reply(IpmiReply::default());
        let wrote = set(&sysenv, generation, bay, slot, Pattern::Locate, Pattern::Normal).unwrap();
        assert!(wrote);

        let calls = sysenv.log().ipmi_calls;
        assert_eq!(calls[1].data[0], 0x17);
        assert_eq!(calls[2].data[0], 0x14);
        assert_eq!(calls[2].data[3], 0x2); // PRESENT | ONLINE
    }

    #[test]
    fn repeat_set_is_a_no_op() {
        let sysenv = MockSysEnv::new();
        let wrote = set(&sysenv, Generation::Gen13, 1, 1, Pattern::Normal, Pattern::Normal).unwrap();
        assert!(!wrote);
        assert!(sysenv.log().ipmi_calls.is_empty());
    }
}
