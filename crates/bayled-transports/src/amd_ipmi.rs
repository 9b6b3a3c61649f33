//! AMD IPMI transport: MG9098 backplane controller register access over
//! OEM IPMI (`spec.md` §4.12).

use bayled_core::{Error, Pattern};
use bayled_sysenv::{IpmiReply, IpmiRequest, SysEnv};

use crate::tables::{self, AmdIpmiBit};

const NETFN_AMD_OEM: u8 = 0x06;
const CMD_DRIVE_STATUS: u8 = 0x52;

const REG_VALIDATE: u8 = 0x63;
const MG9098_ID: u8 = 0x98;

const BIT_SMBUS_CONTROL: u8 = 0x3c;
const ALL_STATE_BITS: u8 = AmdIpmiBit::Pfa as u8
    | AmdIpmiBit::Locate as u8
    | AmdIpmiBit::Failed as u8
    | AmdIpmiBit::FailedArray as u8
    | AmdIpmiBit::Rebuild as u8
    | AmdIpmiBit::HotSpare as u8;

/// Which backplane tail address to target, and whether the bay is NVMe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayKind {
    SataLow,  // bays 1-8
    SataHigh, // bays 9-16
    Nvme,
}

/// DaytonaX tail-address derivation (`spec.md` §4.12).
fn daytonax_tail_address(kind: BayKind) -> u8 {
    match kind {
        BayKind::SataLow => 0xc0,
        BayKind::SataHigh => 0xc2,
        BayKind::Nvme => 0xc4,
    }
}

fn issue(sysenv: &impl SysEnv, channel: u8, tail: u8, data: Vec<u8>) -> Result<IpmiReply, Error> {
    let mut payload = vec![channel, tail];
    payload.extend(data);
    let reply = sysenv.ipmi_command(&IpmiRequest {
        netfn: NETFN_AMD_OEM,
        cmd: CMD_DRIVE_STATUS,
        data: payload,
    })?;
    if !reply.ok() {
        return Err(Error::DataError(format!(
            "AMD drive-status command failed: completion code {:#04x}",
            reply.completion_code
        )));
    }
    Ok(reply)
}

/// Reads register 0x63 and confirms it reads back `0x98`, validating the
/// backplane controller is an MG9098.
pub fn validate_backplane(sysenv: &impl SysEnv, channel: u8, tail: u8) -> Result<(), Error> {
    let reply = issue(sysenv, channel, tail, vec![REG_VALIDATE])?;
    match reply.data.first() {
        Some(&MG9098_ID) => Ok(()),
        _ => Err(Error::DataError("backplane controller is not an MG9098".into())),
    }
}

/// [`validate_backplane`] with the same tail-address derivation `set` uses.
/// Dispatch calls this once per controller (`spec.md` §4.12) before the
/// first write, caching success so later `set` calls skip it.
pub fn validate_backplane_for(sysenv: &impl SysEnv, kind: BayKind, channel: u8) -> Result<(), Error> {
    validate_backplane(sysenv, channel, daytonax_tail_address(kind))
}

/// Reads, modifies, and writes back the drive-bay status register: clears
/// all six state bits on `NORMAL`, clears only `LOCATE` on `LOCATE_OFF`,
/// otherwise ORs in the bit for `current` and toggles the SMBUS-control bit
/// once.
pub fn set(
    sysenv: &impl SysEnv,
    kind: BayKind,
    channel: u8,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let tail = daytonax_tail_address(kind);

    let read_reply = issue(sysenv, channel, tail, vec![0x00])?;
    let mut status = read_reply.data.first().copied().unwrap_or(0);

    match current {
        Pattern::Normal | Pattern::OneshotNormal | Pattern::None_ => {
            status &= !ALL_STATE_BITS;
        }
        Pattern::LocateOff => status &= !(AmdIpmiBit::Locate as u8),
        other => {
            let bit = tables::amd_ipmi_bit(other).ok_or_else(|| Error::invalid_state(other))?;
            status |= bit as u8;
            status ^= BIT_SMBUS_CONTROL;
        }
    }

    issue(sysenv, channel, tail, vec![0x01, status])?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_sysenv::mock::MockSysEnv;

    #[test]
    fn validates_mg9098_backplane() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![MG9098_ID],
        });
        validate_backplane(&sysenv, 0, 0xc0).unwrap();
    }

    #[test]
    fn wrong_backplane_id_is_data_error() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![0x12],
        });
        let err = validate_backplane(&sysenv, 0, 0xc0).unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn set_locate_toggles_smbus_control_bit() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![0x00],
        });
        let wrote = set(&sysenv, BayKind::SataLow, 0, Pattern::Normal, Pattern::Locate).unwrap();
        assert!(wrote);
        let calls = sysenv.log().ipmi_calls;
        let write = &calls[1];
        assert_eq!(write.data[2], 0x01); // write sub-command
        assert_eq!(write.data[3], AmdIpmiBit::Locate as u8 ^ BIT_SMBUS_CONTROL);
    }

    #[test]
    fn set_normal_clears_all_state_bits() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![AmdIpmiBit::Locate as u8 | AmdIpmiBit::Rebuild as u8],
        });
        set(&sysenv, BayKind::Nvme, 1, Pattern::Rebuild, Pattern::Normal).unwrap();
        let calls = sysenv.log().ipmi_calls;
        let write = &calls[1];
        assert_eq!(write.data[3], 0);
        assert_eq!(write.data[1], 0xc4); // NVMe tail address
    }

    #[test]
    fn locate_off_clears_only_locate_bit() {
        let sysenv = MockSysEnv::new();
        sysenv.set_ipmi_reply(IpmiReply {
            completion_code: 0,
            data: vec![AmdIpmiBit::Locate as u8 | AmdIpmiBit::Rebuild as u8],
        });
        set(&sysenv, BayKind::SataHigh, 2, Pattern::Locate, Pattern::LocateOff).unwrap();
        let calls = sysenv.log().ipmi_calls;
        assert_eq!(calls[1].data[3], AmdIpmiBit::Rebuild as u8);
        assert_eq!(calls[1].data[1], 0xc2); // bays 9-16 tail address
    }

    #[test]
    fn repeat_set_is_a_no_op() {
        let sysenv = MockSysEnv::new();
        let wrote = set(&sysenv, BayKind::SataLow, 0, Pattern::Normal, Pattern::Normal).unwrap();
        assert!(!wrote);
        assert!(sysenv.log().ipmi_calls.is_empty());
    }
}
