//! SCSI SMP transport: per-host IBPI staging plus the SMP write-GPIO frame
//! (`spec.md` §4.7, §6), grounded on the teacher's command-frame builders
//! (`kernel/hadron-drivers/src/ahci/command.rs`).

use std::path::Path;

use bayled_core::{Error, Host, Pattern};
use bayled_sysenv::{SgDirection, SgIoRequest, SysEnv};

use crate::tables::{self, Sff8489};

/// SMP register types (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterType {
    Cfg = 0,
    Rx = 1,
    RxGp = 2,
    Tx = 3,
    TxGp = 4,
}

const FRAME_TYPE_REQUEST: u8 = 0x40;
const FUNCTION_WRITE_GPIO: u8 = 0x82;
const FRAME_TYPE_RESPONSE: u8 = 0x41;

/// Stages `current`'s SFF-8489 encoding into `phy_index`'s 4-byte slot and
/// sets the host's dirty flag, unless `previous == current`.
pub fn set(host: &Host, phy_index: u8, previous: Pattern, current: Pattern) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let _encoding = tables::sff8489_encoding(current).ok_or_else(|| Error::invalid_state(current))?;
    let mut staging = host.staging.borrow_mut();
    let slot = staging
        .get_mut(phy_index as usize)
        .ok_or_else(|| Error::DataError(format!("phy {phy_index} out of range for host {}", host.id)))?;
    *slot = current;
    drop(staging);
    *host.dirty.borrow_mut() = true;
    Ok(true)
}

/// Stages `current` into the isci direct-attached 4-byte SFF-8485 GPIO_TX\[1\]
/// bitstream at `phy_index`'s 3-bit offset (`spec.md` §4.7).
pub fn set_isci(host: &Host, phy_index: u8, previous: Pattern, current: Pattern) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let encoding = tables::sff8489_encoding(current).ok_or_else(|| Error::invalid_state(current))?;
    let isci = host
        .isci
        .as_ref()
        .ok_or_else(|| Error::not_supported("isci staging (host has no isci controller)"))?;
    let mut staging = isci.borrow_mut();
    write_gpio_tx1_bits(&mut staging.bitstream, phy_index, encoding);
    staging.dirty = true;
    Ok(true)
}

/// Packs one `{error, locate, activity}` bit triple into the 4-byte
/// GPIO_TX\[1\] bitstream at `od = phy_index * 3` (`spec.md` §4.7): three
/// consecutive bits per phy, one flag each, counted from the MSB.
fn write_gpio_tx1_bits(bitstream: &mut [u8; 4], phy_index: u8, encoding: Sff8489) {
    let packed: u32 = (u32::from(encoding.error != 0) << 2)
        | (u32::from(encoding.locate != 0) << 1)
        | u32::from(encoding.activity != tables::ActivityPhase::Off as u8);
    let bit_offset = u32::from(phy_index) * 3;
    let Some(shift) = 29u32.checked_sub(bit_offset) else {
        return; // phy index past the bitstream's 10-phy capacity; no-op.
    };
    let value = u32::from_be_bytes(*bitstream);
    let mask = 0x7u32 << shift;
    let value = (value & !mask) | ((packed << shift) & mask);
    *bitstream = value.to_be_bytes();
}

fn build_frame(reg_type: RegisterType, reg_index: u8, data: &[u8]) -> Vec<u8> {
    let reg_count = (data.len() / 4) as u8;
    let mut frame = vec![
        FRAME_TYPE_REQUEST,
        FUNCTION_WRITE_GPIO,
        reg_type as u8,
        reg_index,
        reg_count,
        0,
        0,
        0,
    ];
    frame.extend_from_slice(data);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

fn issue_frame(sysenv: &impl SysEnv, host_bsg: &Path, frame: Vec<u8>) -> Result<(), Error> {
    let request = SgIoRequest {
        cdb: frame,
        direction: SgDirection::ToDevice,
        buffer: vec![0u8; 8],
        timeout_ms: 5000,
    };
    let reply = sysenv.sg_io(host_bsg, &request)?;
    if reply.buffer.first().copied() != Some(FRAME_TYPE_RESPONSE) {
        return Err(Error::DataError("SMP write-GPIO reply had unexpected frame type".into()));
    }
    Ok(())
}

/// Flushes a dirty non-isci host: one TX register write per `ceil(ports/4)`
/// group (`spec.md` §4.7).
pub fn flush_host(sysenv: &impl SysEnv, host: &Host, host_bsg: &Path) -> Result<(), Error> {
    if !*host.dirty.borrow() {
        return Ok(());
    }
    let staging = host.staging.borrow();
    let mut data = Vec::with_capacity(staging.len() * 4);
    for &pattern in staging.iter() {
        let encoding = tables::sff8489_encoding(pattern).unwrap_or_default();
        data.extend_from_slice(&[encoding.error, encoding.locate, encoding.activity, 0]);
    }
    drop(staging);

    let reg_count = (host.phy_count as usize).div_ceil(4).max(1);
    for reg_index in 0..reg_count {
        let start = reg_index * 16;
        let end = (start + 16).min(data.len());
        let chunk = data.get(start..end).unwrap_or(&[]);
        let frame = build_frame(RegisterType::Tx, reg_index as u8, chunk);
        issue_frame(sysenv, host_bsg, frame)?;
    }
    *host.dirty.borrow_mut() = false;
    Ok(())
}

/// Flushes a dirty isci host's 4-byte GPIO_TX\[1\] bitstream as a single
/// `(TX_GP, index 1, count 1)` register write.
pub fn flush_isci_host(sysenv: &impl SysEnv, host: &Host, host_bsg: &Path) -> Result<(), Error> {
    let isci = host
        .isci
        .as_ref()
        .ok_or_else(|| Error::not_supported("isci staging (host has no isci controller)"))?;
    if !isci.borrow().dirty {
        return Ok(());
    }
    let bitstream = isci.borrow().bitstream;
    let frame = build_frame(RegisterType::TxGp, 1, &bitstream);
    issue_frame(sysenv, host_bsg, frame)?;
    isci.borrow_mut().dirty = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_sysenv::mock::MockSysEnv;
    use bayled_sysenv::SgIoReply;
    use std::path::PathBuf;

    fn bsg() -> PathBuf {
        PathBuf::from("/sys/class/scsi_host/host0/bsg/sas_host0")
    }

    #[test]
    fn set_marks_host_dirty_and_stages_pattern() {
        let host = Host::new(0, 8, false);
        let staged = set(&host, 2, Pattern::Normal, Pattern::Locate).unwrap();
        assert!(staged);
        assert!(*host.dirty.borrow());
        assert_eq!(host.staging.borrow()[2], Pattern::Locate);
    }

    #[test]
    fn flush_clean_host_issues_no_sg_io() {
        let host = Host::new(0, 4, false);
        let sysenv = MockSysEnv::new();
        flush_host(&sysenv, &host, &bsg()).unwrap();
        assert!(sysenv.log().sg_io_calls.is_empty());
    }

    #[test]
    fn flush_dirty_host_issues_expected_register_count() {
        let host = Host::new(0, 8, false);
        set(&host, 0, Pattern::Normal, Pattern::Locate).unwrap();
        let sysenv = MockSysEnv::new();
        sysenv.set_sg_io_reply(SgIoReply {
            buffer: vec![FRAME_TYPE_RESPONSE, FUNCTION_WRITE_GPIO, 0, 0],
            status: 0,
            host_status: 0,
            driver_status: 0,
        });
        flush_host(&sysenv, &host, &bsg()).unwrap();
        assert_eq!(sysenv.log().sg_io_calls.len(), 2); // ceil(8/4) = 2
        assert!(!*host.dirty.borrow());
    }

    #[test]
    fn isci_bitstream_packs_three_bits_per_phy() {
        let host = Host::new(0, 4, true);
        set_isci(&host, 1, Pattern::Normal, Pattern::Locate).unwrap();
        assert!(host.isci.as_ref().unwrap().borrow().dirty);
    }

    #[test]
    fn unexpected_reply_frame_type_is_data_error() {
        let host = Host::new(0, 4, false);
        set(&host, 0, Pattern::Normal, Pattern::Locate).unwrap();
        let sysenv = MockSysEnv::new();
        sysenv.set_sg_io_reply(SgIoReply {
            buffer: vec![0xff],
            status: 0,
            host_status: 0,
            driver_status: 0,
        });
        let err = flush_host(&sysenv, &host, &bsg()).unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }
}
