//! NPEM transport: PCIe Native Enclosure Management extended capability
//! registers (`spec.md` §4.8, §6), grounded on the teacher's PCI
//! config-space accessors (`kernel/hadron-drivers/src/pci`).

use std::path::Path;
use std::time::{Duration, Instant};

use bayled_core::{Error, Pattern};
use bayled_sysenv::SysEnv;

use crate::tables;

/// Register offsets relative to the capability's base offset in config
/// space, per `spec.md` §6 (`CAP_REG=+4, CTRL_REG=+8, STATUS_REG=+12`).
const CAP_REG_OFFSET: u16 = 4;
const CTRL_REG_OFFSET: u16 = 8;
const STATUS_REG_OFFSET: u16 = 12;
const ENABLE: u32 = 0x1;
const RESERVED_MASK: u32 = 0xffff_f000;
const COMMAND_COMPLETED: u32 = 0x1;
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn read_u32(sysenv: &impl SysEnv, pci_path: &Path, cap_offset: u16, reg_offset: u16) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    sysenv.pci_config_read(pci_path, cap_offset + reg_offset, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u32(sysenv: &impl SysEnv, pci_path: &Path, cap_offset: u16, reg_offset: u16, value: u32) -> Result<(), Error> {
    sysenv.pci_config_write(pci_path, cap_offset + reg_offset, &value.to_le_bytes())?;
    Ok(())
}

/// Polls the status register's Command-Completed bit for up to 1 s; gives
/// up silently if it never sets (`spec.md` §5, "software may issue the next
/// command anyway").
fn wait_command_completed(sysenv: &impl SysEnv, pci_path: &Path, cap_offset: u16) {
    let deadline = Instant::now() + POLL_TIMEOUT;
    while Instant::now() < deadline {
        if let Ok(status) = read_u32(sysenv, pci_path, cap_offset, STATUS_REG_OFFSET) {
            if status & COMMAND_COMPLETED != 0 {
                return;
            }
        }
        sysenv.sleep(POLL_INTERVAL);
    }
}

/// Sets `pattern` on the NPEM capability found at `cap_offset` in `pci_path`'s
/// config space, if it differs from `previous`. Rejects patterns the
/// capability register doesn't advertise.
pub fn set(
    sysenv: &impl SysEnv,
    pci_path: &Path,
    cap_offset: u16,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let bit = tables::npem_control_bit(current).ok_or_else(|| Error::invalid_state(current))?;

    let capable = read_u32(sysenv, pci_path, cap_offset, CAP_REG_OFFSET)?;
    if capable & bit == 0 {
        return Err(Error::not_supported(current));
    }

    wait_command_completed(sysenv, pci_path, cap_offset);

    let existing = read_u32(sysenv, pci_path, cap_offset, CTRL_REG_OFFSET)?;
    let new_value = (existing & RESERVED_MASK) | ENABLE | bit;
    write_u32(sysenv, pci_path, cap_offset, CTRL_REG_OFFSET, new_value)?;
    Ok(true)
}

/// Decodes the control register into the [`Pattern`] it currently reflects,
/// by matching the lit state bit.
pub fn get_state(sysenv: &impl SysEnv, pci_path: &Path, cap_offset: u16) -> Result<Pattern, Error> {
    let ctrl = read_u32(sysenv, pci_path, cap_offset, CTRL_REG_OFFSET)?;
    for &pattern in bayled_core::Pattern::ALL {
        if let Some(bit) = tables::npem_control_bit(pattern) {
            if ctrl & bit != 0 {
                return Ok(pattern);
            }
        }
    }
    Ok(Pattern::Unknown)
}
