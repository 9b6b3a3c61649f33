//! AHCI SGPIO transport: a single 32-bit `em_message` command word
//! (`spec.md` §4.5), grounded on the teacher's AHCI port-register
//! read-modify-write style (`kernel/hadron-drivers/src/ahci/port.rs`).

use std::path::Path;
use std::time::Duration;

use bayled_core::{Error, Pattern};
use bayled_sysenv::SysEnv;

use crate::tables;

/// Required inter-write pacing: the message-transmit bit must clear before
/// the next write is accepted (`spec.md` §4.5, §5).
const EM_MESSAGE_PACING: Duration = Duration::from_micros(1500);

/// Writes `pattern` to `<control-path>/em_message` if it differs from
/// `previous`. Returns `true` if a hardware write was issued.
pub fn set(
    sysenv: &impl SysEnv,
    scsi_host_dir: &Path,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let command = tables::ahci_command(current).ok_or_else(|| Error::invalid_state(current))?;

    sysenv.sleep(EM_MESSAGE_PACING);
    let em_message = scsi_host_dir.join("em_message");
    sysenv.write_attr(&em_message, &command.to_string())?;
    Ok(true)
}
