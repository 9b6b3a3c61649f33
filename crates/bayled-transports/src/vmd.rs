//! VMD transport: PCIe hotplug `attention` sysfs attribute (`spec.md` §4.9).

use std::path::Path;

use bayled_core::{Error, Pattern};
use bayled_sysenv::SysEnv;

use crate::tables;

/// Writes the `attention` nibble for `current` if it differs from
/// `previous`. `slot_dir` is the matched `/sys/bus/pci/slots/*` directory.
pub fn set(
    sysenv: &impl SysEnv,
    slot_dir: &Path,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    let nibble = tables::vmd_attention(current).ok_or_else(|| Error::invalid_state(current))?;
    sysenv.write_attr(&slot_dir.join("attention"), &nibble.to_string())?;
    Ok(true)
}

/// Reads back the `attention` attribute as a byte.
pub fn get_attention(sysenv: &impl SysEnv, slot_dir: &Path) -> Result<u8, Error> {
    let raw = sysenv.read_attr(&slot_dir.join("attention"))?;
    raw.trim()
        .parse()
        .map_err(|_| Error::DataError(format!("non-numeric attention value {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_sysenv::mock::MockSysEnv;
    use std::path::PathBuf;

    fn slot() -> PathBuf {
        PathBuf::from("/sys/bus/pci/slots/3")
    }

    /// Scenario S4: `attention=0x5` then `set(LOCATE_OFF)` writes `15`.
    #[test]
    fn scenario_s4_locate_off_writes_15() {
        let sysenv = MockSysEnv::new();
        sysenv.set_attr(slot().join("attention"), "5");
        let wrote = set(&sysenv, &slot(), Pattern::Locate, Pattern::LocateOff).unwrap();
        assert!(wrote);
        assert_eq!(get_attention(&sysenv, &slot()).unwrap(), 15);
    }

    #[test]
    fn repeat_set_is_a_no_op() {
        let sysenv = MockSysEnv::new();
        set(&sysenv, &slot(), Pattern::Normal, Pattern::Locate).unwrap();
        let wrote_again = set(&sysenv, &slot(), Pattern::Locate, Pattern::Locate).unwrap();
        assert!(!wrote_again);
        assert_eq!(sysenv.log().attr_writes.len(), 1);
    }
}
