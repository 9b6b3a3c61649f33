//! SES transport: change-detection wrapper around [`bayled_enclosure::Enclosure`]'s
//! page-2 read-modify-write (`spec.md` §4.6).
//!
//! The byte-level encoding lives in `bayled-enclosure` since it owns the
//! page 2 buffer; this module only adds the `previous == current`
//! short-circuit every transport shares.

use bayled_core::{Error, Pattern};
use bayled_enclosure::Enclosure;
use bayled_sysenv::SysEnv;

/// Stages `current` for `element_index` if it differs from `previous`.
/// Returns `true` if an element was staged (hardware isn't touched until
/// [`flush`]).
pub fn set(
    enclosure: &mut Enclosure,
    element_index: u16,
    array_slot: bool,
    previous: Pattern,
    current: Pattern,
) -> Result<bool, Error> {
    if previous == current {
        return Ok(false);
    }
    enclosure.set_message(element_index, current, array_slot)?;
    Ok(true)
}

/// Sends the enclosure's accumulated page 2 changes via `SEND DIAGNOSTIC`
/// and reloads pages 1/2/10, per `spec.md` §4.6 and testable property 4.
pub fn flush(enclosure: &mut Enclosure, sysenv: &impl SysEnv) -> Result<(), Error> {
    enclosure.flush(sysenv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayled_sysenv::mock::MockSysEnv;
    use bayled_sysenv::SgIoReply;
    use std::path::PathBuf;

    fn loaded_enclosure(sysenv: &MockSysEnv) -> Enclosure {
        // MockSysEnv::sg_io ignores the CDB and returns the same buffer for
        // page 1, 2, and 10; 16 zero bytes parses cleanly (if emptily) as
        // all three.
        sysenv.set_sg_io_reply(SgIoReply {
            buffer: vec![0u8; 16],
            status: 0,
            host_status: 0,
            driver_status: 0,
        });
        Enclosure::load(sysenv, PathBuf::from("/dev/bsg/x")).unwrap()
    }

    #[test]
    fn unchanged_pattern_issues_no_stage() {
        let sysenv = MockSysEnv::new();
        let mut encl = loaded_enclosure(&sysenv);
        let staged = set(&mut encl, 0, true, Pattern::Normal, Pattern::Normal).unwrap();
        assert!(!staged);
        assert!(!encl.is_dirty());
    }

    #[test]
    fn changed_pattern_stages_then_flush_sends_diagnostic() {
        let sysenv = MockSysEnv::new();
        let mut encl = loaded_enclosure(&sysenv);
        let staged = set(&mut encl, 0, true, Pattern::Normal, Pattern::Rebuild).unwrap();
        assert!(staged);
        assert!(encl.is_dirty());

        flush(&mut encl, &sysenv).unwrap();
        assert!(!encl.is_dirty());
        assert!(sysenv.log().sg_io_calls.len() >= 4);
    }
}
