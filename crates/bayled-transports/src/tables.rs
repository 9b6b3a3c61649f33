//! Pattern→encoding tables, one per transport (`spec.md` §4.4).
//!
//! Every table is a pure function from [`Pattern`] to a transport-specific
//! raw value plus an `Unknown` sentinel; lookups never fail, so a caller can
//! report "controller doesn't support `<pattern>`" without a hard error.

use bayled_core::Pattern;

/// AHCI `em_message` 32-bit command words (`spec.md` §4.5, §6).
#[must_use]
pub fn ahci_command(pattern: Pattern) -> Option<u32> {
    match pattern {
        Pattern::Normal | Pattern::OneshotNormal | Pattern::LocateOff => Some(0x0000_0000),
        Pattern::Rebuild => Some(0x0048_0000),
        Pattern::FailedDrive | Pattern::FailedArray | Pattern::Pfa => Some(0x0040_0000),
        Pattern::Locate => Some(0x0008_0000),
        _ => None,
    }
}

/// VMD PCIe hotplug `attention` nibble (`spec.md` §4.9).
#[must_use]
pub fn vmd_attention(pattern: Pattern) -> Option<u8> {
    match pattern {
        Pattern::Normal | Pattern::OneshotNormal | Pattern::LocateOff => Some(0xF),
        Pattern::Locate => Some(0x7),
        Pattern::Rebuild => Some(0x5),
        Pattern::FailedDrive => Some(0xD),
        _ => None,
    }
}

/// NPEM control register bit, excluding the `ENABLE` bit every write also sets
/// (`spec.md` §6).
#[must_use]
pub fn npem_control_bit(pattern: Pattern) -> Option<u32> {
    match pattern {
        Pattern::Normal | Pattern::OneshotNormal | Pattern::LocateOff => Some(0x4), // OK
        Pattern::Locate => Some(0x8),
        Pattern::FailedDrive => Some(0x10),
        Pattern::Rebuild => Some(0x20),
        Pattern::Pfa => Some(0x40),
        Pattern::HotSpare => Some(0x80),
        Pattern::Degraded => Some(0x100), // CRA: critical array
        Pattern::FailedArray => Some(0x200), // FA: failed array
        _ => None,
    }
}

/// SFF-8489 activity phase values used by the SMP/isci encodings (`spec.md` §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivityPhase {
    On = 0b000,
    Off = 0b001,
    Freq4Hz = 0b010,
    InverseFreq4Hz = 0b011,
    EndOfFlash = 0b100,
    StartOfFlash = 0b101,
    Freq2Hz = 0b110,
    InverseFreq2Hz = 0b111,
}

/// SFF-8489 `{error, locate, activity}` 3-field encoding for one phy/bay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sff8489 {
    pub error: u8,
    pub locate: u8,
    pub activity: u8,
}

/// SMP/isci pattern table: every pattern maps to an SFF-8489 triple
/// (`spec.md` §4.7).
#[must_use]
pub fn sff8489_encoding(pattern: Pattern) -> Option<Sff8489> {
    let activity = ActivityPhase::On as u8;
    let off = ActivityPhase::Off as u8;
    Some(match pattern {
        Pattern::Normal | Pattern::OneshotNormal | Pattern::LocateOff => Sff8489 {
            error: 0,
            locate: 0,
            activity: off,
        },
        Pattern::Locate => Sff8489 {
            error: 0,
            locate: 1,
            activity,
        },
        Pattern::FailedDrive | Pattern::FailedArray | Pattern::Pfa => Sff8489 {
            error: 0x2,
            locate: 0,
            activity,
        },
        Pattern::Rebuild => Sff8489 {
            error: 0x2,
            locate: 0,
            activity: ActivityPhase::Freq2Hz as u8,
        },
        Pattern::HotSpare | Pattern::Degraded => Sff8489 {
            error: 0x1,
            locate: 0,
            activity,
        },
        Pattern::LocateAndFail => Sff8489 {
            error: 0x2,
            locate: 1,
            activity,
        },
        _ => return None,
    })
}

/// Dell OEM IPMI 16-bit state mask bit flags (`spec.md` §4.10).
#[must_use]
pub fn dell_state_mask(pattern: Pattern) -> Option<u16> {
    const PRESENT: u16 = 0x1;
    const ONLINE: u16 = 0x2;
    const HOTSPARE: u16 = 0x4;
    const IDENTIFY: u16 = 0x8;
    const REBUILDING: u16 = 0x10;
    const FAULT: u16 = 0x20;
    const PREDICT: u16 = 0x40;
    const CRITICALARRAY: u16 = 0x80;
    const FAILEDARRAY: u16 = 0x100;

    Some(match pattern {
        Pattern::Normal | Pattern::OneshotNormal | Pattern::LocateOff => PRESENT | ONLINE,
        Pattern::Locate => PRESENT | ONLINE | IDENTIFY,
        Pattern::Rebuild => PRESENT | ONLINE | REBUILDING,
        Pattern::FailedDrive => PRESENT | FAULT,
        Pattern::Pfa => PRESENT | ONLINE | PREDICT,
        Pattern::HotSpare => PRESENT | ONLINE | HOTSPARE,
        Pattern::Degraded => PRESENT | ONLINE | CRITICALARRAY,
        Pattern::FailedArray => PRESENT | ONLINE | FAILEDARRAY,
        _ => return None,
    })
}

/// AMD IPMI drive-bay state bits (`spec.md` §4.12); a `Normal` transition
/// clears all of them, `LocateOff` clears only `LOCATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AmdIpmiBit {
    Pfa = 0x41,
    Locate = 0x42,
    Failed = 0x44,
    FailedArray = 0x45,
    Rebuild = 0x46,
    HotSpare = 0x47,
}

/// Maps a pattern to the AMD IPMI bit it lights, if any.
#[must_use]
pub fn amd_ipmi_bit(pattern: Pattern) -> Option<AmdIpmiBit> {
    match pattern {
        Pattern::Pfa => Some(AmdIpmiBit::Pfa),
        Pattern::Locate => Some(AmdIpmiBit::Locate),
        Pattern::FailedDrive => Some(AmdIpmiBit::Failed),
        Pattern::FailedArray => Some(AmdIpmiBit::FailedArray),
        Pattern::Rebuild => Some(AmdIpmiBit::Rebuild),
        Pattern::HotSpare => Some(AmdIpmiBit::HotSpare),
        _ => None,
    }
}

/// The IBPI pattern identifier tagged onto the AMD SGPIO blink-generator
/// cache (`spec.md` §4.11, §8 scenario S6: `REBUILD` tags generator `0x07`).
/// Distinct from [`sff8489_encoding`]'s `{error, locate, activity}` triple —
/// this value only distinguishes *which* pattern currently owns a
/// generator, not the bits written to the transmit register.
#[must_use]
pub fn ibpi_pattern_code(pattern: Pattern) -> Option<u8> {
    match pattern {
        Pattern::None_ => Some(0x00),
        Pattern::Normal => Some(0x01),
        Pattern::OneshotNormal => Some(0x02),
        Pattern::Degraded => Some(0x03),
        Pattern::HotSpare => Some(0x04),
        Pattern::Pfa => Some(0x05),
        Pattern::FailedArray => Some(0x06),
        Pattern::Rebuild => Some(0x07),
        Pattern::FailedDrive => Some(0x08),
        Pattern::Locate => Some(0x09),
        Pattern::LocateOff => Some(0x0a),
        Pattern::Added => Some(0x0b),
        Pattern::Removed => Some(0x0c),
        Pattern::LocateAndFail => Some(0x0d),
        Pattern::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ahci_locate_is_bit_0x80000() {
        assert_eq!(ahci_command(Pattern::Locate), Some(0x0008_0000));
    }

    #[test]
    fn vmd_locate_off_is_0xf() {
        assert_eq!(vmd_attention(Pattern::LocateOff), Some(0xF));
    }

    #[test]
    fn npem_fail_and_ok_bits() {
        assert_eq!(npem_control_bit(Pattern::Normal), Some(0x4));
        assert_eq!(npem_control_bit(Pattern::FailedDrive), Some(0x10));
    }

    #[test]
    fn unrepresentable_pattern_is_none() {
        assert_eq!(ahci_command(Pattern::Added), None);
        assert_eq!(npem_control_bit(Pattern::Unknown), None);
    }

    #[test]
    fn dell_normal_is_present_online() {
        assert_eq!(dell_state_mask(Pattern::Normal), Some(0x1 | 0x2));
    }
}
