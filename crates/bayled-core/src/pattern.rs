//! The vendor-neutral IBPI pattern enumeration and the raw SES-2 status codes.

use std::fmt;

/// A vendor-neutral drive-bay status indicator pattern.
///
/// This is the vocabulary every transport translates into its own wire
/// encoding (`SPEC_FULL.md` §4.4). `Unknown` is the sentinel a lookup falls
/// through to when a pattern has no encoding on a given transport; `None_`
/// is a drive's initial state before any pattern has ever been set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Sentinel: pattern not representable / not yet determined.
    Unknown,
    /// Sentinel: no pattern has been set on this device yet.
    None_,
    /// Drive is healthy and in normal service.
    Normal,
    /// Like [`Pattern::Normal`], but re-arms so a later `Normal` re-fires once.
    OneshotNormal,
    /// Array is running in a degraded (non-redundant) state.
    Degraded,
    /// Drive is a hot spare.
    HotSpare,
    /// Array rebuild is in progress on this drive.
    Rebuild,
    /// The array this drive belongs to has failed entirely.
    FailedArray,
    /// Predictive Failure Analysis: drive is expected to fail soon.
    Pfa,
    /// Drive has failed and must be replaced.
    FailedDrive,
    /// Operator locate request: blink/light the indicator.
    Locate,
    /// Clear a previous [`Pattern::Locate`].
    LocateOff,
    /// Drive was just added/inserted.
    Added,
    /// Drive was just removed.
    Removed,
    /// Combined locate + fail indication.
    LocateAndFail,
}

impl Pattern {
    /// All patterns a caller can request via [`Pattern::try_from`]/the slot API.
    pub const ALL: &'static [Pattern] = &[
        Pattern::Unknown,
        Pattern::None_,
        Pattern::Normal,
        Pattern::OneshotNormal,
        Pattern::Degraded,
        Pattern::HotSpare,
        Pattern::Rebuild,
        Pattern::FailedArray,
        Pattern::Pfa,
        Pattern::FailedDrive,
        Pattern::Locate,
        Pattern::LocateOff,
        Pattern::Added,
        Pattern::Removed,
        Pattern::LocateAndFail,
    ];

    /// Lower-kebab name, used both for [`fmt::Display`] and round-tripped by
    /// [`Pattern::try_from`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Pattern::Unknown => "unknown",
            Pattern::None_ => "none",
            Pattern::Normal => "normal",
            Pattern::OneshotNormal => "oneshot-normal",
            Pattern::Degraded => "degraded",
            Pattern::HotSpare => "hotspare",
            Pattern::Rebuild => "rebuild",
            Pattern::FailedArray => "failed-array",
            Pattern::Pfa => "pfa",
            Pattern::FailedDrive => "failed-drive",
            Pattern::Locate => "locate",
            Pattern::LocateOff => "locate-off",
            Pattern::Added => "added",
            Pattern::Removed => "removed",
            Pattern::LocateAndFail => "locate-and-fail",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<&str> for Pattern {
    type Error = crate::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Pattern::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| crate::Error::invalid_state(value))
    }
}

/// Raw SES-2 element status codes (T10 SES-2 table 21/24), used internally
/// by the SES transport to derive a [`Pattern`] from page-2 control bits and
/// vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ses2Code {
    /// Rebuild/remap aborted.
    Abort,
    /// Rebuild/remap in progress.
    Rebuild,
    /// In-failed-array.
    Ifa,
    /// In-critical-array.
    Ica,
    /// Consistency check in progress.
    ConsCheck,
    /// Hot spare.
    HotSpare,
    /// Reserved device.
    RsvdDev,
    /// OK / no fault.
    Ok,
    /// Identify (locate).
    Ident,
    /// Remove.
    Rm,
    /// Insert.
    Ins,
    /// Missing.
    Missing,
    /// Do Not Remove.
    Dnr,
    /// Active.
    Active,
    /// Enable Bypass B.
    EnBb,
    /// Enable Bypass A.
    EnBa,
    /// Device Off.
    DevOff,
    /// Fault.
    Fault,
    /// Predicted failure.
    Prdfail,
    /// Combined identify + fault.
    IdentAndFault,
}
