//! Opaque configuration types (`SPEC_FULL.md` §4.15).
//!
//! Loading a config file is explicitly out of scope; this crate only
//! defines the shape an already-parsed configuration takes so an external
//! loader can hand the engine a [`ProbeFilter`] directly.

use std::path::PathBuf;

/// Allowlist/excludelist of device-tree paths considered during `scan`.
///
/// An empty `allow` means "all devices"; `allow` wins over `deny` when both
/// are populated (`SPEC_FULL.md` / `spec.md` §4.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct ProbeFilter {
    /// Device-tree paths to probe exclusively, if non-empty.
    #[cfg_attr(feature = "serde", serde(default))]
    pub allow: Vec<PathBuf>,
    /// Device-tree paths to skip, ignored when `allow` is non-empty.
    #[cfg_attr(feature = "serde", serde(default))]
    pub deny: Vec<PathBuf>,
}

impl ProbeFilter {
    /// True if `path` (or one of its ancestors) should be probed.
    #[must_use]
    pub fn permits(&self, path: &std::path::Path) -> bool {
        if !self.allow.is_empty() {
            return self.allow.iter().any(|p| path.starts_with(p));
        }
        !self.deny.iter().any(|p| path.starts_with(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_permits_everything() {
        let f = ProbeFilter::default();
        assert!(f.permits(std::path::Path::new("/sys/bus/pci/devices/0000:00:1f.2")));
    }

    #[test]
    fn allow_wins_over_deny() {
        let f = ProbeFilter {
            allow: vec![PathBuf::from("/sys/bus/pci/devices/0000:00:1f.2")],
            deny: vec![PathBuf::from("/sys/bus/pci/devices/0000:00:1f.2")],
        };
        assert!(f.permits(std::path::Path::new("/sys/bus/pci/devices/0000:00:1f.2")));
        assert!(!f.permits(std::path::Path::new("/sys/bus/pci/devices/0000:00:1f.3")));
    }

    #[test]
    fn deny_blocks_when_allow_empty() {
        let f = ProbeFilter {
            allow: vec![],
            deny: vec![PathBuf::from("/sys/bus/pci/devices/0000:00:1f.2")],
        };
        assert!(!f.permits(std::path::Path::new("/sys/bus/pci/devices/0000:00:1f.2")));
        assert!(f.permits(std::path::Path::new("/sys/bus/pci/devices/0000:00:1f.3")));
    }
}
