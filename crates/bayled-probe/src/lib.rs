//! Device-tree probe and block-device binding (`spec.md` §4.1, §4.2).
//!
//! [`classify`] walks the PCI device tree and classifies each device into a
//! [`bayled_core::ControllerKind`]; [`bind`] matches a block device against
//! the resulting controller set and computes its [`bayled_core::ControlPath`].

mod bind;
mod classify;

pub use bind::{bind_block_device, canonicalize_nvme_devnode};
pub use classify::{classify_controller, probe_controllers};
