//! The seven hardware transports the LED dispatch engine drives, plus the
//! pattern-to-encoding lookup tables they share.
//!
//! Every `set` function here takes `(previous, current)` and short-circuits
//! to `Ok(false)` when they're equal, per the change-detection contract
//! described in `bayled-core`'s [`Pattern`](bayled_core::Pattern) docs.
//! Batching transports (SES, SMP) additionally expose a `flush` that turns
//! staged changes into hardware writes.

pub mod ahci;
pub mod amd_ipmi;
pub mod amd_sgpio;
pub mod dell_ipmi;
pub mod npem;
pub mod ses;
pub mod smp;
pub mod tables;
pub mod vmd;
