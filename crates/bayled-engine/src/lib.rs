//! Engine context, `scan`/`set`/`flush` orchestration, and the slot API
//! (`spec.md` §4.0, §13), grounded on the teacher's own top-level crate
//! (`kernel/hadron-kernel`) that assembles the leaf driver crates into one
//! running system — the same "integration crate atop leaf crates" shape
//! this crate has atop `bayled-probe`/`bayled-transports`/`bayled-enclosure`.

mod context;
mod dispatch;
mod slot;

pub use context::{Engine, FlushReport, ScanReport};
