//! Data model, error types, pattern vocabulary, and ambient plumbing shared
//! by every crate in the LED dispatch engine.

mod config;
mod error;
mod log_sink;
mod model;
mod pattern;

pub use config::ProbeFilter;
pub use error::Error;
pub use log_sink::{LogConfig, LogSink, NullSink};
pub use model::{
    AmdInterface, BlockDevice, Controller, ControllerId, ControllerKind, ControlPath, DeviceKey,
    EnclosureId, EnclosureRef, Host, IsciStaging, RaidRecord, SlotProperty, SlotTarget,
};
pub use pattern::{Pattern, Ses2Code};

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
