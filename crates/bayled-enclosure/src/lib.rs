//! SES-2 enclosure and slot model (`SPEC_FULL.md` §4.3).

mod enclosure;
mod ses;

pub use enclosure::Enclosure;
pub use ses::{Page2Element, SesSlot, TypeDescriptor};
