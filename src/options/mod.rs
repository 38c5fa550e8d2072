//! Option pattern resolution and the dynamic contract universe.

mod pattern;
mod universe;

pub use pattern::{OptionPattern, PatternResolver, StrikeCode};
pub use universe::OptionUniverse;
