//! Core data model shared across the engine: characteristics, samples,
//! violations, and the rolling-window projections/boundaries built from
//! them.

mod characteristic;
mod sample;
mod violation;
mod zone;

pub use characteristic::*;
pub use sample::*;
pub use violation::*;
pub use zone::*;
