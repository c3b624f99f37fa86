//! Mock filesystem for testing without root or idle page tracking.

mod filesystem;
mod scenarios;

pub use filesystem::{MockFile, MockFs, WriteRecord};
pub use scenarios::{SCENARIO_BITMAP, SCENARIO_BITMAP_BYTES, SCENARIO_PID};
