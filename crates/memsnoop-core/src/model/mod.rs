//! Data model for idle page traces.
//!
//! - [`vma`] — memory map regions and their interval algebra
//! - [`range_vector`] — compressed sorted page sets
//! - [`sample`] — per-round samples and the trace aggregate

pub mod range_vector;
pub mod sample;
pub mod vma;

pub use range_vector::{RangeOrderError, SortedRangeVector, Unsigned};
pub use sample::{ActivityBitmap, Sample, Trace};
pub use vma::{DEFAULT_PAGE_SIZE, Vma, compact};
