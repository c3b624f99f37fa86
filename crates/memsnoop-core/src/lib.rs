//! memsnoop-core — working set tracing through Linux idle page tracking.
//!
//! Provides:
//! - `model` — VMAs, compressed page sets, samples and traces
//! - `collector` — measurements (idle pages, `/proc` counters) over a mockable filesystem
//! - `process` — the traced process and stop/continue signalling
//! - `tracer` — the periodic sampling loop
//! - `hugepages` — transparent huge page mode checks
//! - `fmt` — shared formatting helpers (bytes, pages, durations)
//! - `util` — helper utilities

pub mod collector;
pub mod fmt;
pub mod hugepages;
pub mod model;
pub mod process;
pub mod tracer;
pub mod util;

pub use collector::{CollectError, IdlePageTracker, Measurement, Reading, Series};
pub use model::{Sample, SortedRangeVector, Trace, Vma};
pub use process::{PausePolicy, RealSignals, SnoopedProcess};
pub use tracer::{Iterations, TraceConfig, TraceData, TraceEnd, TraceError, Tracer};
