//! Measurements taken once per sampling round.
//!
//! Every measurement implements [`Measurement`] and reads kernel
//! pseudo-files through the [`FileSystem`] trait, so all of them run
//! against an in-memory image in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Measurement (trait)                      │
//! │  ┌──────────────────────┐   ┌─────────────────────────────┐  │
//! │  │   IdlePageTracker    │   │   Counters                  │  │
//! │  │  - /proc/[pid]/maps  │   │  - /proc/[pid]/io, statm    │  │
//! │  │  - /proc/[pid]/      │   │  - /proc/uptime, diskstats  │  │
//! │  │      pagemap         │   │  - wall clock               │  │
//! │  │  - page_idle/bitmap  │   └──────────────┬──────────────┘  │
//! │  └──────────┬───────────┘                  │                 │
//! │             └──────────────┬───────────────┘                 │
//! │                     ┌──────▼──────┐                          │
//! │                     │  FileSystem │ (trait)                  │
//! │                     └──────┬──────┘                          │
//! └────────────────────────────┼─────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              │               │               │
//!       ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!       │   RealFs    │ │   MockFs    │ │  Scenarios  │
//!       │ (Linux)     │ │ (Testing)   │ │ (Fixtures)  │
//!       └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ## Production (Linux, root)
//!
//! ```ignore
//! use memsnoop_core::collector::{IdlePageTracker, RealFs};
//!
//! let mut tracker = IdlePageTracker::new(RealFs::new()).with_filter(|v| v.is_readable());
//! tracker.init_buffer()?;
//! let sample = tracker.sample(pid)?;
//! ```
//!
//! ## Testing (with MockFs)
//!
//! ```
//! use memsnoop_core::collector::{IdlePageTracker, MockFs};
//! use memsnoop_core::collector::mock::{SCENARIO_BITMAP, SCENARIO_PID};
//!
//! let fs = MockFs::snooped_process(SCENARIO_PID);
//! let mut tracker = IdlePageTracker::new(fs)
//!     .with_bitmap_path(SCENARIO_BITMAP)
//!     .with_page_size(4096);
//! let sample = tracker.sample(SCENARIO_PID).unwrap();
//! assert!(sample.wss() > 0);
//! ```

pub mod counters;
pub mod error;
pub mod idle;
pub mod measurement;
pub mod mock;
pub mod procfs;
pub mod traits;

pub use error::{CollectError, pid_guard};
pub use idle::{IdlePageTracker, VmaFilter};
pub use measurement::{Measurement, Reading, Series};
pub use mock::MockFs;
pub use traits::{FileHandle, FileSystem, RealFs};
