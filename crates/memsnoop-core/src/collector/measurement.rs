//! The contract every pluggable measurement satisfies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CollectError;
use super::procfs::{DiskStats, ProcIo, Statm, Uptime};
use crate::model::{Sample, Trace};
use crate::process::SnoopedProcess;

/// One measurement result for one round.
///
/// Tagged with its kind so heterogeneous measurements can share a loop and
/// a serialized trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Reading {
    /// Wall clock at measurement time.
    /// Source: system clock
    Timestamp(DateTime<Utc>),

    /// Active pages in the last window.
    /// Source: `/proc/[pid]/maps`, `/proc/[pid]/pagemap`, `page_idle/bitmap`
    IdlePages(Sample),

    /// Cumulative I/O counters.
    /// Source: `/proc/[pid]/io`
    ProcessIo(ProcIo),

    /// Memory size in pages.
    /// Source: `/proc/[pid]/statm`
    Statm(Statm),

    /// System uptime.
    /// Source: `/proc/uptime`
    Uptime(Uptime),

    /// Block device counters.
    /// Source: `/proc/diskstats`
    DiskStats(Vec<DiskStats>),
}

impl Reading {
    pub fn as_sample(&self) -> Option<&Sample> {
        match self {
            Reading::IdlePages(sample) => Some(sample),
            _ => None,
        }
    }
}

/// Accumulated readings of one measurement, one per committed round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub readings: Vec<Reading>,
}

impl Series {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Collects the idle-page samples of this series into a [`Trace`].
    pub fn to_trace(&self) -> Trace {
        self.readings
            .iter()
            .filter_map(Reading::as_sample)
            .cloned()
            .collect()
    }
}

/// A source of one reading per round.
///
/// The sampling loop calls [`prepare`](Measurement::prepare) and
/// [`initialize`](Measurement::initialize) once, then
/// [`measure`](Measurement::measure) once per round while the target is
/// paused.
pub trait Measurement: Send {
    /// Short identifier, used as the series name.
    fn name(&self) -> &str;

    /// Empty container for this measurement's readings.
    fn prepare(&self) -> Series {
        Series::new(self.name())
    }

    /// One-time setup before the first round.
    fn initialize(&mut self, _process: &SnoopedProcess) -> Result<(), CollectError> {
        Ok(())
    }

    /// Takes one reading.
    fn measure(&mut self, process: &SnoopedProcess) -> Result<Reading, CollectError>;
}
