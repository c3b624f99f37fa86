//! The sampling loop.
//!
//! ```text
//! Idle ─► Sleeping ─► Pausing ─► Measuring ─► Resuming ─┬─► Sleeping
//!            ▲                                          │
//!            └──────────────────────────────────────────┴─► Done
//! ```
//!
//! Each round pauses the target, takes one reading from every measurement
//! and resumes it. A round is committed only if every measurement
//! succeeded, so all series always have the same length. The loop ends when
//! the iteration budget is spent, the target exits, a shutdown is
//! requested, or a round fails for a reason other than the target exiting.
//! In every case the rounds collected so far are returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::collector::error::CollectError;
use crate::collector::measurement::{Measurement, Reading, Series};
use crate::model::Trace;
use crate::process::{ProcessSignals, SignalError, SnoopedProcess};

/// Default time between samples.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Granularity at which a sleeping loop notices a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// How many rounds to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Iterations {
    /// Exactly this many rounds, unless the target exits first.
    Count(usize),
    /// Until the target exits.
    #[default]
    UntilExit,
}

impl Iterations {
    fn exhausted(&self, rounds: usize) -> bool {
        match self {
            Iterations::Count(n) => rounds >= *n,
            Iterations::UntilExit => false,
        }
    }
}

/// Loop timing and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Sleep before every round, including the first.
    pub interval: Duration,
    pub iterations: Iterations,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            iterations: Iterations::UntilExit,
        }
    }
}

/// Why a trace stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEnd {
    /// The requested number of rounds was taken.
    Completed,
    /// The target exited.
    ProcessExited,
    /// The caller asked to stop.
    Shutdown,
    /// A round failed; the message says why.
    Aborted(String),
}

/// Result of a trace: one series per measurement, all of length `rounds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    pub pid: u32,
    pub series: Vec<Series>,
    pub rounds: usize,
    pub end: TraceEnd,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TraceData {
    /// The series of the measurement named `name`.
    pub fn series(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Idle-page samples of the series named `name`.
    pub fn trace(&self, name: &str) -> Option<Trace> {
        self.series(name).map(Series::to_trace)
    }

    /// Removes the series named `name` and returns its idle-page samples.
    pub fn take_trace(&mut self, name: &str) -> Option<Trace> {
        let idx = self.series.iter().position(|s| s.name == name)?;
        let series = self.series.remove(idx);
        Some(
            series
                .readings
                .into_iter()
                .filter_map(|r| match r {
                    Reading::IdlePages(sample) => Some(sample),
                    _ => None,
                })
                .collect(),
        )
    }
}

/// Error type for traces that cannot start.
///
/// Failures after the first round are reported through [`TraceEnd`].
#[derive(Debug)]
pub enum TraceError {
    /// A measurement could not be initialized.
    Setup(CollectError),
    /// The target could not be paused or resumed during setup.
    Signal(SignalError),
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::Setup(e) => write!(f, "trace setup failed: {}", e),
            TraceError::Signal(e) => write!(f, "trace setup failed: {}", e),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Setup(e) => Some(e),
            TraceError::Signal(e) => Some(e),
        }
    }
}

impl From<CollectError> for TraceError {
    fn from(e: CollectError) -> Self {
        TraceError::Setup(e)
    }
}

/// Why a single round was discarded.
enum RoundError {
    Gone,
    Failed(String),
}

impl From<CollectError> for RoundError {
    fn from(e: CollectError) -> Self {
        if e.is_process_gone() {
            RoundError::Gone
        } else {
            RoundError::Failed(e.to_string())
        }
    }
}

impl From<SignalError> for RoundError {
    fn from(e: SignalError) -> Self {
        if e.is_process_gone() {
            RoundError::Gone
        } else {
            RoundError::Failed(e.to_string())
        }
    }
}

/// Periodic sampler of one process.
///
/// ```ignore
/// let mut tracer = Tracer::new(RealSignals::new())
///     .interval(Duration::from_secs(2))
///     .iterations(Iterations::Count(8))
///     .measure(Box::new(IdlePageTracker::new(RealFs::new())));
/// let data = tracer.run(&SnoopedProcess::pausable(pid))?;
/// let trace = data.trace("idle_pages");
/// ```
pub struct Tracer<S: ProcessSignals> {
    signals: S,
    config: TraceConfig,
    measurements: Vec<Box<dyn Measurement>>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<S: ProcessSignals> Tracer<S> {
    pub fn new(signals: S) -> Self {
        Self {
            signals,
            config: TraceConfig::default(),
            measurements: Vec::new(),
            shutdown: None,
        }
    }

    pub fn with_config(mut self, config: TraceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn iterations(mut self, iterations: Iterations) -> Self {
        self.config.iterations = iterations;
        self
    }

    /// Stops the loop at the next sleep once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Adds a measurement taken every round.
    pub fn measure(mut self, measurement: Box<dyn Measurement>) -> Self {
        self.measurements.push(measurement);
        self
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn signals(&self) -> &S {
        &self.signals
    }

    /// Traces `process` until one of the end conditions holds.
    pub fn run(&mut self, process: &SnoopedProcess) -> Result<TraceData, TraceError> {
        self.run_with(process, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `on_round` after each committed
    /// round with its zero-based index and the series collected so far. The
    /// target is already resumed at that point.
    pub fn run_with<C>(
        &mut self,
        process: &SnoopedProcess,
        mut on_round: C,
    ) -> Result<TraceData, TraceError>
    where
        C: FnMut(usize, &[Series]),
    {
        let pid = process.pid();
        let started_at = Utc::now();
        let mut series: Vec<Series> = self.measurements.iter().map(|m| m.prepare()).collect();
        let finish = |series: Vec<Series>, rounds: usize, end: TraceEnd| TraceData {
            pid,
            series,
            rounds,
            end,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            pid,
            measurements = self.measurements.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            iterations = ?self.config.iterations,
            "starting trace"
        );

        if !self.signals.is_running(pid) {
            info!(pid, "target is not running");
            return Ok(finish(series, 0, TraceEnd::ProcessExited));
        }
        match self.initialize(process) {
            Ok(()) => {}
            Err(TraceError::Setup(e)) if e.is_process_gone() => {
                info!(pid, "target exited during setup");
                return Ok(finish(series, 0, TraceEnd::ProcessExited));
            }
            Err(TraceError::Signal(e)) if e.is_process_gone() => {
                info!(pid, "target exited during setup");
                return Ok(finish(series, 0, TraceEnd::ProcessExited));
            }
            Err(e) => return Err(e),
        }

        let mut rounds = 0;
        let end = loop {
            if self.config.iterations.exhausted(rounds) {
                break TraceEnd::Completed;
            }
            if !self.sleep() {
                break TraceEnd::Shutdown;
            }

            let start = Instant::now();
            match self.round(process) {
                Ok(readings) => {
                    for (s, reading) in series.iter_mut().zip(readings) {
                        s.readings.push(reading);
                    }
                    debug!(
                        pid,
                        round = rounds,
                        elapsed_us = start.elapsed().as_micros() as u64,
                        "round committed"
                    );
                    on_round(rounds, &series);
                    rounds += 1;
                }
                Err(RoundError::Gone) => break TraceEnd::ProcessExited,
                Err(RoundError::Failed(msg)) => {
                    error!(pid, round = rounds, "round failed: {}", msg);
                    break TraceEnd::Aborted(msg);
                }
            }

            if !self.config.iterations.exhausted(rounds) && !self.signals.is_running(pid) {
                break TraceEnd::ProcessExited;
            }
        };

        info!(pid, rounds, end = ?end, "trace finished");
        Ok(finish(series, rounds, end))
    }

    /// Initializes every measurement with the target paused.
    fn initialize(&mut self, process: &SnoopedProcess) -> Result<(), TraceError> {
        process.prehook(&self.signals).map_err(TraceError::Signal)?;
        let result = self
            .measurements
            .iter_mut()
            .try_for_each(|m| m.initialize(process));
        let resumed = process.posthook(&self.signals);
        if let Err(e) = &resumed {
            log_resume_failure(process.pid(), e);
        }
        result?;
        resumed.map_err(TraceError::Signal)
    }

    /// One pause-measure-resume cycle. The target is resumed whatever
    /// the outcome.
    fn round(&mut self, process: &SnoopedProcess) -> Result<Vec<Reading>, RoundError> {
        process.prehook(&self.signals)?;
        let result: Result<Vec<Reading>, CollectError> = self
            .measurements
            .iter_mut()
            .map(|m| m.measure(process))
            .collect();
        let resumed = process.posthook(&self.signals);
        if let Err(e) = &resumed {
            log_resume_failure(process.pid(), e);
        }

        match (result, resumed) {
            (Ok(readings), Ok(())) => Ok(readings),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Err(resume)) if !e.is_process_gone() && !resume.is_process_gone() => {
                Err(RoundError::Failed(format!("{}; {}", e, resume)))
            }
            (Err(e), _) => Err(e.into()),
        }
    }

    /// Sleeps for one interval. Returns false if a shutdown was requested.
    fn sleep(&self) -> bool {
        let mut remaining = self.config.interval;
        while remaining > Duration::ZERO && !self.shutdown_requested() {
            let sleep_time = remaining.min(SHUTDOWN_POLL);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
        !self.shutdown_requested()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// A target that could not be continued may be left stopped.
fn log_resume_failure(pid: u32, e: &SignalError) {
    if e.is_process_gone() {
        debug!(pid, "target exited before resume");
    } else {
        error!(pid, error = %e, "failed to resume target; it may remain stopped");
    }
}
