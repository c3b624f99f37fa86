//! Handles for the process being traced and the signals that freeze it.
//!
//! A [`SnoopedProcess`] pairs a pid with a [`PausePolicy`]. Pausable
//! targets are stopped with `SIGSTOP` for the duration of each measurement
//! round and continued with `SIGCONT` afterwards, so a sample reflects a
//! single instant. Unpausable targets (the monitor itself, anything that
//! must stay responsive) are never signalled.
//!
//! Tracing the same pid from two places at once is not supported: both
//! would pause/resume it and reset the same idle bits. Callers must
//! serialize such traces themselves.

mod mock;
mod signals;

pub use mock::{MockSignals, SignalEvent};
pub use signals::RealSignals;

use nix::errno::Errno;

/// Whether the target is frozen while it is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PausePolicy {
    Pausable,
    Unpausable,
}

/// Error type for process control failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// No process with this pid exists.
    ProcessGone(u32),
    /// The process exists but we may not signal it.
    PermissionDenied(u32),
    /// The pid cannot name a single process (0 or beyond `pid_t`).
    InvalidPid(u32),
    /// Any other delivery failure.
    Other { pid: u32, errno: Errno },
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            SignalError::PermissionDenied(pid) => {
                write!(f, "not permitted to signal process {}", pid)
            }
            SignalError::InvalidPid(pid) => write!(f, "invalid pid {}", pid),
            SignalError::Other { pid, errno } => {
                write!(f, "failed to signal process {}: {}", pid, errno)
            }
        }
    }
}

impl std::error::Error for SignalError {}

impl SignalError {
    pub fn is_process_gone(&self) -> bool {
        matches!(self, SignalError::ProcessGone(_))
    }
}

/// Delivery of stop/continue signals and liveness checks.
pub trait ProcessSignals: Send + Sync {
    /// Stops the process.
    fn pause(&self, pid: u32) -> Result<(), SignalError>;

    /// Continues a stopped process.
    fn resume(&self, pid: u32) -> Result<(), SignalError>;

    /// Returns true if the process exists and has not exited.
    fn is_running(&self, pid: u32) -> bool;
}

/// The process under observation.
///
/// Holds no measurement state; buffers belong to the measurements, so one
/// process can be observed by several independent measurement instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnoopedProcess {
    pid: u32,
    policy: PausePolicy,
}

impl SnoopedProcess {
    pub fn new(pid: u32, policy: PausePolicy) -> Self {
        Self { pid, policy }
    }

    /// A process that is stopped during every measurement round.
    pub fn pausable(pid: u32) -> Self {
        Self::new(pid, PausePolicy::Pausable)
    }

    /// A process that is never signalled.
    pub fn unpausable(pid: u32) -> Self {
        Self::new(pid, PausePolicy::Unpausable)
    }

    /// The calling process. Always unpausable: stopping ourselves would
    /// leave nobody to send `SIGCONT`.
    pub fn current() -> Self {
        Self::unpausable(std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn policy(&self) -> PausePolicy {
        self.policy
    }

    /// Runs before a measurement round: pauses pausable processes.
    pub fn prehook<S: ProcessSignals + ?Sized>(&self, signals: &S) -> Result<(), SignalError> {
        match self.policy {
            PausePolicy::Pausable => signals.pause(self.pid),
            PausePolicy::Unpausable => Ok(()),
        }
    }

    /// Runs after a measurement round: resumes pausable processes.
    pub fn posthook<S: ProcessSignals + ?Sized>(&self, signals: &S) -> Result<(), SignalError> {
        match self.policy {
            PausePolicy::Pausable => signals.resume(self.pid),
            PausePolicy::Unpausable => Ok(()),
        }
    }
}
