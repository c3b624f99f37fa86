//! In-memory process control for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{ProcessSignals, SignalError};

/// A signal observed by [`MockSignals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Pause(u32),
    Resume(u32),
}

#[derive(Debug, Default)]
struct MockSignalState {
    events: Vec<SignalEvent>,
    paused: bool,
    exited: bool,
    /// Number of successful pauses before the process "exits".
    exit_after: Option<usize>,
    pauses: usize,
    /// Returned by every `resume` while set; the target stays stopped.
    resume_error: Option<SignalError>,
}

/// Simulated target process.
///
/// Records every signal, tracks whether the target is stopped, and can
/// make the target vanish after a given number of pauses. Clones share
/// state.
#[derive(Debug, Clone, Default)]
pub struct MockSignals {
    state: Arc<Mutex<MockSignalState>>,
}

impl MockSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process exits right before its `n + 1`-th pause.
    pub fn exit_after(self, pauses: usize) -> Self {
        self.state().exit_after = Some(pauses);
        self
    }

    /// Every resume fails with `error` and leaves the target stopped.
    pub fn fail_resume(self, error: SignalError) -> Self {
        self.state().resume_error = Some(error);
        self
    }

    /// Makes the process disappear immediately.
    pub fn kill(&self) {
        self.state().exited = true;
    }

    pub fn events(&self) -> Vec<SignalEvent> {
        self.state().events.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn has_exited(&self) -> bool {
        self.state().exited
    }

    fn state(&self) -> MutexGuard<'_, MockSignalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessSignals for MockSignals {
    fn pause(&self, pid: u32) -> Result<(), SignalError> {
        let mut state = self.state();
        if state.exit_after.is_some_and(|n| state.pauses >= n) {
            state.exited = true;
        }
        if state.exited {
            return Err(SignalError::ProcessGone(pid));
        }
        state.pauses += 1;
        state.paused = true;
        state.events.push(SignalEvent::Pause(pid));
        Ok(())
    }

    fn resume(&self, pid: u32) -> Result<(), SignalError> {
        let mut state = self.state();
        if state.exited {
            return Err(SignalError::ProcessGone(pid));
        }
        if let Some(e) = state.resume_error.clone() {
            return Err(e);
        }
        state.paused = false;
        state.events.push(SignalEvent::Resume(pid));
        Ok(())
    }

    fn is_running(&self, _pid: u32) -> bool {
        !self.state().exited
    }
}
