//! Signal delivery to real processes.

use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::trace;

use super::{ProcessSignals, SignalError};
use crate::collector::procfs::parser::parse_stat_state;
use crate::collector::procfs::pid_file;
use crate::collector::traits::{FileSystem, RealFs};

/// Sends real `SIGSTOP`/`SIGCONT` and checks liveness through `/proc`.
#[derive(Debug, Clone)]
pub struct RealSignals<F: FileSystem = RealFs> {
    fs: F,
    proc_path: PathBuf,
}

impl RealSignals {
    /// Creates a signaller that reads process state from the real `/proc`.
    pub fn new() -> Self {
        Self::with_fs(RealFs::new())
    }
}

impl Default for RealSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FileSystem> RealSignals<F> {
    /// Creates a signaller that reads process state through `fs`.
    pub fn with_fs(fs: F) -> Self {
        Self {
            fs,
            proc_path: PathBuf::from("/proc"),
        }
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }

    fn send(&self, pid: u32, signal: Option<Signal>) -> Result<(), SignalError> {
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            // kill(0, ..) and negative pids address whole process groups.
            _ => return Err(SignalError::InvalidPid(pid)),
        };
        trace!(pid, ?signal, "sending signal");
        kill(Pid::from_raw(raw), signal).map_err(|errno| match errno {
            Errno::ESRCH => SignalError::ProcessGone(pid),
            Errno::EPERM => SignalError::PermissionDenied(pid),
            errno => SignalError::Other { pid, errno },
        })
    }
}

impl<F: FileSystem> ProcessSignals for RealSignals<F> {
    fn pause(&self, pid: u32) -> Result<(), SignalError> {
        self.send(pid, Some(Signal::SIGSTOP))
    }

    fn resume(&self, pid: u32) -> Result<(), SignalError> {
        self.send(pid, Some(Signal::SIGCONT))
    }

    fn is_running(&self, pid: u32) -> bool {
        match self.send(pid, None) {
            Ok(()) | Err(SignalError::PermissionDenied(_)) => {}
            Err(_) => return false,
        }
        // Zombies still accept signal 0 until reaped.
        match self.fs.read_to_string(&pid_file(&self.proc_path, pid, "stat")) {
            Ok(stat) => !matches!(parse_stat_state(&stat), Ok('Z' | 'X')),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use std::process::{Command, Stdio};

    #[test]
    fn test_current_process_is_running() {
        let signals = RealSignals::new();
        assert!(signals.is_running(std::process::id()));
    }

    #[test]
    fn test_pid_zero_is_rejected() {
        let signals = RealSignals::new();
        assert_eq!(signals.pause(0), Err(SignalError::InvalidPid(0)));
        assert_eq!(signals.resume(u32::MAX), Err(SignalError::InvalidPid(u32::MAX)));
        assert!(!signals.is_running(0));
    }

    #[test]
    fn test_pause_resume_and_exit_of_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        let signals = RealSignals::new();

        assert!(signals.is_running(pid));
        signals.pause(pid).unwrap();
        signals.resume(pid).unwrap();

        child.kill().unwrap();
        child.wait().unwrap();

        assert!(!signals.is_running(pid));
        assert_eq!(signals.pause(pid), Err(SignalError::ProcessGone(pid)));
    }

    #[test]
    fn test_is_running_reads_state_through_fs() {
        // Our own pid accepts signal 0; the state comes from the mock.
        let pid = std::process::id();
        let fs = MockFs::new();
        let signals = RealSignals::with_fs(fs.clone());

        fs.add_file(format!("/proc/{}/stat", pid), format!("{} (target) S 1", pid));
        assert!(signals.is_running(pid));

        fs.add_file(format!("/proc/{}/stat", pid), format!("{} (target) Z 1", pid));
        assert!(!signals.is_running(pid));

        fs.add_file(format!("/proc/{}/stat", pid), format!("{} (target) X 1", pid));
        assert!(!signals.is_running(pid));

        fs.remove_file(format!("/proc/{}/stat", pid));
        assert!(!signals.is_running(pid));
    }

    #[test]
    fn test_proc_path_is_honored() {
        let pid = std::process::id();
        let fs = MockFs::new();
        fs.add_file(format!("/host/proc/{}/stat", pid), format!("{} (target) R 1", pid));

        assert!(!RealSignals::with_fs(fs.clone()).is_running(pid));
        assert!(RealSignals::with_fs(fs).with_proc_path("/host/proc").is_running(pid));
    }

    #[test]
    fn test_zombie_is_not_running() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        // Give the child time to exit without reaping it.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let signals = RealSignals::new();
        assert!(!signals.is_running(pid));

        child.wait().unwrap();
    }
}
