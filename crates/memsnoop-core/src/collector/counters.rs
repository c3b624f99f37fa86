//! Lightweight measurements: one pseudo-file parsed per round.
//!
//! Each reader is best-effort on content (unparsable numbers read as zero)
//! but strict on existence: a missing per-process file means the target
//! is gone.

use std::path::PathBuf;

use chrono::Utc;

use super::error::{CollectError, pid_guard};
use super::measurement::{Measurement, Reading};
use super::procfs::parser::{parse_diskstats, parse_proc_io, parse_statm, parse_uptime};
use super::procfs::pid_file;
use super::traits::FileSystem;
use crate::process::SnoopedProcess;

/// Wall clock time of each round.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp;

impl Measurement for Timestamp {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn measure(&mut self, _process: &SnoopedProcess) -> Result<Reading, CollectError> {
        Ok(Reading::Timestamp(Utc::now()))
    }
}

/// Cumulative byte counters from `/proc/[pid]/io`.
pub struct ProcessIo<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> ProcessIo<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            proc_path: PathBuf::from("/proc"),
        }
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }
}

impl<F: FileSystem> Measurement for ProcessIo<F> {
    fn name(&self) -> &str {
        "process_io"
    }

    fn measure(&mut self, process: &SnoopedProcess) -> Result<Reading, CollectError> {
        let path = pid_file(&self.proc_path, process.pid(), "io");
        let content = pid_guard(process.pid(), self.fs.read_to_string(&path))?;
        Ok(Reading::ProcessIo(parse_proc_io(&content)))
    }
}

/// Virtual and resident size from `/proc/[pid]/statm`.
pub struct Statm<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> Statm<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            proc_path: PathBuf::from("/proc"),
        }
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }
}

impl<F: FileSystem> Measurement for Statm<F> {
    fn name(&self) -> &str {
        "statm"
    }

    fn measure(&mut self, process: &SnoopedProcess) -> Result<Reading, CollectError> {
        let path = pid_file(&self.proc_path, process.pid(), "statm");
        let content = pid_guard(process.pid(), self.fs.read_to_string(&path))?;
        Ok(Reading::Statm(parse_statm(&content)))
    }
}

/// System uptime from `/proc/uptime`.
pub struct Uptime<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> Uptime<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            proc_path: PathBuf::from("/proc"),
        }
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }
}

impl<F: FileSystem> Measurement for Uptime<F> {
    fn name(&self) -> &str {
        "uptime"
    }

    fn measure(&mut self, _process: &SnoopedProcess) -> Result<Reading, CollectError> {
        let content = self.fs.read_to_string(&self.proc_path.join("uptime"))?;
        Ok(Reading::Uptime(parse_uptime(&content)))
    }
}

/// Block device counters from `/proc/diskstats`.
pub struct DiskStats<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    device: Option<String>,
}

impl<F: FileSystem> DiskStats<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            proc_path: PathBuf::from("/proc"),
            device: None,
        }
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }

    /// Only report the device with this name (e.g. `sda`).
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

impl<F: FileSystem> Measurement for DiskStats<F> {
    fn name(&self) -> &str {
        "diskstats"
    }

    fn initialize(&mut self, _process: &SnoopedProcess) -> Result<(), CollectError> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        let content = self.fs.read_to_string(&self.proc_path.join("diskstats"))?;
        if parse_diskstats(&content).iter().any(|d| &d.device == device) {
            Ok(())
        } else {
            Err(CollectError::Setup(format!("unknown block device {}", device)))
        }
    }

    fn measure(&mut self, _process: &SnoopedProcess) -> Result<Reading, CollectError> {
        let content = self.fs.read_to_string(&self.proc_path.join("diskstats"))?;
        let mut disks = parse_diskstats(&content);
        if let Some(device) = &self.device {
            disks.retain(|d| &d.device == device);
        }
        Ok(Reading::DiskStats(disks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockFs, SCENARIO_PID};

    fn process() -> SnoopedProcess {
        SnoopedProcess::pausable(SCENARIO_PID)
    }

    #[test]
    fn test_process_io() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        let mut m = ProcessIo::new(fs);
        let Reading::ProcessIo(io) = m.measure(&process()).unwrap() else {
            panic!("expected ProcessIo reading");
        };
        assert_eq!(io.rchar, 123456);
        assert_eq!(io.wchar, 65432);
        assert_eq!(io.read_bytes, 4096);
        assert_eq!(io.write_bytes, 8192);
    }

    #[test]
    fn test_statm() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        let mut m = Statm::new(fs);
        let Reading::Statm(statm) = m.measure(&process()).unwrap() else {
            panic!("expected Statm reading");
        };
        assert_eq!(statm.size, 2048);
        assert_eq!(statm.resident, 512);
    }

    #[test]
    fn test_garbage_counters_read_zero() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        fs.add_file(format!("/proc/{}/statm", SCENARIO_PID), "lots of 12 junk\n");
        let mut m = Statm::new(fs);
        let Reading::Statm(statm) = m.measure(&process()).unwrap() else {
            panic!("expected Statm reading");
        };
        assert_eq!(statm.size, 0);
        assert_eq!(statm.resident, 0);
        assert_eq!(statm.shared, 12);
    }

    #[test]
    fn test_per_process_counters_detect_exit() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        fs.remove_tree(format!("/proc/{}", SCENARIO_PID));

        let err = ProcessIo::new(fs.clone()).measure(&process()).unwrap_err();
        assert!(err.is_process_gone());
        let err = Statm::new(fs.clone()).measure(&process()).unwrap_err();
        assert!(err.is_process_gone());

        // System-wide files are unaffected.
        assert!(Uptime::new(fs).measure(&process()).is_ok());
    }

    #[test]
    fn test_uptime_and_timestamp() {
        let fs = MockFs::snooped_process(SCENARIO_PID);
        let Reading::Uptime(up) = Uptime::new(fs).measure(&process()).unwrap() else {
            panic!("expected Uptime reading");
        };
        assert!((up.uptime_secs - 12345.67).abs() < 1e-9);

        let before = Utc::now();
        let Reading::Timestamp(ts) = Timestamp.measure(&process()).unwrap() else {
            panic!("expected Timestamp reading");
        };
        assert!(ts >= before);
    }

    #[test]
    fn test_diskstats_device_filter() {
        let fs = MockFs::snooped_process(SCENARIO_PID);

        let Reading::DiskStats(all) = DiskStats::new(fs.clone()).measure(&process()).unwrap()
        else {
            panic!("expected DiskStats reading");
        };
        assert_eq!(all.len(), 2);

        let mut m = DiskStats::new(fs.clone()).with_device("nvme0n1");
        m.initialize(&process()).unwrap();
        let Reading::DiskStats(one) = m.measure(&process()).unwrap() else {
            panic!("expected DiskStats reading");
        };
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].reads, 50000);

        let mut m = DiskStats::new(fs).with_device("sdz");
        assert!(matches!(
            m.initialize(&process()),
            Err(CollectError::Setup(_))
        ));
    }
}
