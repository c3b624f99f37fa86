//! Readers for the Linux `/proc` filesystem.

pub mod parser;

pub use parser::{DiskStats, ParseError, ProcIo, Statm, Uptime};

use std::path::{Path, PathBuf};

/// Path of `file` inside the `/proc/[pid]/` directory under `proc_path`.
pub fn pid_file(proc_path: &Path, pid: u32, file: &str) -> PathBuf {
    proc_path.join(pid.to_string()).join(file)
}
