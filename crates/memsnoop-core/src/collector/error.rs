//! Error type shared by all measurements.

use std::io;

use nix::errno::Errno;

use crate::model::RangeOrderError;

/// Error type for measurement failures.
#[derive(Debug)]
pub enum CollectError {
    /// The target process no longer exists.
    ProcessGone(u32),
    /// I/O error reading or writing a pseudo-file.
    Io(io::Error),
    /// A required kernel interface is missing or inaccessible.
    Setup(String),
    /// Parse error in a pseudo-file.
    Parse(String),
    /// Pages were scanned out of ascending order.
    Order(RangeOrderError),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Setup(msg) => write!(f, "setup failed: {}", msg),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
            CollectError::Order(e) => write!(f, "scan order violated: {}", e),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            CollectError::Order(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectError {
    fn from(e: io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<RangeOrderError> for CollectError {
    fn from(e: RangeOrderError) -> Self {
        CollectError::Order(e)
    }
}

impl CollectError {
    pub fn is_process_gone(&self) -> bool {
        matches!(self, CollectError::ProcessGone(_))
    }
}

/// Converts an I/O result on a `/proc/[pid]/` file, turning "no such
/// file" and "no such process" into [`CollectError::ProcessGone`].
pub fn pid_guard<T>(pid: u32, result: io::Result<T>) -> Result<T, CollectError> {
    result.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(Errno::ESRCH as i32) {
            CollectError::ProcessGone(pid)
        } else {
            CollectError::Io(e)
        }
    })
}
