//! Parsers for `/proc` counter files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. Counters are best-effort: a field that fails to
//! parse reads as zero instead of failing the whole measurement.

use serde::{Deserialize, Serialize};

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses `s` as `T`, falling back to zero.
fn parse_or_zero<T: std::str::FromStr + Default>(s: &str) -> T {
    s.trim().parse().unwrap_or_default()
}

/// Extracts the state character from `/proc/[pid]/stat`.
///
/// The comm field may contain spaces and parentheses, so the state is the
/// first field after the last `)`.
pub fn parse_stat_state(content: &str) -> Result<char, ParseError> {
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    content[close_paren + 1..]
        .split_whitespace()
        .next()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| ParseError::new("missing state in stat"))
}

/// Byte counters from `/proc/[pid]/io`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcIo {
    pub rchar: u64,
    pub wchar: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Parses `/proc/[pid]/io` content.
///
/// Format is key: value pairs, one per line.
pub fn parse_proc_io(content: &str) -> ProcIo {
    let mut io = ProcIo::default();

    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value: u64 = parse_or_zero(value);
            match key.trim() {
                "rchar" => io.rchar = value,
                "wchar" => io.wchar = value,
                "read_bytes" => io.read_bytes = value,
                "write_bytes" => io.write_bytes = value,
                _ => {}
            }
        }
    }

    io
}

/// Memory usage from `/proc/[pid]/statm`, in pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statm {
    /// Total program size (VmSize).
    pub size: u64,
    /// Resident set size (VmRSS).
    pub resident: u64,
    /// Resident shared pages (RssFile + RssShmem).
    pub shared: u64,
    pub text: u64,
    /// Data + stack.
    pub data: u64,
}

/// Parses `/proc/[pid]/statm` content.
///
/// Format: `size resident shared text lib data dt`.
pub fn parse_statm(content: &str) -> Statm {
    let fields: Vec<&str> = content.split_whitespace().collect();
    let get = |idx: usize| -> u64 { fields.get(idx).map(|s| parse_or_zero(s)).unwrap_or(0) };

    Statm {
        size: get(0),
        resident: get(1),
        shared: get(2),
        text: get(3),
        data: get(5),
    }
}

/// System uptime from `/proc/uptime`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Uptime {
    /// Seconds since boot.
    pub uptime_secs: f64,
    /// Sum of idle time over all CPUs, in seconds.
    pub idle_secs: f64,
}

/// Parses `/proc/uptime` content.
pub fn parse_uptime(content: &str) -> Uptime {
    let mut fields = content.split_whitespace();
    Uptime {
        uptime_secs: fields.next().map(parse_or_zero).unwrap_or(0.0),
        idle_secs: fields.next().map(parse_or_zero).unwrap_or(0.0),
    }
}

/// One block device line of `/proc/diskstats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    /// Block device major number.
    pub major: u32,
    /// Block device minor number.
    pub minor: u32,
    /// Device name (sda, nvme0n1, etc.)
    pub device: String,
    /// Number of reads completed
    pub reads: u64,
    /// Number of sectors read
    pub read_sectors: u64,
    /// Time spent reading (ms)
    pub read_time: u64,
    /// Number of writes completed
    pub writes: u64,
    /// Number of sectors written
    pub write_sectors: u64,
    /// Time spent writing (ms)
    pub write_time: u64,
    /// Number of I/Os currently in progress
    pub io_in_progress: u64,
    /// Time spent doing I/Os (ms)
    pub io_time: u64,
}

/// Parses `/proc/diskstats` content.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors w_time io_pending io_time w_io_time [discards ...]
pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue; // Skip malformed lines
        }

        let get_val = |idx: usize| -> u64 { parse_or_zero(parts[idx]) };

        disks.push(DiskStats {
            major: parse_or_zero(parts[0]),
            minor: parse_or_zero(parts[1]),
            device: parts[2].to_string(),
            reads: get_val(3),
            read_sectors: get_val(5),
            read_time: get_val(6),
            writes: get_val(7),
            write_sectors: get_val(9),
            write_time: get_val(10),
            io_in_progress: get_val(11),
            io_time: get_val(12),
        });
    }

    disks
}
