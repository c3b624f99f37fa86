//! Abstractions for pseudo-file access to enable testing and mocking.
//!
//! The `FileSystem` trait lets measurements read the real `/proc` and
//! `/sys` trees on Linux, or an in-memory image of them in tests and CI
//! where idle page tracking (and root) is unavailable.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// An open pseudo-file with positioned reads and writes.
///
/// Binary files are walked many times per round; holding one handle
/// avoids reopening the file for every segment.
pub trait FileHandle: Send {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Stops early only at end of file; returns the number of bytes
    /// actually read, which may be zero.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

/// Abstraction for pseudo-file operations.
///
/// Text files (`maps`, `statm`, `io`, ...) are read whole. Binary files
/// (`pagemap`, `page_idle/bitmap`) are read into caller-owned buffers or
/// through an open [`FileHandle`] so the sampling loop can reuse its
/// allocations.
pub trait FileSystem: Send + Sync {
    type Handle: FileHandle;

    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Reads the entire contents of a file into `buf`.
    ///
    /// `buf` is cleared first but keeps its capacity, so a buffer sized once
    /// is reused across rounds. Returns the number of bytes read.
    fn read_into(&self, path: &Path, buf: &mut Vec<u8>) -> io::Result<usize>;

    /// Opens an existing file for positioned reads.
    fn open(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Opens an existing file for positioned writes.
    fn open_write(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// One-shot [`FileHandle::read_at`].
    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.open(path)?.read_at(offset, buf)
    }

    /// One-shot [`FileHandle::write_at`].
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        self.open_write(path)?.write_at(offset, data)
    }
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to read from the actual `/proc` and `/sys`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileHandle for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match FileExt::read_at(&*self, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        FileExt::write_all_at(&*self, data, offset)
    }
}

impl FileSystem for RealFs {
    type Handle = File;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_into(&self, path: &Path, buf: &mut Vec<u8>) -> io::Result<usize> {
        buf.clear();
        File::open(path)?.read_to_end(buf)
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn open_write(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().write(true).open(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
