//! In-memory mock filesystem for testing measurements without real `/proc`.
//!
//! `MockFs` simulates the pseudo-files a trace touches, text and binary
//! alike. Clones share the same contents, so a test can keep one handle
//! while a measurement owns another and still mutate the target between
//! rounds (touch pages, make the process disappear).
//!
//! Files registered with [`MockFs::add_idle_bitmap`] behave like
//! `page_idle/bitmap`: a write only sets bits, it never clears them.

use crate::collector::traits::{FileHandle, FileSystem};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A single write observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub path: PathBuf,
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Default)]
struct MockState {
    /// Map from path to file contents.
    files: HashMap<PathBuf, Vec<u8>>,
    /// Set of directories.
    directories: HashSet<PathBuf>,
    /// Files whose writes OR into the existing bytes.
    idle_bitmaps: HashSet<PathBuf>,
    /// Every `write_at` in call order.
    writes: Vec<WriteRecord>,
    /// Every successful open, in call order.
    opens: Vec<PathBuf>,
}

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    state: Arc<Mutex<MockState>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panic in another test thread must not cascade into this one.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a text file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.add_binary(path, content.into().into_bytes());
    }

    /// Adds a binary file with the given content.
    pub fn add_binary(&self, path: impl AsRef<Path>, content: Vec<u8>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        add_parents(&mut state.directories, &path);
        state.files.insert(path, content);
    }

    /// Adds a file with idle bitmap write semantics.
    pub fn add_idle_bitmap(&self, path: impl AsRef<Path>, content: Vec<u8>) {
        let path = path.as_ref().to_path_buf();
        self.add_binary(&path, content);
        self.state().idle_bitmaps.insert(path);
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        add_parents(&mut state.directories, &path);
        state.directories.insert(path);
    }

    /// Removes a file and returns whether it existed.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        self.state().files.remove(path.as_ref()).is_some()
    }

    /// Removes a directory together with everything below it.
    pub fn remove_tree(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state();
        state.files.retain(|p, _| !p.starts_with(path));
        state.directories.retain(|p| !p.starts_with(path));
    }

    /// Returns a copy of a file's raw bytes.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state().files.get(path.as_ref()).cloned()
    }

    /// Applies `f` to a file's bytes in place, creating the file if needed.
    pub fn modify(&self, path: impl AsRef<Path>, f: impl FnOnce(&mut Vec<u8>)) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state();
        add_parents(&mut state.directories, &path);
        f(state.files.entry(path).or_default());
    }

    /// Returns all writes performed so far.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Number of times `path` was opened.
    pub fn open_count(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        self.state().opens.iter().filter(|p| *p == path).count()
    }

    fn open_handle(&self, path: &Path, writable: bool) -> io::Result<MockFile> {
        let mut state = self.state();
        if !state.files.contains_key(path) {
            return Err(not_found(path));
        }
        state.opens.push(path.to_path_buf());
        Ok(MockFile {
            fs: self.clone(),
            path: path.to_path_buf(),
            writable,
        })
    }
}

/// Open file of a [`MockFs`].
///
/// Sees later changes to the file, and fails with `NotFound` once the file
/// is removed, like a `/proc/[pid]` file of an exited process.
#[derive(Debug)]
pub struct MockFile {
    fs: MockFs,
    path: PathBuf,
    writable: bool,
}

impl FileHandle for MockFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.fs.state();
        let bytes = state.files.get(&self.path).ok_or_else(|| not_found(&self.path))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        let mut state = self.fs.state();
        let or_bits = state.idle_bitmaps.contains(&self.path);
        let file = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| not_found(&self.path))?;
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        if file.len() < start + data.len() {
            file.resize(start + data.len(), 0);
        }
        let target = &mut file[start..start + data.len()];
        if or_bits {
            for (byte, bits) in target.iter_mut().zip(data) {
                *byte |= bits;
            }
        } else {
            target.copy_from_slice(data);
        }
        state.writes.push(WriteRecord {
            path: self.path.clone(),
            offset,
            len: data.len(),
        });
        Ok(())
    }
}

fn add_parents(directories: &mut HashSet<PathBuf>, path: &Path) {
    let mut parent = path.parent();
    while let Some(p) = parent {
        if !p.as_os_str().is_empty() {
            directories.insert(p.to_path_buf());
        }
        parent = p.parent();
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("file not found: {:?}", path),
    )
}

impl FileSystem for MockFs {
    type Handle = MockFile;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let state = self.state();
        let bytes = state.files.get(path).ok_or_else(|| not_found(path))?;
        String::from_utf8(bytes.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_into(&self, path: &Path, buf: &mut Vec<u8>) -> io::Result<usize> {
        let state = self.state();
        let bytes = state.files.get(path).ok_or_else(|| not_found(path))?;
        buf.clear();
        buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn open(&self, path: &Path) -> io::Result<MockFile> {
        self.open_handle(path, false)
    }

    fn open_write(&self, path: &Path) -> io::Result<MockFile> {
        self.open_handle(path, true)
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.files.contains_key(path) || state.directories.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file() {
        let fs = MockFs::new();
        fs.add_file("/proc/uptime", "12345.67 98765.43\n");

        assert!(fs.exists(Path::new("/proc/uptime")));
        assert!(fs.exists(Path::new("/proc")));

        let content = fs.read_to_string(Path::new("/proc/uptime")).unwrap();
        assert_eq!(content, "12345.67 98765.43\n");
    }

    #[test]
    fn test_mock_fs_clones_share_contents() {
        let fs = MockFs::new();
        let other = fs.clone();
        fs.add_file("/proc/42/statm", "1 2 3 4 5 6 7\n");

        assert!(other.exists(Path::new("/proc/42/statm")));
        other.remove_tree("/proc/42");
        assert!(!fs.exists(Path::new("/proc/42/statm")));
        assert!(!fs.exists(Path::new("/proc/42")));
    }

    #[test]
    fn test_mock_fs_read_at_partial() {
        let fs = MockFs::new();
        fs.add_binary("/proc/1/pagemap", (0u8..16).collect());

        let mut buf = [0u8; 12];
        let n = fs
            .read_at(Path::new("/proc/1/pagemap"), 8, &mut buf)
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..8], &[8, 9, 10, 11, 12, 13, 14, 15]);

        let n = fs
            .read_at(Path::new("/proc/1/pagemap"), 4096, &mut buf)
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_mock_fs_write_at_records() {
        let fs = MockFs::new();
        fs.add_binary("/sys/kernel/mm/page_idle/bitmap", vec![0; 16]);

        fs.write_at(Path::new("/sys/kernel/mm/page_idle/bitmap"), 8, &[0xff; 8])
            .unwrap();

        let content = fs.contents("/sys/kernel/mm/page_idle/bitmap").unwrap();
        assert_eq!(&content[8..], &[0xff; 8]);
        assert_eq!(
            fs.writes(),
            vec![WriteRecord {
                path: PathBuf::from("/sys/kernel/mm/page_idle/bitmap"),
                offset: 8,
                len: 8,
            }]
        );
    }

    #[test]
    fn test_mock_fs_idle_bitmap_writes_only_set_bits() {
        let fs = MockFs::new();
        fs.add_idle_bitmap("/sys/kernel/mm/page_idle/bitmap", vec![0b0100_0000, 0, 0xF0, 0]);

        fs.write_at(Path::new("/sys/kernel/mm/page_idle/bitmap"), 0, &[0b0000_1111, 0])
            .unwrap();

        let content = fs.contents("/sys/kernel/mm/page_idle/bitmap").unwrap();
        assert_eq!(content, vec![0b0100_1111, 0, 0xF0, 0]);
    }

    #[test]
    fn test_mock_fs_handle_counts_opens_and_sees_removal() {
        let fs = MockFs::new();
        fs.add_binary("/proc/7/pagemap", vec![1; 32]);

        let mut handle = fs.open(Path::new("/proc/7/pagemap")).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(handle.read_at(0, &mut buf).unwrap(), 8);
        assert_eq!(handle.read_at(16, &mut buf).unwrap(), 8);
        assert_eq!(fs.open_count("/proc/7/pagemap"), 1);
        assert_eq!(
            handle.write_at(0, &[0]).unwrap_err().kind(),
            io::ErrorKind::PermissionDenied
        );

        fs.remove_tree("/proc/7");
        assert_eq!(
            handle.read_at(0, &mut buf).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert!(fs.open(Path::new("/proc/7/pagemap")).is_err());
        assert_eq!(fs.open_count("/proc/7/pagemap"), 1);
    }

    #[test]
    fn test_mock_fs_write_to_missing_file_fails() {
        let fs = MockFs::new();
        let result = fs.write_at(Path::new("/nonexistent"), 0, &[1]);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_mock_fs_not_found() {
        let fs = MockFs::new();
        let result = fs.read_to_string(Path::new("/nonexistent"));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
