//! Working set measurement through Linux idle page tracking.
//!
//! Each round walks the target's VMAs in `/proc/[pid]/pagemap`, looks up
//! every resident page's PFN in `/sys/kernel/mm/page_idle/bitmap` (clear
//! bit = accessed since the last reset), then sets the bits again so the
//! next round only sees accesses made in between. Only the bits of the
//! target's own frames are written; frames of other processes keep their
//! state, so concurrent traces of different targets do not interfere.
//!
//! Requires root and a kernel built with `CONFIG_IDLE_PAGE_TRACKING`.
//! Without `CAP_SYS_ADMIN` pagemap reports PFN 0 for every page.

pub mod bits;

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, warn};

use self::bits::{PAGEMAP_ENTRY_SIZE, bitmap_word_mask, bitmap_word_offset, entries};
use super::error::{CollectError, pid_guard};
use super::measurement::{Measurement, Reading};
use super::procfs::pid_file;
use super::traits::{FileHandle, FileSystem};
use crate::model::{Sample, SortedRangeVector, Vma};
use crate::process::SnoopedProcess;
use crate::util;

/// Location of the global idle bitmap.
pub const DEFAULT_BITMAP_PATH: &str = "/sys/kernel/mm/page_idle/bitmap";

/// Upper bound on pagemap entries read in one go (8 MiB of buffer).
///
/// Reserved regions can span terabytes of address space; those VMAs are
/// walked in chunks of this many pages.
pub const MAX_WALK_PAGES: u64 = 1 << 20;

/// Largest single write to the idle bitmap.
const MAX_RESET_BYTES: usize = 4096;

/// Predicate selecting which VMAs are measured.
pub type VmaFilter = Box<dyn Fn(&Vma) -> bool + Send + Sync>;

/// Idle-page working set tracker for one target at a time.
///
/// Owns the scratch buffers reused across rounds; independent trackers
/// share nothing.
pub struct IdlePageTracker<F: FileSystem> {
    fs: F,
    filter: VmaFilter,
    proc_path: PathBuf,
    bitmap_path: PathBuf,
    page_size: u64,
    /// VMAs of the current round.
    vmas: Vec<Vma>,
    /// Raw pagemap bytes; grown to the largest segment seen, never shrunk.
    pagemap: Vec<u8>,
    /// Copy of the idle bitmap from the last read.
    bitmap: Vec<u8>,
    /// Bitmap words pending a reset: (byte offset, bits to set).
    words: Vec<(u64, u64)>,
    /// Encoded bytes of one run of adjacent words.
    run: Vec<u8>,
}

impl<F: FileSystem> IdlePageTracker<F> {
    /// Creates a tracker measuring every VMA of the target.
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            filter: Box::new(|_| true),
            proc_path: PathBuf::from("/proc"),
            bitmap_path: PathBuf::from(DEFAULT_BITMAP_PATH),
            page_size: util::page_size(),
            vmas: Vec::new(),
            pagemap: Vec::new(),
            bitmap: Vec::new(),
            words: Vec::new(),
            run: Vec::new(),
        }
    }

    /// Restricts measurement to VMAs matching `filter`.
    pub fn with_filter(mut self, filter: impl Fn(&Vma) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_path = path.into();
        self
    }

    pub fn with_bitmap_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bitmap_path = path.into();
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// VMAs found by the last [`collect_vmas`](Self::collect_vmas).
    pub fn vmas(&self) -> &[Vma] {
        &self.vmas
    }

    /// Probes the idle bitmap and sizes the buffer for it.
    ///
    /// Fails with [`CollectError::Setup`] when idle page tracking is
    /// missing or not accessible.
    pub fn init_buffer(&mut self) -> Result<(), CollectError> {
        if !self.fs.exists(&self.bitmap_path) {
            return Err(CollectError::Setup(format!(
                "{} not found; kernel needs CONFIG_IDLE_PAGE_TRACKING",
                self.bitmap_path.display()
            )));
        }
        let len = self
            .fs
            .read_into(&self.bitmap_path, &mut self.bitmap)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => CollectError::Setup(format!(
                    "cannot read {}: permission denied (run as root)",
                    self.bitmap_path.display()
                )),
                _ => CollectError::Setup(format!(
                    "cannot read {}: {}",
                    self.bitmap_path.display(),
                    e
                )),
            })?;
        debug!(bytes = len, "idle bitmap probed");
        Ok(())
    }

    /// Reads and filters `/proc/[pid]/maps`.
    ///
    /// Malformed lines are skipped. The result keeps the file's order.
    pub fn collect_vmas(&mut self, pid: u32) -> Result<&[Vma], CollectError> {
        let path = pid_file(&self.proc_path, pid, "maps");
        let content = pid_guard(pid, self.fs.read_to_string(&path))?;

        self.vmas.clear();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match Vma::parse_with_page_size(line, self.page_size) {
                Some(vma) if (self.filter)(&vma) => self.vmas.push(vma),
                Some(_) => {}
                None => warn!(pid, line, "skipping malformed maps line"),
            }
        }
        Ok(&self.vmas)
    }

    /// Reads the pagemap entries of every collected VMA.
    ///
    /// `callback` receives the first virtual page of the segment and its
    /// raw entries; it is called in ascending page order, at least once per
    /// VMA, possibly with an empty slice when nothing could be read.
    pub fn walk_page_table<C>(&mut self, pid: u32, callback: C) -> Result<(), CollectError>
    where
        C: FnMut(u64, &[u8]) -> Result<(), CollectError>,
    {
        let mut pagemap = self.open_pagemap(pid)?;
        walk_page_table(&mut pagemap, pid, &self.vmas, &mut self.pagemap, callback)
    }

    fn open_pagemap(&self, pid: u32) -> Result<F::Handle, CollectError> {
        let path = pid_file(&self.proc_path, pid, "pagemap");
        pid_guard(pid, self.fs.open(&path))
    }

    /// Resets the idle bit of every resident page in the collected VMAs.
    ///
    /// Only the target's frames are set; other bits of a bitmap word are
    /// written as zero, which the kernel ignores. Adjacent words are
    /// coalesced into one write per run, batched per VMA. Frames past the
    /// end of the last bitmap read are left alone.
    pub fn mark_idle(&mut self, pid: u32) -> Result<(), CollectError> {
        let mut pagemap = self.open_pagemap(pid)?;
        let mut bitmap = self.fs.open_write(&self.bitmap_path)?;
        let bitmap_len = self.bitmap.len() as u64;
        let words = &mut self.words;

        for vma in &self.vmas {
            words.clear();
            walk_page_table(
                &mut pagemap,
                pid,
                std::slice::from_ref(vma),
                &mut self.pagemap,
                |_, buf| {
                    words.extend(
                        entries(buf)
                            .filter(|&e| bits::is_resident(e))
                            .map(|e| {
                                let pfn = bits::pfn_of(e);
                                (bitmap_word_offset(pfn), bitmap_word_mask(pfn))
                            })
                            .filter(|&(offset, _)| offset < bitmap_len),
                    );
                    Ok(())
                },
            )?;
            write_idle_words(&mut bitmap, words, &mut self.run)?;
        }
        Ok(())
    }

    /// Returns the virtual pages accessed since the last [`mark_idle`](Self::mark_idle).
    pub fn read_idle(&mut self, pid: u32) -> Result<SortedRangeVector<u64>, CollectError> {
        self.fs.read_into(&self.bitmap_path, &mut self.bitmap)?;

        let mut pagemap = self.open_pagemap(pid)?;
        let bitmap = &self.bitmap;
        let mut pages = SortedRangeVector::new();
        walk_page_table(
            &mut pagemap,
            pid,
            &self.vmas,
            &mut self.pagemap,
            |first_page, buf| {
                for (i, entry) in entries(buf).enumerate() {
                    if bits::is_resident(entry) && bits::is_active(bits::pfn_of(entry), bitmap) {
                        pages.push(first_page + i as u64)?;
                    }
                }
                Ok(())
            },
        )?;
        Ok(pages)
    }

    /// Collects VMAs, reads the active pages and resets them to idle.
    pub fn sample(&mut self, pid: u32) -> Result<Sample, CollectError> {
        let start = Instant::now();
        self.collect_vmas(pid)?;
        let pages = self.read_idle(pid)?;
        self.mark_idle(pid)?;
        debug!(
            pid,
            vmas = self.vmas.len(),
            active = pages.sum(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "idle pages sampled"
        );
        Ok(Sample::new(self.vmas.clone(), pages))
    }
}

impl<F: FileSystem> Measurement for IdlePageTracker<F> {
    fn name(&self) -> &str {
        "idle_pages"
    }

    /// Sizes the bitmap buffer and marks the current pages idle, so the
    /// first sample covers only accesses after tracing started.
    fn initialize(&mut self, process: &SnoopedProcess) -> Result<(), CollectError> {
        self.init_buffer()?;
        self.collect_vmas(process.pid())?;
        self.mark_idle(process.pid())
    }

    fn measure(&mut self, process: &SnoopedProcess) -> Result<Reading, CollectError> {
        self.sample(process.pid()).map(Reading::IdlePages)
    }
}

fn walk_page_table<H, C>(
    pagemap: &mut H,
    pid: u32,
    vmas: &[Vma],
    buf: &mut Vec<u8>,
    mut callback: C,
) -> Result<(), CollectError>
where
    H: FileHandle,
    C: FnMut(u64, &[u8]) -> Result<(), CollectError>,
{
    for vma in vmas {
        let mut page = vma.start();
        loop {
            let count = (vma.stop() - page + 1).min(MAX_WALK_PAGES);
            let want = count as usize * PAGEMAP_ENTRY_SIZE;
            if buf.len() < want {
                buf.resize(want, 0);
            }
            let offset = page.saturating_mul(PAGEMAP_ENTRY_SIZE as u64);
            let got = pid_guard(pid, pagemap.read_at(offset, &mut buf[..want]))?;
            callback(page, &buf[..got - got % PAGEMAP_ENTRY_SIZE])?;

            // A short read means the rest of the VMA is unreadable.
            if got < want || page + count > vma.stop() {
                break;
            }
            page += count;
        }
    }
    Ok(())
}

/// Writes the pending masks, one write per run of adjacent words.
///
/// Masks aimed at the same word are merged first.
fn write_idle_words<H: FileHandle>(
    bitmap: &mut H,
    words: &mut Vec<(u64, u64)>,
    run: &mut Vec<u8>,
) -> Result<(), CollectError> {
    words.sort_unstable_by_key(|&(offset, _)| offset);
    words.dedup_by(|next, kept| {
        if next.0 == kept.0 {
            kept.1 |= next.1;
            true
        } else {
            false
        }
    });

    let mut i = 0;
    while i < words.len() {
        let start = words[i].0;
        run.clear();
        while i < words.len()
            && words[i].0 == start + run.len() as u64
            && run.len() < MAX_RESET_BYTES
        {
            run.extend_from_slice(&words[i].1.to_le_bytes());
            i += 1;
        }
        bitmap.write_at(start, run)?;
    }
    Ok(())
}
