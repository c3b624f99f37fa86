//! Virtual memory areas parsed from `/proc/[pid]/maps`.
//!
//! A [`Vma`] stores its range as virtual page numbers (inclusive on both
//! ends) plus the unparsed remainder of the maps line. Only the page range
//! takes part in the interval algebra; the remainder is carried along for
//! filtering and display.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Page size assumed by [`Vma::parse`].
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// A contiguous range of virtual pages with uniform permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vma {
    start: u64,
    stop: u64,
    remainder: String,
}

impl Vma {
    /// Creates a VMA covering pages `start..=stop`.
    pub fn new(start: u64, stop: u64, remainder: impl Into<String>) -> Self {
        debug_assert!(start <= stop, "VMA start {start:#x} after stop {stop:#x}");
        Self {
            start,
            stop,
            remainder: remainder.into(),
        }
    }

    /// Parses one line of `/proc/[pid]/maps` assuming 4 KiB pages.
    ///
    /// Returns `None` for lines that do not look like a maps entry.
    pub fn parse(line: &str) -> Option<Self> {
        Self::parse_with_page_size(line, DEFAULT_PAGE_SIZE)
    }

    /// Parses one line of `/proc/[pid]/maps`.
    ///
    /// Format: `start-stop perms offset dev:dev inode [path]`, addresses in
    /// hex, `stop` exclusive.
    pub fn parse_with_page_size(line: &str, page_size: u64) -> Option<Self> {
        if page_size == 0 {
            return None;
        }
        let line = line.trim();
        let (range, remainder) = line.split_once(|c: char| c.is_ascii_whitespace())?;
        let (start, stop) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let stop = u64::from_str_radix(stop, 16).ok()?;
        if stop <= start {
            return None;
        }

        let remainder = remainder.trim_start();
        if !valid_permissions(remainder.split_ascii_whitespace().next()?) {
            return None;
        }

        Some(Self {
            start: start / page_size,
            stop: (stop - 1) / page_size,
            remainder: remainder.to_string(),
        })
    }

    /// First virtual page number.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last virtual page number (inclusive).
    pub fn stop(&self) -> u64 {
        self.stop
    }

    /// Unparsed remainder of the maps line (permissions onwards).
    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// Number of pages covered.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    /// First virtual address of the VMA.
    pub fn start_address(&self, page_size: u64) -> u64 {
        self.start * page_size
    }

    /// Last valid virtual address of the VMA.
    pub fn stop_address(&self, page_size: u64) -> u64 {
        (self.stop + 1) * page_size - 1
    }

    /// Permission field, e.g. `rw-p`.
    pub fn permissions(&self) -> &str {
        self.remainder.split_ascii_whitespace().next().unwrap_or("")
    }

    /// Mapped path or pseudo-path (`[heap]`, `[stack]`), empty for anonymous maps.
    pub fn path(&self) -> &str {
        let mut rest = self.remainder.as_str();
        // perms, offset, dev, inode
        for _ in 0..4 {
            rest = rest.trim_start();
            match rest.find(|c: char| c.is_ascii_whitespace()) {
                Some(end) => rest = &rest[end..],
                None => return "",
            }
        }
        rest.trim()
    }

    fn permission(&self, idx: usize, flag: u8) -> bool {
        self.permissions().as_bytes().get(idx) == Some(&flag)
    }

    pub fn is_heap(&self) -> bool {
        self.path() == "[heap]"
    }

    pub fn is_readable(&self) -> bool {
        self.permission(0, b'r')
    }

    pub fn is_writable(&self) -> bool {
        self.permission(1, b'w')
    }

    pub fn is_executable(&self) -> bool {
        self.permission(2, b'x')
    }

    /// True if the VMA is readable, writable or executable.
    pub fn flag_set(&self) -> bool {
        self.is_readable() || self.is_writable() || self.is_executable()
    }

    /// True if the VMA spans more than `pages` pages.
    pub fn longer_than(&self, pages: u64) -> bool {
        self.len() > pages
    }

    /// True if the page ranges of `self` and `other` intersect.
    pub fn overlaps(&self, other: &Vma) -> bool {
        self.start <= other.stop && other.start <= self.stop
    }

    /// True if `other` fully contains `self`.
    pub fn is_subset_of(&self, other: &Vma) -> bool {
        other.start <= self.start && self.stop <= other.stop
    }

    /// Smallest VMA covering both `self` and `other`.
    ///
    /// Meant for overlapping VMAs; the remainder is taken from the longer
    /// of the two (from `self` on a tie).
    pub fn union(&self, other: &Vma) -> Vma {
        let remainder = if other.len() > self.len() {
            &other.remainder
        } else {
            &self.remainder
        };
        Vma {
            start: self.start.min(other.start),
            stop: self.stop.max(other.stop),
            remainder: remainder.clone(),
        }
    }
}

impl fmt::Display for Vma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x} {}",
            self.start_address(DEFAULT_PAGE_SIZE),
            self.stop_address(DEFAULT_PAGE_SIZE) + 1,
            self.remainder
        )
    }
}

fn valid_permissions(perms: &str) -> bool {
    let b = perms.as_bytes();
    b.len() == 4
        && matches!(b[0], b'r' | b'-')
        && matches!(b[1], b'w' | b'-')
        && matches!(b[2], b'x' | b'-')
        && matches!(b[3], b'p' | b's')
}

/// Returns a predicate accepting VMAs longer than `pages` pages.
pub fn longer_than(pages: u64) -> impl Fn(&Vma) -> bool + Clone {
    move |vma| vma.longer_than(pages)
}

/// Returns the VMAs satisfying `predicate`, preserving order.
pub fn filter<'a, P>(vmas: impl IntoIterator<Item = &'a Vma>, predicate: P) -> Vec<Vma>
where
    P: Fn(&Vma) -> bool,
{
    vmas.into_iter().filter(|v| predicate(v)).cloned().collect()
}

/// Returns the smallest sorted, pairwise-disjoint cover of `vmas`.
///
/// Every input VMA is a subset of exactly one output VMA. Overlapping
/// inputs are merged; inputs that merely touch stay separate.
pub fn compact(vmas: impl IntoIterator<Item = Vma>) -> Vec<Vma> {
    let mut sorted: Vec<Vma> = vmas.into_iter().collect();
    sorted.sort_by_key(|v| (v.start, v.stop));

    let mut out: Vec<Vma> = Vec::with_capacity(sorted.len());
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return out;
    };
    for vma in iter {
        if current.overlaps(&vma) {
            current = current.union(&vma);
        } else {
            out.push(std::mem::replace(&mut current, vma));
        }
    }
    out.push(current);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAP: &str = "01a2d000-01a4e000 rw-p 00000000 00:00 0                                  [heap]";
    const TEXT: &str = "00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/dbus-daemon";

    #[test]
    fn test_parse_heap_line() {
        let vma = Vma::parse(HEAP).unwrap();
        assert_eq!(vma.start(), 0x1a2d);
        assert_eq!(vma.stop(), 0x1a4d);
        assert_eq!(vma.len(), 0x21);
        assert_eq!(vma.permissions(), "rw-p");
        assert_eq!(vma.path(), "[heap]");
        assert!(vma.is_heap());
        assert!(vma.is_readable());
        assert!(vma.is_writable());
        assert!(!vma.is_executable());
    }

    #[test]
    fn test_parse_text_line() {
        let vma = Vma::parse(TEXT).unwrap();
        assert_eq!(vma.start_address(4096), 0x400000);
        assert_eq!(vma.stop_address(4096), 0x451fff);
        assert_eq!(vma.path(), "/usr/bin/dbus-daemon");
        assert!(vma.is_executable());
        assert!(!vma.is_writable());
        assert!(!vma.is_heap());
    }

    #[test]
    fn test_parse_anonymous_and_path_with_spaces() {
        let anon = Vma::parse("7f0000000000-7f0000001000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(anon.path(), "");
        assert_eq!(anon.len(), 1);

        let spaced =
            Vma::parse("7f0000001000-7f0000003000 r--s 00000000 08:02 42   /tmp/my file (deleted)")
                .unwrap();
        assert_eq!(spaced.path(), "/tmp/my file (deleted)");
        assert_eq!(spaced.len(), 2);
    }

    #[test]
    fn test_parse_with_large_page_size() {
        let vma = Vma::parse_with_page_size("00400000-00800000 rw-p 0 00:00 0", 0x200000).unwrap();
        assert_eq!(vma.start(), 2);
        assert_eq!(vma.stop(), 3);
    }

    #[test]
    fn test_parse_malformed_lines() {
        assert!(Vma::parse("").is_none());
        assert!(Vma::parse("garbage").is_none());
        assert!(Vma::parse("zzzz-0040 rw-p 0 00:00 0").is_none());
        assert!(Vma::parse("00400000 rw-p 0 00:00 0").is_none());
        assert!(Vma::parse("00400000-00300000 rw-p 0 00:00 0").is_none());
        assert!(Vma::parse("00400000-00500000 rwzp 0 00:00 0").is_none());
        assert!(Vma::parse("00400000-00500000").is_none());
        assert!(Vma::parse_with_page_size(HEAP, 0).is_none());
    }

    #[test]
    fn test_flag_set_and_longer_than() {
        let none = Vma::new(0, 9, "---p 00000000 00:00 0");
        let exec = Vma::new(0, 9, "--xp 00000000 00:00 0");
        assert!(!none.flag_set());
        assert!(exec.flag_set());

        assert!(none.longer_than(9));
        assert!(!none.longer_than(10));
        let pred = longer_than(5);
        assert!(pred(&none));
    }

    #[test]
    fn test_overlap_and_subset() {
        let a = Vma::new(10, 20, "");
        let b = Vma::new(15, 30, "");
        let c = Vma::new(21, 25, "");
        let inner = Vma::new(12, 18, "");

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));

        assert!(inner.is_subset_of(&a));
        assert!(a.is_subset_of(&a));
        assert!(!a.is_subset_of(&inner));
        assert!(!b.is_subset_of(&a));
    }

    #[test]
    fn test_union_keeps_longer_remainder() {
        let a = Vma::new(10, 12, "short");
        let b = Vma::new(11, 30, "long");
        let u = a.union(&b);
        assert_eq!(u.start(), 10);
        assert_eq!(u.stop(), 30);
        assert_eq!(u.remainder(), "long");
        assert_eq!(b.union(&a), u);
    }

    #[test]
    fn test_filter_preserves_order() {
        let vmas = vec![
            Vma::parse(TEXT).unwrap(),
            Vma::parse(HEAP).unwrap(),
            Vma::parse("7ffd00000000-7ffd00021000 rw-p 00000000 00:00 0 [stack]").unwrap(),
        ];
        let writable = filter(&vmas, |v| v.is_writable());
        assert_eq!(writable.len(), 2);
        assert!(writable[0].is_heap());
        assert_eq!(writable[1].path(), "[stack]");

        let combined = filter(&vmas, |v| v.is_writable() && v.longer_than(0x21));
        assert_eq!(combined.len(), 0);
    }

    #[test]
    fn test_display_round_trips_address_form() {
        let vma = Vma::parse(HEAP).unwrap();
        let text = vma.to_string();
        assert!(text.starts_with("1a2d000-1a4e000 rw-p"));
        assert_eq!(Vma::parse(&text), Some(vma));
    }

    #[test]
    fn test_compact_merges_overlaps() {
        let vmas = vec![
            Vma::new(50, 60, ""),
            Vma::new(1, 5, ""),
            Vma::new(3, 10, ""),
            Vma::new(11, 12, ""),
            Vma::new(55, 70, ""),
            Vma::new(4, 4, ""),
        ];
        let compacted = compact(vmas);
        let ranges: Vec<(u64, u64)> = compacted.iter().map(|v| (v.start(), v.stop())).collect();
        assert_eq!(ranges, vec![(1, 10), (11, 12), (50, 70)]);
    }

    #[test]
    fn test_compact_empty() {
        assert!(compact(Vec::new()).is_empty());
    }

    /// Deterministic xorshift generator so the property tests need no extra crates.
    fn xorshift(state: &mut u64) -> u64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    fn random_vmas(seed: u64, count: usize) -> Vec<Vma> {
        let mut s = seed;
        (0..count)
            .map(|_| {
                let start = xorshift(&mut s) % 500;
                let len = xorshift(&mut s) % 40;
                Vma::new(start, start + len, "")
            })
            .collect()
    }

    #[test]
    fn test_compact_cover_properties() {
        for seed in 1..50u64 {
            let input = random_vmas(seed, 30);
            let out = compact(input.clone());

            for pair in out.windows(2) {
                assert!(pair[0].stop() < pair[1].start(), "not sorted/disjoint: {pair:?}");
            }
            for vma in &input {
                let covering = out.iter().filter(|o| vma.is_subset_of(o)).count();
                assert_eq!(covering, 1, "{vma:?} covered {covering} times");
            }
            assert_eq!(compact(out.clone()), out, "compact is not idempotent");

            let mut reversed = input.clone();
            reversed.reverse();
            let ranges = |v: &[Vma]| v.iter().map(|x| (x.start(), x.stop())).collect::<Vec<_>>();
            assert_eq!(ranges(&compact(reversed)), ranges(&out));
        }
    }
}
