//! Per-round samples and the trace that collects them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::range_vector::SortedRangeVector;
use super::vma::{Vma, compact};

/// One measurement round: the VMAs walked and the pages found active.
///
/// Pages are virtual page numbers; multiply by the page size for an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    vmas: Vec<Vma>,
    pages: SortedRangeVector<u64>,
}

impl Sample {
    pub fn new(vmas: Vec<Vma>, pages: SortedRangeVector<u64>) -> Self {
        Self { vmas, pages }
    }

    pub fn vmas(&self) -> &[Vma] {
        &self.vmas
    }

    pub fn pages(&self) -> &SortedRangeVector<u64> {
        &self.pages
    }

    /// Working set size in pages.
    pub fn wss(&self) -> u64 {
        self.pages.sum()
    }

    /// True if `page` was active during this sample.
    pub fn is_active(&self, page: u64) -> bool {
        self.pages.contains(page)
    }

    /// Materializes the active pages as a set.
    pub fn active_pages(&self) -> HashSet<u64> {
        self.pages.iter().collect()
    }

    /// Merges two samples: VMAs are compacted, pages unioned.
    pub fn union(&self, other: &Sample) -> Sample {
        Sample {
            vmas: compact(self.vmas.iter().chain(&other.vmas).cloned()),
            pages: self.pages.union(&other.pages),
        }
    }
}

/// Ordered, append-only sequence of samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    samples: Vec<Sample>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Sample> {
        self.samples.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Working set size of every sample, in order.
    pub fn wss(&self) -> Vec<u64> {
        self.samples.iter().map(Sample::wss).collect()
    }

    /// Every page active in at least one sample, sorted and deduplicated.
    pub fn active_pages(&self) -> Vec<u64> {
        self.samples
            .iter()
            .fold(SortedRangeVector::new(), |acc, s| acc.union(s.pages()))
            .iter()
            .collect()
    }

    /// Minimal disjoint cover of every VMA seen in any sample.
    pub fn vma_union(&self) -> Vec<Vma> {
        compact(self.samples.iter().flat_map(|s| s.vmas().iter().cloned()))
    }

    /// Page-by-sample activity grid for the pages of `vma`.
    pub fn activity_bitmap(&self, vma: &Vma) -> ActivityBitmap<'_> {
        ActivityBitmap {
            trace: self,
            start: vma.start(),
            rows: vma.len(),
        }
    }
}

impl FromIterator<Sample> for Trace {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Lazy view of page activity: row = page offset within the VMA,
/// column = sample index.
#[derive(Debug, Clone, Copy)]
pub struct ActivityBitmap<'a> {
    trace: &'a Trace,
    start: u64,
    rows: u64,
}

impl ActivityBitmap<'_> {
    /// Number of pages in the VMA.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Number of samples in the trace.
    pub fn cols(&self) -> usize {
        self.trace.len()
    }

    /// True if page `row` of the VMA was active in sample `col`.
    ///
    /// Out-of-range coordinates read as inactive.
    pub fn get(&self, row: u64, col: usize) -> bool {
        row < self.rows
            && self
                .trace
                .get(col)
                .is_some_and(|s| s.is_active(self.start + row))
    }

    /// Row `row` as a vector over samples.
    pub fn row(&self, row: u64) -> Vec<bool> {
        (0..self.cols()).map(|col| self.get(row, col)).collect()
    }

    /// Materializes the whole grid, row-major.
    pub fn to_grid(&self) -> Vec<Vec<bool>> {
        (0..self.rows).map(|row| self.row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(vmas: &[(u64, u64)], pages: &[u64]) -> Sample {
        Sample::new(
            vmas.iter()
                .map(|&(a, b)| Vma::new(a, b, "rw-p 00000000 00:00 0"))
                .collect(),
            SortedRangeVector::from_sorted(pages.iter().copied()).unwrap(),
        )
    }

    #[test]
    fn test_sample_wss_and_membership() {
        let s = sample(&[(100, 199)], &[100, 101, 102, 150]);
        assert_eq!(s.wss(), 4);
        assert!(s.is_active(101));
        assert!(!s.is_active(103));
        assert_eq!(s.active_pages(), HashSet::from([100, 101, 102, 150]));
    }

    #[test]
    fn test_sample_union() {
        let a = sample(&[(100, 199)], &[100, 101]);
        let b = sample(&[(150, 250), (400, 410)], &[102, 400]);
        let u = a.union(&b);

        let vmas: Vec<(u64, u64)> = u.vmas().iter().map(|v| (v.start(), v.stop())).collect();
        assert_eq!(vmas, vec![(100, 250), (400, 410)]);
        assert_eq!(u.wss(), 4);
        assert_eq!(u.pages().range_count(), 2);
    }

    #[test]
    fn test_trace_wss_series() {
        let trace: Trace = vec![
            sample(&[(0, 9)], &[]),
            sample(&[(0, 9)], &[1, 2, 3]),
            sample(&[(0, 9)], &[9]),
        ]
        .into_iter()
        .collect();

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.wss(), vec![0, 3, 1]);
    }

    #[test]
    fn test_trace_active_pages_sorted_dedup() {
        let mut trace = Trace::new();
        trace.push(sample(&[(0, 99)], &[5, 6, 40]));
        trace.push(sample(&[(0, 99)], &[1, 5, 7]));
        trace.push(sample(&[(0, 99)], &[]));

        assert_eq!(trace.active_pages(), vec![1, 5, 6, 7, 40]);
        assert!(Trace::new().active_pages().is_empty());
    }

    #[test]
    fn test_trace_vma_union_handles_growth() {
        let mut trace = Trace::new();
        trace.push(sample(&[(10, 20), (100, 110)], &[]));
        // Heap grew and a new mapping appeared.
        trace.push(sample(&[(10, 30), (100, 110), (500, 501)], &[]));
        // Mapping moved.
        trace.push(sample(&[(25, 40)], &[]));

        let union = trace.vma_union();
        let ranges: Vec<(u64, u64)> = union.iter().map(|v| (v.start(), v.stop())).collect();
        assert_eq!(ranges, vec![(10, 40), (100, 110), (500, 501)]);

        for s in &trace {
            for vma in s.vmas() {
                assert_eq!(union.iter().filter(|u| vma.is_subset_of(u)).count(), 1);
            }
        }
    }

    #[test]
    fn test_activity_bitmap() {
        let mut trace = Trace::new();
        trace.push(sample(&[(10, 13)], &[10, 12]));
        trace.push(sample(&[(10, 13)], &[13]));

        let vma = Vma::new(10, 13, "");
        let bitmap = trace.activity_bitmap(&vma);
        assert_eq!(bitmap.rows(), 4);
        assert_eq!(bitmap.cols(), 2);
        assert_eq!(
            bitmap.to_grid(),
            vec![
                vec![true, false],
                vec![false, false],
                vec![true, false],
                vec![false, true],
            ]
        );
        assert!(!bitmap.get(4, 0));
        assert!(!bitmap.get(0, 2));
    }
}
