//! Compressed, append-only ordered set of unsigned integers.
//!
//! Page activity is strongly clustered, so storing closed ranges instead of
//! individual page numbers keeps a sample touching millions of pages down to
//! a handful of entries.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Unsigned integer types usable as [`SortedRangeVector`] elements.
pub trait Unsigned: Copy + Ord + fmt::Debug {
    /// `self + 1`, or `None` on overflow.
    fn checked_succ(self) -> Option<Self>;
    /// Number of elements in `lo..=hi`.
    fn span(lo: Self, hi: Self) -> u64;
}

macro_rules! impl_unsigned {
    ($($t:ty),*) => {
        $(
            impl Unsigned for $t {
                fn checked_succ(self) -> Option<Self> {
                    self.checked_add(1)
                }

                fn span(lo: Self, hi: Self) -> u64 {
                    ((hi - lo) as u64).saturating_add(1)
                }
            }
        )*
    };
}

impl_unsigned!(u8, u16, u32, u64, usize);

/// An element was pushed below the current tail of the vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeOrderError {
    pub last: String,
    pub pushed: String,
}

impl fmt::Display for RangeOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out-of-order push: {} is below the last stored element {}",
            self.pushed, self.last
        )
    }
}

impl std::error::Error for RangeOrderError {}

/// Sorted list of disjoint, non-adjacent closed ranges.
///
/// For consecutive ranges `a`, `b`: `a.end() + 1 < b.start()`.
/// Deserialized input must already be in this form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "RawRanges<T>",
    bound(deserialize = "T: Unsigned + Deserialize<'de>")
)]
pub struct SortedRangeVector<T> {
    ranges: Vec<RangeInclusive<T>>,
}

/// Unchecked wire form of [`SortedRangeVector`].
#[derive(Deserialize)]
struct RawRanges<T> {
    ranges: Vec<RangeInclusive<T>>,
}

impl<T: Unsigned> TryFrom<RawRanges<T>> for SortedRangeVector<T> {
    type Error = String;

    fn try_from(raw: RawRanges<T>) -> Result<Self, Self::Error> {
        let mut v = Self::new();
        for range in raw.ranges {
            if range.start() > range.end() {
                return Err(format!("empty range {:?}", range));
            }
            let count = v.ranges.len();
            v.push_range(range.clone()).map_err(|e| e.to_string())?;
            if v.ranges.len() == count {
                return Err(format!("range {:?} overlaps or touches the previous one", range));
            }
        }
        Ok(v)
    }
}

impl<T> Default for SortedRangeVector<T> {
    fn default() -> Self {
        Self { ranges: Vec::new() }
    }
}

impl<T: Unsigned> SortedRangeVector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vector from elements in non-decreasing order.
    pub fn from_sorted(items: impl IntoIterator<Item = T>) -> Result<Self, RangeOrderError> {
        let mut v = Self::new();
        for x in items {
            v.push(x)?;
        }
        Ok(v)
    }

    /// Appends `x`, extending the last range when `x` is inside or adjacent to it.
    pub fn push(&mut self, x: T) -> Result<(), RangeOrderError> {
        self.push_range(x..=x)
    }

    /// Appends `range`, merging it into the last range when they overlap or touch.
    ///
    /// `range.start()` must not be below the start of the last stored range.
    /// Empty ranges are ignored.
    pub fn push_range(&mut self, range: RangeInclusive<T>) -> Result<(), RangeOrderError> {
        let (lo, hi) = (*range.start(), *range.end());
        if lo > hi {
            return Ok(());
        }
        let Some(last) = self.ranges.last_mut() else {
            self.ranges.push(range);
            return Ok(());
        };
        let (last_lo, last_hi) = (*last.start(), *last.end());
        if lo < last_lo {
            return Err(RangeOrderError {
                last: format!("{:?}", last_hi),
                pushed: format!("{:?}", lo),
            });
        }
        let touches = match last_hi.checked_succ() {
            Some(next) => lo <= next,
            None => true,
        };
        if touches {
            if hi > last_hi {
                *last = last_lo..=hi;
            }
        } else {
            self.ranges.push(range);
        }
        Ok(())
    }

    /// Membership test, `O(log ranges)`.
    pub fn contains(&self, x: T) -> bool {
        let idx = self.ranges.partition_point(|r| *r.end() < x);
        self.ranges.get(idx).is_some_and(|r| *r.start() <= x)
    }

    /// Total number of elements stored.
    pub fn sum(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| T::span(*r.start(), *r.end()))
            .sum()
    }

    /// Largest element, if any.
    pub fn last_element(&self) -> Option<T> {
        self.ranges.last().map(|r| *r.end())
    }

    /// The stored ranges in ascending order.
    pub fn ranges(&self) -> &[RangeInclusive<T>] {
        &self.ranges
    }

    /// Number of stored ranges.
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterates over every element in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.ranges.iter().flat_map(|r| {
            let hi = *r.end();
            std::iter::successors(Some(*r.start()), move |&x| {
                if x < hi { x.checked_succ() } else { None }
            })
        })
    }

    /// Set union of `self` and `other`, `O(|self| + |other|)`.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = Self {
            ranges: Vec::with_capacity(self.ranges.len() + other.ranges.len()),
        };
        let (mut a, mut b) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x.start() <= y.start() => a.next(),
                (Some(_), Some(_)) => b.next(),
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            if let Some(r) = next {
                out.merge_sorted(r.clone());
            }
        }
        out
    }

    /// `push_range` for input already known to be sorted by start.
    fn merge_sorted(&mut self, range: RangeInclusive<T>) {
        // Starts arrive in non-decreasing order, so this cannot fail.
        let _ = self.push_range(range);
    }
}
