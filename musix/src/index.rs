//! Partitioning of the global index space.
//!
//! Every process of a coupled run owns a subset of the global indices of a
//! port, for instance the identifiers of the neurons simulated locally. The
//! ownership is described by an [`IndexMap`], that is a finite collection of
//! [`IndexInterval`]s, each stating that a contiguous range of global indices
//! is stored contiguously in the local array.
//!
//! Two index maps are provided:
//!
//! * [`LinearIndex`], for a single contiguous block of global indices,
//! * [`PermutationIndex`], for an arbitrary list of global indices, which is
//!   coalesced into maximal contiguous runs.
//!
//! #### Example
//!
//! ```
//! use musix::index::{IndexMap, PermutationIndex};
//!
//! // Local positions 0..=4 hold global indices 7, 8, 9, 2, 3.
//! let index = PermutationIndex::new([7, 8, 9, 2, 3]).unwrap();
//!
//! let intervals = index.intervals();
//! assert_eq!(intervals.len(), 2);
//! assert_eq!(intervals[0].local_position(2), Some(3));
//! assert_eq!(intervals[1].local_position(9), Some(2));
//! ```

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// A global index.
pub type GlobalIndex = i64;

/// A half-open range `[begin, end)` of global indices owned by this process.
///
/// The `local` tag is the displacement between global and local positions: the
/// element with global index `i` is found at position `i - local` of the local
/// array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexInterval {
    begin: GlobalIndex,
    end: GlobalIndex,
    local: GlobalIndex,
}

impl IndexInterval {
    /// Creates a new interval.
    ///
    /// # Panics
    ///
    /// This method will panic if the interval is empty, i.e. if `begin >= end`.
    pub fn new(begin: GlobalIndex, end: GlobalIndex, local: GlobalIndex) -> Self {
        assert!(begin < end, "empty index interval [{begin}, {end})");

        Self { begin, end, local }
    }

    /// First global index of the interval.
    pub fn begin(&self) -> GlobalIndex {
        self.begin
    }

    /// Global index one past the last index of the interval.
    pub fn end(&self) -> GlobalIndex {
        self.end
    }

    /// Displacement between global indices and local positions.
    pub fn local(&self) -> GlobalIndex {
        self.local
    }

    /// Number of indices in the interval.
    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize
    }

    /// Always `false`, since intervals cannot be empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Checks whether the global index belongs to the interval.
    pub fn contains(&self, index: GlobalIndex) -> bool {
        self.begin <= index && index < self.end
    }

    /// Returns the local position of a global index, if it belongs to the
    /// interval and maps to a non-negative position.
    pub fn local_position(&self, index: GlobalIndex) -> Option<usize> {
        if !self.contains(index) {
            return None;
        }

        usize::try_from(index - self.local).ok()
    }
}

impl fmt::Display for IndexInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.begin, self.end, self.local)
    }
}

/// A description of the global indices owned by this process.
///
/// The order of the intervals is not significant.
pub trait IndexMap {
    /// Returns the intervals making up the index map.
    fn intervals(&self) -> &[IndexInterval];

    /// Returns the total number of indices owned by this process.
    fn len(&self) -> usize {
        self.intervals().iter().map(IndexInterval::len).sum()
    }

    /// Checks whether the index map owns no index.
    fn is_empty(&self) -> bool {
        self.intervals().is_empty()
    }
}

impl<T: IndexMap + ?Sized> IndexMap for Box<T> {
    fn intervals(&self) -> &[IndexInterval] {
        (**self).intervals()
    }
}

/// Error raised when an index map cannot be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexMapError {
    /// The same global index appears at several local positions.
    #[error("global index {index} is mapped to several local positions")]
    DuplicateIndex {
        /// The offending global index.
        index: GlobalIndex,
    },
}

/// A contiguous block of `size` global indices starting at `base_index`.
///
/// Global index `base_index` is stored at local position 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearIndex {
    interval: Option<IndexInterval>,
}

impl LinearIndex {
    /// Creates a linear index map; a null size yields an empty map.
    pub fn new(base_index: GlobalIndex, size: usize) -> Self {
        let interval = (size != 0).then(|| {
            IndexInterval::new(base_index, base_index + size as GlobalIndex, base_index)
        });

        Self { interval }
    }
}

impl IndexMap for LinearIndex {
    fn intervals(&self) -> &[IndexInterval] {
        self.interval.as_slice()
    }
}

/// An arbitrary assignment of global indices to local positions.
///
/// Local position `p` holds global index `indices[p]`. Runs of consecutive
/// global indices stored at consecutive positions are coalesced into a
/// single interval, so that a sorted list of indices yields as few intervals
/// as there are gaps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermutationIndex {
    intervals: Vec<IndexInterval>,
}

impl PermutationIndex {
    /// Builds the index map from the global indices of the local positions.
    pub fn new(indices: impl IntoIterator<Item = GlobalIndex>) -> Result<Self, IndexMapError> {
        let mut seen = HashSet::new();
        let mut intervals = Vec::new();
        // Current run: (first global index, first local position, length).
        let mut run: Option<(GlobalIndex, GlobalIndex, GlobalIndex)> = None;

        for (position, index) in indices.into_iter().enumerate() {
            if !seen.insert(index) {
                return Err(IndexMapError::DuplicateIndex { index });
            }
            let position = position as GlobalIndex;

            run = match run {
                Some((first, start, len)) if first + len == index => Some((first, start, len + 1)),
                Some((first, start, len)) => {
                    intervals.push(IndexInterval::new(first, first + len, first - start));
                    Some((index, position, 1))
                }
                None => Some((index, position, 1)),
            };
        }
        if let Some((first, start, len)) = run {
            intervals.push(IndexInterval::new(first, first + len, first - start));
        }

        intervals.sort_by_key(IndexInterval::begin);

        Ok(Self { intervals })
    }
}

impl IndexMap for PermutationIndex {
    fn intervals(&self) -> &[IndexInterval] {
        &self.intervals
    }
}
