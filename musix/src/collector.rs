//! Reassembly of fragmented per-tick data into a local array.
//!
//! A [`Collector`] receives, on each tick, one block of bytes from each of its
//! sources. Each block is the concatenation of the fragments the remote
//! sender packed for this process, in ascending order of global index. The
//! collector scatters these fragments to their positions in the local array.
//!
//! # Lifecycle
//!
//! 1. [`configure`](Collector::configure) binds the local [`DataMap`] and the
//!    ceiling on buffered bytes,
//! 2. [`add_source`](Collector::add_source) and
//!    [`add_routing_interval`](Collector::add_routing_interval) register the
//!    global index ranges each source delivers,
//! 3. [`initialize`](Collector::initialize) resolves every index range against
//!    the local index map, once and for all, turning it into a byte range of
//!    the local array,
//! 4. [`collect`](Collector::collect) is then called once per tick.
//!
//! #### Example
//!
//! ```
//! use musix::buffer::BlockQueue;
//! use musix::collector::{Collection, Collector};
//! use musix::data::{ArrayData, DataType};
//! use musix::index::{IndexInterval, LinearIndex};
//!
//! // This process owns global indices 10..14 of an array of bytes.
//! let data = ArrayData::new(DataType::Byte, 4, LinearIndex::new(10, 4));
//!
//! let mut collector = Collector::new();
//! collector.configure(data, 1024);
//! let source = collector.add_source(BlockQueue::new()).unwrap();
//! collector
//!     .add_routing_interval(IndexInterval::new(12, 14, 0), source)
//!     .unwrap();
//! collector
//!     .add_routing_interval(IndexInterval::new(10, 11, 0), source)
//!     .unwrap();
//! collector.initialize().unwrap();
//!
//! // The sender packs indices 10, 12, 13 in this order.
//! collector.source_mut(source).unwrap().push([1u8, 2, 3]).unwrap();
//! assert_eq!(collector.collect().unwrap(), Collection::Complete);
//!
//! use musix::data::DataMap;
//! assert_eq!(collector.data_map().unwrap().base(), &[1, 0, 2, 3]);
//! ```

use std::fmt;

use slab::Slab;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::buffer::SourceBuffer;
use crate::data::DataMap;
use crate::index::{GlobalIndex, IndexInterval, IndexMap};
use crate::util::interval_tree::IntervalTree;
use crate::ErrorScope;

/// Unique identifier of a source registered in a [`Collector`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(usize);

/// A range of global indices requested from a source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexRange {
    begin: GlobalIndex,
    length: usize,
}

impl IndexRange {
    /// First global index of the range.
    pub fn begin(&self) -> GlobalIndex {
        self.begin
    }

    /// Number of indices in the range.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Global index one past the end of the range.
    pub fn end(&self) -> GlobalIndex {
        self.begin + self.length as GlobalIndex
    }

    /// Converts the index range into a byte range of the local array, given
    /// the displacement of the local interval it belongs to.
    ///
    /// Returns `None` if the range would start before the local array or if
    /// its byte bounds are not representable.
    fn into_bytes(self, local: GlobalIndex, element_size: usize) -> Option<ByteRange> {
        let position = usize::try_from(self.begin.checked_sub(local)?).ok()?;
        let begin = element_size.checked_mul(position)?;
        let length = element_size.checked_mul(self.length)?;
        // `ByteRange::end` must not overflow.
        begin.checked_add(length)?;

        Some(ByteRange { begin, length })
    }
}

impl From<IndexInterval> for IndexRange {
    fn from(interval: IndexInterval) -> Self {
        Self {
            begin: interval.begin(),
            length: interval.len(),
        }
    }
}

/// A range of bytes of the local array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    begin: usize,
    length: usize,
}

impl ByteRange {
    /// Offset of the first byte.
    pub fn begin(&self) -> usize {
        self.begin
    }

    /// Number of bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> usize {
        self.begin + self.length
    }
}

/// Behavior of [`Collector::collect`] when a source reports exhaustion.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExhaustionPolicy {
    /// Return immediately, leaving the ranges of the exhausted source and of
    /// all sources not yet visited untouched.
    #[default]
    AbortPass,
    /// Leave the ranges of the exhausted source untouched but keep collecting
    /// from the other sources.
    SkipSource,
}

/// Validation performed by [`Collector::initialize`] on the routing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RoutingValidation {
    /// Reject byte ranges that overlap, within a source or across sources.
    #[default]
    Strict,
    /// Accept overlapping byte ranges; the last source collected wins.
    Permissive,
}

/// Outcome of a collection pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    /// All sources delivered a block.
    Complete,
    /// At least one source was exhausted.
    Exhausted,
}

/// Error returned when a collector is misconfigured or misused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// The collector was not bound to a data map.
    #[error("the collector is not configured")]
    NotConfigured,
    /// Collection was requested before initialization.
    #[error("the collector is not initialized")]
    NotInitialized,
    /// The routing was already converted to byte ranges.
    #[error("the collector is already initialized")]
    AlreadyInitialized,
    /// The source identifier was not issued by this collector.
    #[error("unknown source")]
    UnknownSource,
    /// No local interval contains the start of a routing interval.
    #[error("global index {index} is not mapped locally")]
    UnmappedIndex {
        /// The unmapped global index.
        index: GlobalIndex,
    },
    /// Several local intervals contain the start of a routing interval.
    #[error("global index {index} is mapped by several local intervals")]
    AmbiguousIndex {
        /// The ambiguous global index.
        index: GlobalIndex,
    },
    /// A routing interval is only partially covered by its local interval.
    #[error("routing interval [{begin}, {end}) extends past its local interval")]
    PartiallyMapped {
        /// First global index of the routing interval.
        begin: GlobalIndex,
        /// End of the routing interval.
        end: GlobalIndex,
    },
    /// A routing interval maps outside of the local array.
    #[error("routing interval [{begin}, {end}) maps outside of the local array")]
    OutOfBounds {
        /// First global index of the routing interval.
        begin: GlobalIndex,
        /// End of the routing interval.
        end: GlobalIndex,
    },
    /// Two routing intervals target overlapping bytes of the local array.
    #[error("routing intervals overlap at byte offset {offset}")]
    OverlappingRoutes {
        /// First byte written twice.
        offset: usize,
    },
    /// A source delivered a block smaller than its routing requires.
    #[error("block of {actual} bytes is smaller than the expected {expected} bytes")]
    ShortBlock {
        /// Expected block size.
        expected: usize,
        /// Size of the delivered block.
        actual: usize,
    },
    /// The destination cannot hold all routed bytes.
    #[error("destination of {actual} bytes is smaller than the required {required} bytes")]
    DestinationTooSmall {
        /// Minimum destination size.
        required: usize,
        /// Size of the provided destination.
        actual: usize,
    },
}

impl CollectorError {
    /// Reports whether the error concerns only the calling rank or the whole
    /// run.
    ///
    /// All collector errors stem from a local misconfiguration.
    pub fn scope(&self) -> ErrorScope {
        ErrorScope::Rank
    }
}

/// A registered source and its routing.
struct Source<B> {
    buffer: B,
    /// Index ranges registered but not yet converted.
    pending: Vec<IndexRange>,
    /// Byte ranges sorted by ascending global index.
    routes: Vec<ByteRange>,
    /// Sum of the lengths of `routes`.
    block_size: usize,
}

/// Scatters per-tick data blocks from several sources into a local array.
///
/// See the [module-level documentation](self) for the lifecycle.
pub struct Collector<D, B> {
    data_map: Option<D>,
    max_buffered: usize,
    sources: Slab<Source<B>>,
    is_initialized: bool,
    /// Size of the smallest destination able to hold all routed bytes.
    extent: usize,
    exhaustion_policy: ExhaustionPolicy,
    validation: RoutingValidation,
}

impl<D: DataMap, B: SourceBuffer> Collector<D, B> {
    /// Creates an unconfigured collector with the default policies.
    pub fn new() -> Self {
        Self::with_policies(ExhaustionPolicy::default(), RoutingValidation::default())
    }

    /// Creates an unconfigured collector with the specified policies.
    pub fn with_policies(
        exhaustion_policy: ExhaustionPolicy,
        validation: RoutingValidation,
    ) -> Self {
        Self {
            data_map: None,
            max_buffered: 0,
            sources: Slab::new(),
            is_initialized: false,
            extent: 0,
            exhaustion_policy,
            validation,
        }
    }

    /// Binds the collector to a data map and sets the ceiling on the number of
    /// bytes the sources may buffer.
    ///
    /// Reconfiguring a collector starts a new configuration epoch: the
    /// routing of all sources is discarded, while the sources themselves are
    /// kept.
    pub fn configure(&mut self, data_map: D, max_buffered: usize) {
        self.data_map = Some(data_map);
        self.max_buffered = max_buffered;
        self.is_initialized = false;
        self.extent = 0;
        for (_, source) in self.sources.iter_mut() {
            source.pending.clear();
            source.routes.clear();
            source.block_size = 0;
        }
    }

    /// Registers a source buffer and returns its identifier.
    pub fn add_source(&mut self, buffer: B) -> Result<SourceId, CollectorError> {
        if self.is_initialized {
            return Err(CollectorError::AlreadyInitialized);
        }
        let key = self.sources.insert(Source {
            buffer,
            pending: Vec::new(),
            routes: Vec::new(),
            block_size: 0,
        });

        Ok(SourceId(key))
    }

    /// Registers a range of global indices delivered by a source.
    ///
    /// The local displacement of the interval is ignored: only its global
    /// range matters. A source may deliver several ranges, in any order.
    pub fn add_routing_interval(
        &mut self,
        interval: IndexInterval,
        source: SourceId,
    ) -> Result<(), CollectorError> {
        if self.data_map.is_none() {
            return Err(CollectorError::NotConfigured);
        }
        if self.is_initialized {
            return Err(CollectorError::AlreadyInitialized);
        }
        let source = self
            .sources
            .get_mut(source.0)
            .ok_or(CollectorError::UnknownSource)?;
        source.pending.push(interval.into());

        Ok(())
    }

    /// Resolves all registered index ranges into byte ranges of the local
    /// array and configures the source buffers.
    ///
    /// This must be called exactly once, after all routing intervals were
    /// added and before the first collection. On error the collector is left
    /// unchanged.
    pub fn initialize(&mut self) -> Result<(), CollectorError> {
        if self.is_initialized {
            return Err(CollectorError::AlreadyInitialized);
        }
        let data_map = self.data_map.as_ref().ok_or(CollectorError::NotConfigured)?;
        let element_size = data_map.data_type().size();
        let array_len = data_map.base().len();
        let tree = build_tree(data_map.index_map());

        let mut resolved = Vec::with_capacity(self.sources.len());
        for (key, source) in self.sources.iter() {
            let mut pending = source.pending.clone();
            pending.sort_by_key(IndexRange::begin);

            let mut routes = Vec::with_capacity(pending.len());
            for range in pending {
                let route = resolve(&tree, range, element_size)?;
                if route.end() > array_len {
                    return Err(CollectorError::OutOfBounds {
                        begin: range.begin(),
                        end: range.end(),
                    });
                }
                routes.push(route);
            }
            resolved.push((key, routes));
        }

        if self.validation == RoutingValidation::Strict {
            check_overlaps(resolved.iter().flat_map(|(_, routes)| routes.iter()))?;
        }

        let mut extent = 0;
        for (key, routes) in resolved {
            let source = &mut self.sources[key];
            let block_size = routes.iter().map(ByteRange::length).sum();
            extent = routes.iter().map(ByteRange::end).fold(extent, usize::max);

            debug!(
                source = key,
                routes = routes.len(),
                block_size,
                "configuring source buffer"
            );
            source.buffer.configure(block_size, self.max_buffered);
            source.pending.clear();
            source.routes = routes;
            source.block_size = block_size;
        }
        self.extent = extent;
        self.is_initialized = true;

        Ok(())
    }

    /// Collects one block from each source into the bound data map.
    pub fn collect(&mut self) -> Result<Collection, CollectorError> {
        if !self.is_initialized {
            return Err(CollectorError::NotInitialized);
        }
        let data_map = self.data_map.as_mut().ok_or(CollectorError::NotConfigured)?;

        scatter(
            &mut self.sources,
            self.exhaustion_policy,
            self.extent,
            data_map.base_mut(),
        )
    }

    /// Collects one block from each source into the provided destination.
    ///
    /// The destination is addressed like the local array of the data map.
    pub fn collect_into(&mut self, dest: &mut [u8]) -> Result<Collection, CollectorError> {
        if !self.is_initialized {
            return Err(CollectorError::NotInitialized);
        }

        scatter(&mut self.sources, self.exhaustion_policy, self.extent, dest)
    }

    /// Checks whether the routing was resolved.
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    /// Returns the bound data map, if any.
    pub fn data_map(&self) -> Option<&D> {
        self.data_map.as_ref()
    }

    /// Returns the bound data map mutably, if any.
    pub fn data_map_mut(&mut self) -> Option<&mut D> {
        self.data_map.as_mut()
    }

    /// Returns a source buffer.
    pub fn source(&self, source: SourceId) -> Option<&B> {
        self.sources.get(source.0).map(|s| &s.buffer)
    }

    /// Returns a source buffer mutably.
    pub fn source_mut(&mut self, source: SourceId) -> Option<&mut B> {
        self.sources.get_mut(source.0).map(|s| &mut s.buffer)
    }

    /// Returns the byte ranges of a source in the order they are read.
    ///
    /// The slice is empty until the collector is initialized.
    pub fn routes(&self, source: SourceId) -> Option<&[ByteRange]> {
        self.sources.get(source.0).map(|s| s.routes.as_slice())
    }

    /// Returns the number of bytes a source delivers per tick.
    pub fn block_size(&self, source: SourceId) -> Option<usize> {
        self.sources.get(source.0).map(|s| s.block_size)
    }

    /// Returns the number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl<D: DataMap, B: SourceBuffer> Default for Collector<D, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, B> fmt::Debug for Collector<D, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("sources", &self.sources.len())
            .field("is_initialized", &self.is_initialized)
            .field("exhaustion_policy", &self.exhaustion_policy)
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

/// Builds a tree of the local intervals tagged with their displacement.
fn build_tree(index_map: &dyn IndexMap) -> IntervalTree<GlobalIndex, GlobalIndex> {
    let mut tree = IntervalTree::new();
    for interval in index_map.intervals() {
        debug!("adding {} to tree", interval);
        tree.add(interval.begin(), interval.end(), interval.local());
    }
    tree.build();
    debug!(intervals = tree.len(), "interval tree built");

    tree
}

/// Converts an index range into a byte range using the local interval that
/// contains its first index.
fn resolve(
    tree: &IntervalTree<GlobalIndex, GlobalIndex>,
    range: IndexRange,
    element_size: usize,
) -> Result<ByteRange, CollectorError> {
    trace!("searching for {}", range.begin());

    let mut found = None;
    let mut count = 0;
    tree.search(range.begin(), |_, end, &local| {
        found = Some((end, local));
        count += 1;
    });

    let (end, local) = match (found, count) {
        (Some(m), 1) => m,
        (None, _) => {
            return Err(CollectorError::UnmappedIndex {
                index: range.begin(),
            })
        }
        _ => {
            return Err(CollectorError::AmbiguousIndex {
                index: range.begin(),
            })
        }
    };
    if range.end() > end {
        return Err(CollectorError::PartiallyMapped {
            begin: range.begin(),
            end: range.end(),
        });
    }

    range
        .into_bytes(local, element_size)
        .ok_or(CollectorError::OutOfBounds {
            begin: range.begin(),
            end: range.end(),
        })
}

/// Checks that no two byte ranges overlap.
fn check_overlaps<'a>(routes: impl Iterator<Item = &'a ByteRange>) -> Result<(), CollectorError> {
    let mut routes: Vec<_> = routes.filter(|r| r.length() != 0).collect();
    routes.sort_by_key(|r| r.begin());

    for pair in routes.windows(2) {
        if pair[1].begin() < pair[0].end() {
            return Err(CollectorError::OverlappingRoutes {
                offset: pair[1].begin(),
            });
        }
    }

    Ok(())
}

/// Pulls one block from each source and copies its fragments into `dest`.
fn scatter<B: SourceBuffer>(
    sources: &mut Slab<Source<B>>,
    policy: ExhaustionPolicy,
    extent: usize,
    dest: &mut [u8],
) -> Result<Collection, CollectorError> {
    if dest.len() < extent {
        return Err(CollectorError::DestinationTooSmall {
            required: extent,
            actual: dest.len(),
        });
    }

    let mut outcome = Collection::Complete;
    for (key, source) in sources.iter_mut() {
        let Some(block) = source.buffer.next() else {
            // The remote has flushed all its data.
            warn!(source = key, ?policy, "source exhausted");
            match policy {
                ExhaustionPolicy::AbortPass => return Ok(Collection::Exhausted),
                ExhaustionPolicy::SkipSource => {
                    outcome = Collection::Exhausted;
                    continue;
                }
            }
        };
        if block.len() < source.block_size {
            return Err(CollectorError::ShortBlock {
                expected: source.block_size,
                actual: block.len(),
            });
        }

        let mut cursor = 0;
        for route in &source.routes {
            trace!(
                source = key,
                begin = route.begin(),
                length = route.length(),
                "collect to destination"
            );
            dest[route.begin()..route.end()]
                .copy_from_slice(&block[cursor..cursor + route.length()]);
            cursor += route.length();
        }
    }

    Ok(outcome)
}
