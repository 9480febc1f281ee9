//! Per-tick data sources.
//!
//! The transport delivering remote data is not part of this crate: it is seen
//! through the [`SourceBuffer`] trait, which hands out one fixed-size block of
//! bytes per tick. [`BlockQueue`] is a simple in-memory implementation which
//! can serve as a local loopback or as a test double.

use std::collections::VecDeque;

use thiserror::Error;

/// A source of fixed-size data blocks, one per tick.
pub trait SourceBuffer {
    /// Announces the size in bytes of each block and the maximum number of
    /// bytes that may be buffered.
    ///
    /// This is called once by the collector after the routing has been
    /// computed. The buffer should be able to hold at least one block even if
    /// `max_buffered` is smaller than `block_size`.
    fn configure(&mut self, block_size: usize, max_buffered: usize);

    /// Returns the next block, or `None` if the source is exhausted.
    ///
    /// The block must be at least as large as the announced block size.
    fn next(&mut self) -> Option<&[u8]>;
}

impl<T: SourceBuffer + ?Sized> SourceBuffer for Box<T> {
    fn configure(&mut self, block_size: usize, max_buffered: usize) {
        (**self).configure(block_size, max_buffered);
    }

    fn next(&mut self) -> Option<&[u8]> {
        (**self).next()
    }
}

/// Error returned when a block cannot be pushed into a [`BlockQueue`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The block size differs from the configured block size.
    #[error("block of {actual} bytes does not match the block size of {expected} bytes")]
    BlockSize {
        /// Configured block size.
        expected: usize,
        /// Size of the rejected block.
        actual: usize,
    },
    /// The queue already holds as many blocks as it may buffer.
    #[error("the buffer is full ({capacity} blocks)")]
    Full {
        /// Capacity of the queue, in blocks.
        capacity: usize,
    },
    /// The queue was closed and accepts no more blocks.
    #[error("the buffer is closed")]
    Closed,
}

/// A bounded FIFO of data blocks.
///
/// Until it is configured, the queue accepts blocks of any size and has no
/// capacity limit.
#[derive(Debug, Default)]
pub struct BlockQueue {
    block_size: Option<usize>,
    capacity: Option<usize>,
    blocks: VecDeque<Vec<u8>>,
    current: Vec<u8>,
    is_closed: bool,
}

impl BlockQueue {
    /// Creates an empty, unconfigured queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured block size, if any.
    pub fn block_size(&self) -> Option<usize> {
        self.block_size
    }

    /// Configured capacity in blocks, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of blocks waiting to be read.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Checks whether no block is waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Appends a block.
    pub fn push(&mut self, block: impl Into<Vec<u8>>) -> Result<(), BufferError> {
        if self.is_closed {
            return Err(BufferError::Closed);
        }
        let block = block.into();
        if let Some(expected) = self.block_size {
            if block.len() != expected {
                return Err(BufferError::BlockSize {
                    expected,
                    actual: block.len(),
                });
            }
        }
        if let Some(capacity) = self.capacity {
            if self.blocks.len() >= capacity {
                return Err(BufferError::Full { capacity });
            }
        }
        self.blocks.push_back(block);

        Ok(())
    }

    /// Marks the end of the data stream.
    ///
    /// Blocks already queued remain readable.
    pub fn close(&mut self) {
        self.is_closed = true;
    }

    /// Checks whether the queue was closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }
}

impl SourceBuffer for BlockQueue {
    fn configure(&mut self, block_size: usize, max_buffered: usize) {
        self.block_size = Some(block_size);
        self.capacity = Some(match block_size {
            0 => 1,
            size => (max_buffered / size).max(1),
        });
    }

    fn next(&mut self) -> Option<&[u8]> {
        self.current = self.blocks.pop_front()?;

        Some(&self.current)
    }
}
