//! Allocation of connection codes.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Globally unique identifier of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortCode(u32);

impl PortCode {
    /// Numeric value of the code.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle to a counter of connection codes.
///
/// Codes are only unique across the run if every process allocates the same
/// number of codes in the same order, which is why collective operations such
/// as [`PortConnectivityManager::connect`] allocate a code even when the
/// connection does not concern the calling process.
///
/// Clones share the same counter. The counter is released when the last
/// handle is dropped.
///
/// [`PortConnectivityManager::connect`]:
///     crate::port_manager::PortConnectivityManager::connect
#[derive(Clone, Default)]
pub struct PortCodes {
    next: Arc<CachePadded<AtomicU32>>,
}

impl PortCodes {
    /// Creates a counter whose first code is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter whose first code is `first`.
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: Arc::new(CachePadded::new(AtomicU32::new(first))),
        }
    }

    /// Allocates the next code.
    ///
    /// # Panics
    ///
    /// This method will panic if the counter would wrap around.
    pub fn alloc(&self) -> PortCode {
        let code = self.next.fetch_add(1, Ordering::Relaxed);
        assert_ne!(code, u32::MAX, "connection code counter overflow");

        PortCode(code)
    }

    /// Returns the code the next allocation will return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for PortCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortCodes")
            .field("next", &self.peek())
            .finish()
    }
}
