//! Data routing and port connectivity for coupled parallel simulators.
//!
//! Musix is the core of a runtime coupling library: it lets independent
//! parallel simulators, each running as a group of processes, exchange
//! distributed arrays over named ports at every simulation tick.
//!
//! Each process of a coupled run owns a partition of the global index space of
//! a port (e.g. the identifiers of the neurons it simulates) and must receive,
//! from possibly many remote senders, exactly the fragments addressed to the
//! indices it owns. Two problems must be solved for this to work:
//!
//! * the *data plane*: reassembling the fragmented per-tick messages into the
//!   local array, which is what the [`Collector`](collector::Collector) does,
//! * the *control plane*: establishing, recording and tearing down the
//!   connections between ports consistently across all processes of the run,
//!   which is the job of the
//!   [`PortConnectivityManager`](port_manager::PortConnectivityManager).
//!
//! Process bootstrap, the message transport and the simulation loop are left
//! to the embedding runtime, which plugs in through the
//! [`SourceBuffer`](buffer::SourceBuffer) and [`Port`](port_manager::Port)
//! traits.
//!
//! # A practical overview
//!
//! ## Describing local data
//!
//! The global indices held by a process are described by an
//! [`IndexMap`](index::IndexMap), for instance a
//! [`LinearIndex`](index::LinearIndex) for a contiguous block or a
//! [`PermutationIndex`](index::PermutationIndex) for an arbitrary list of
//! indices. The index map and the element type make up a
//! [`DataMap`](data::DataMap), typically an [`ArrayData`](data::ArrayData).
//!
//! ## Collecting data
//!
//! A collector is configured with the local data map, told which global index
//! ranges each source delivers, and initialized. Initialization resolves all
//! index ranges into byte ranges of the local array once and for all, so that
//! each subsequent call to [`collect`](collector::Collector::collect) is a
//! plain sequence of copies:
//!
//! ```
//! use musix::buffer::BlockQueue;
//! use musix::collector::Collector;
//! use musix::data::ArrayData;
//! use musix::index::{IndexInterval, LinearIndex};
//!
//! // Global indices 0..4 are stored locally, as doubles.
//! let data = ArrayData::from_f64(&[0.0; 4], LinearIndex::new(0, 4));
//!
//! let mut collector = Collector::new();
//! collector.configure(data, 1 << 16);
//!
//! // Two remote processes each send half of the array.
//! let left = collector.add_source(BlockQueue::new()).unwrap();
//! let right = collector.add_source(BlockQueue::new()).unwrap();
//! collector.add_routing_interval(IndexInterval::new(0, 2, 0), left).unwrap();
//! collector.add_routing_interval(IndexInterval::new(2, 4, 0), right).unwrap();
//! collector.initialize().unwrap();
//!
//! let block = |values: [f64; 2]| values.iter().flat_map(|v| v.to_ne_bytes()).collect::<Vec<_>>();
//! collector.source_mut(left).unwrap().push(block([1.0, 2.0])).unwrap();
//! collector.source_mut(right).unwrap().push(block([3.0, 4.0])).unwrap();
//! collector.collect().unwrap();
//!
//! assert_eq!(collector.data_map().unwrap().to_f64(), vec![1.0, 2.0, 3.0, 4.0]);
//! ```
//!
//! ## Managing connections
//!
//! Connections are made and broken with the collective methods of the
//! [`PortConnectivityManager`](port_manager::PortConnectivityManager), which
//! must be called identically on all processes of the run. Changes are
//! propagated to the live ports in one batch by
//! [`update_ports`](port_manager::PortConnectivityManager::update_ports).
//!
//! # Error handling
//!
//! Configuration errors are fatal for a coupled run, but the decision to abort
//! belongs to the embedding runtime. All errors are therefore returned, each
//! with an [`ErrorScope`] telling whether only the calling rank or the whole
//! run should be brought down.
//!
//! # Logging
//!
//! Diagnostics are emitted with the [`tracing`] crate under the `musix`
//! target. No subscriber is installed by the library.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod application;
pub mod buffer;
pub mod collective;
pub mod collector;
pub mod config;
pub mod connectivity;
pub mod data;
pub mod index;
pub mod port_code;
pub mod port_manager;
pub(crate) mod util;

/// Extent of the processes affected by a fatal error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// Only the calling rank is misconfigured and should abort.
    Rank,
    /// The whole run is misconfigured and should abort.
    Run,
}
