//! Data collection from several remote senders.

use musix::buffer::{BlockQueue, BufferError, SourceBuffer};
use musix::collector::{
    Collection, Collector, CollectorError, ExhaustionPolicy, RoutingValidation, SourceId,
};
use musix::data::{ArrayData, DataType};
use musix::index::{IndexInterval, LinearIndex, PermutationIndex};
use musix::ErrorScope;

use crate::init_tracing;

type TestCollector<I> = Collector<ArrayData<I>, BlockQueue>;

fn block(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn interval(begin: i64, end: i64) -> IndexInterval {
    IndexInterval::new(begin, end, 0)
}

/// Three senders, one per third of a 6-element array, with the last sender
/// running dry after the first tick.
fn three_senders(
    policy: ExhaustionPolicy,
) -> (TestCollector<LinearIndex>, [SourceId; 3]) {
    let mut collector = Collector::with_policies(policy, RoutingValidation::Strict);
    collector.configure(ArrayData::from_f64(&[0.0; 6], LinearIndex::new(100, 6)), 1024);

    let a = collector.add_source(BlockQueue::new()).unwrap();
    let b = collector.add_source(BlockQueue::new()).unwrap();
    let c = collector.add_source(BlockQueue::new()).unwrap();
    collector.add_routing_interval(interval(100, 102), a).unwrap();
    collector.add_routing_interval(interval(102, 104), b).unwrap();
    collector.add_routing_interval(interval(104, 106), c).unwrap();
    collector.initialize().unwrap();

    (collector, [a, b, c])
}

#[test]
fn collector_multiple_ticks() {
    init_tracing();

    let (mut collector, [a, b, c]) = three_senders(ExhaustionPolicy::AbortPass);

    for tick in 0..3 {
        let t = tick as f64;
        collector.source_mut(a).unwrap().push(block(&[t, t + 0.1])).unwrap();
        collector.source_mut(b).unwrap().push(block(&[t + 0.2, t + 0.3])).unwrap();
        collector.source_mut(c).unwrap().push(block(&[t + 0.4, t + 0.5])).unwrap();
    }
    for tick in 0..3 {
        let t = tick as f64;
        assert_eq!(collector.collect(), Ok(Collection::Complete));
        assert_eq!(
            collector.data_map().unwrap().to_f64(),
            vec![t, t + 0.1, t + 0.2, t + 0.3, t + 0.4, t + 0.5]
        );
    }
}

#[test]
fn collector_exhaustion_abort_pass() {
    init_tracing();

    let (mut collector, [a, b, c]) = three_senders(ExhaustionPolicy::AbortPass);

    collector.source_mut(a).unwrap().push(block(&[1.0, 1.0])).unwrap();
    collector.source_mut(c).unwrap().push(block(&[3.0, 3.0])).unwrap();
    assert!(collector.source(b).unwrap().is_empty());

    // Sources are visited in registration order: `b` stops the pass before
    // `c` is read.
    assert_eq!(collector.collect(), Ok(Collection::Exhausted));
    assert_eq!(
        collector.data_map().unwrap().to_f64(),
        vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0]
    );
    assert_eq!(collector.source(c).unwrap().len(), 1);
}

#[test]
fn collector_exhaustion_skip_source() {
    init_tracing();

    let (mut collector, [a, b, c]) = three_senders(ExhaustionPolicy::SkipSource);

    collector.source_mut(a).unwrap().push(block(&[1.0, 1.0])).unwrap();
    collector.source_mut(c).unwrap().push(block(&[3.0, 3.0])).unwrap();
    assert!(collector.source(b).unwrap().is_empty());

    assert_eq!(collector.collect(), Ok(Collection::Exhausted));
    assert_eq!(
        collector.data_map().unwrap().to_f64(),
        vec![1.0, 1.0, 0.0, 0.0, 3.0, 3.0]
    );
    assert!(collector.source(c).unwrap().is_empty());
}

#[test]
fn collector_scattered_local_layout() {
    init_tracing();

    // Local storage order: 7, 8, 9, 1, 2, 3.
    let index = PermutationIndex::new([7, 8, 9, 1, 2, 3]).unwrap();
    let mut collector: TestCollector<_> = Collector::new();
    collector.configure(ArrayData::from_f64(&[0.0; 6], index), 1024);

    // A single sender delivers 1..4 then 7..10, registered out of order.
    let source = collector.add_source(BlockQueue::new()).unwrap();
    collector.add_routing_interval(interval(7, 10), source).unwrap();
    collector.add_routing_interval(interval(1, 4), source).unwrap();
    collector.initialize().unwrap();

    let routes = collector.routes(source).unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!((routes[0].begin(), routes[0].length()), (24, 24));
    assert_eq!((routes[1].begin(), routes[1].length()), (0, 24));

    collector
        .source_mut(source)
        .unwrap()
        .push(block(&[1.0, 2.0, 3.0, 7.0, 8.0, 9.0]))
        .unwrap();
    collector.collect().unwrap();

    assert_eq!(
        collector.data_map().unwrap().to_f64(),
        vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0]
    );
}

#[test]
fn collector_configures_buffers() {
    let mut collector: TestCollector<_> = Collector::new();
    collector.configure(ArrayData::new(DataType::Int, 8, LinearIndex::new(0, 8)), 64);

    let source = collector.add_source(BlockQueue::new()).unwrap();
    collector.add_routing_interval(interval(0, 4), source).unwrap();
    collector.add_routing_interval(interval(6, 8), source).unwrap();
    collector.initialize().unwrap();

    assert_eq!(collector.block_size(source), Some(24));
    let queue = collector.source_mut(source).unwrap();
    assert_eq!(queue.block_size(), Some(24));
    assert_eq!(queue.capacity(), Some(2));

    assert_eq!(
        queue.push(vec![0u8; 16]),
        Err(BufferError::BlockSize {
            expected: 24,
            actual: 16
        })
    );
    queue.push(vec![0u8; 24]).unwrap();
    queue.push(vec![0u8; 24]).unwrap();
    assert_eq!(queue.push(vec![0u8; 24]), Err(BufferError::Full { capacity: 2 }));
}

#[test]
fn collector_rejects_bad_routing() {
    let mut collector: TestCollector<_> = Collector::new();
    collector.configure(ArrayData::from_f64(&[0.0; 4], LinearIndex::new(0, 4)), 1024);

    let a = collector.add_source(BlockQueue::new()).unwrap();
    let b = collector.add_source(BlockQueue::new()).unwrap();
    collector.add_routing_interval(interval(0, 3), a).unwrap();
    collector.add_routing_interval(interval(2, 4), b).unwrap();

    let err = collector.initialize().unwrap_err();
    assert!(matches!(err, CollectorError::OverlappingRoutes { offset: 16 }));
    assert_eq!(err.scope(), ErrorScope::Rank);
    assert!(!collector.is_initialized());

    // A new configuration epoch discards the faulty routing.
    collector.configure(ArrayData::from_f64(&[0.0; 4], LinearIndex::new(0, 4)), 1024);
    collector.add_routing_interval(interval(0, 2), a).unwrap();
    collector.add_routing_interval(interval(2, 4), b).unwrap();
    collector.initialize().unwrap();
    assert_eq!(collector.source_count(), 2);
}

#[test]
fn collector_dynamic_sources() {
    let mut collector: Collector<ArrayData<LinearIndex>, Box<dyn SourceBuffer>> =
        Collector::new();
    collector.configure(ArrayData::from_f64(&[0.0; 2], LinearIndex::new(0, 2)), 1024);

    let mut queue = BlockQueue::new();
    queue.push(block(&[5.0, 6.0])).unwrap();
    let source = collector.add_source(Box::new(queue)).unwrap();
    collector.add_routing_interval(interval(0, 2), source).unwrap();
    collector.initialize().unwrap();

    let mut dest = vec![0u8; 16];
    assert_eq!(collector.collect_into(&mut dest), Ok(Collection::Complete));
    assert_eq!(dest, block(&[5.0, 6.0]));
}
