//! Example: an input port fed by a parallel sender application.
//!
//! This example demonstrates in particular:
//!
//! * collective connection of ports across applications,
//! * batched port reconnection,
//! * collection of per-tick data from several remote processes.
//!
//! ```text
//!   Application "sender" (3 processes)       Application "receiver"
//!  ┌─────────────────────────────────┐      ┌───────────────────────┐
//!  │ rank 0: indices 0..4            ├─────►│                       │
//!  │ rank 1: indices 4..8            ├─────►│ port "in" (width 12)  │
//!  │ rank 2: indices 8..12           ├─────►│                       │
//!  └─────────────────────────────────┘      └───────────────────────┘
//! ```
use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

use musix::application::{ApplicationInfo, ApplicationMap};
use musix::buffer::BlockQueue;
use musix::collector::{Collection, Collector, SourceId};
use musix::config::Configuration;
use musix::connectivity::{CommunicationType, ConnectivityInfo, ProcessingMethod};
use musix::data::ArrayData;
use musix::index::{IndexInterval, LinearIndex};
use musix::port_code::PortCodes;
use musix::port_manager::{Port, PortConnectivityManager};

type PortCollector = Collector<ArrayData<LinearIndex>, BlockQueue>;

/// Input port receiving the whole index space of the sender.
#[derive(Default)]
struct InputPort {
    state: RefCell<Option<(PortCollector, Vec<SourceId>)>>,
}

impl InputPort {
    /// Pushes a block from a remote rank.
    fn deliver(&self, rank: usize, values: &[f64]) -> Result<(), Box<dyn Error>> {
        let mut state = self.state.borrow_mut();
        let (collector, sources) = state.as_mut().ok_or("port is not connected")?;
        let source = *sources.get(rank).ok_or("unknown rank")?;
        let block: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        collector
            .source_mut(source)
            .ok_or("unknown source")?
            .push(block)?;

        Ok(())
    }

    /// Collects one tick and returns the local array.
    fn tick(&self) -> Result<Option<Vec<f64>>, Box<dyn Error>> {
        let mut state = self.state.borrow_mut();
        let (collector, _) = state.as_mut().ok_or("port is not connected")?;

        Ok(match collector.collect()? {
            Collection::Complete => collector.data_map().map(ArrayData::to_f64),
            Collection::Exhausted => None,
        })
    }

    fn build(info: &ConnectivityInfo) -> Result<(PortCollector, Vec<SourceId>), Box<dyn Error>> {
        let width = info.width();
        let connector = info.connections().first().ok_or("no connection")?;
        let ranks = connector.remote_process_count as usize;
        let chunk = width / ranks;

        let mut collector = Collector::new();
        collector.configure(
            ArrayData::from_f64(&vec![0.0; width], LinearIndex::new(0, width)),
            1 << 12,
        );
        let mut sources = Vec::with_capacity(ranks);
        for rank in 0..ranks {
            let source = collector.add_source(BlockQueue::new())?;
            let begin = (rank * chunk) as i64;
            collector.add_routing_interval(IndexInterval::new(begin, begin + chunk as i64, 0), source)?;
            sources.push(source);
        }
        collector.initialize()?;

        Ok((collector, sources))
    }
}

impl Port for InputPort {
    fn reconnect(&self, connectivity: Option<&ConnectivityInfo>) {
        let state = match connectivity.map(Self::build).transpose() {
            Ok(state) => state,
            Err(err) => {
                eprintln!("could not reconnect port: {err}");
                None
            }
        };
        *self.state.borrow_mut() = state;
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // ---------------
    // Bench assembly.
    // ---------------

    let applications: ApplicationMap = [
        ApplicationInfo::new("sender", 0, 0, 3),
        ApplicationInfo::new("receiver", 1, 3, 1),
    ]
    .into_iter()
    .collect();

    let mut manager = PortConnectivityManager::new(
        Configuration::new("receiver", applications),
        PortCodes::new(),
    );
    let port = Rc::new(InputPort::default());
    manager.register_port("in", &port)?;

    manager.connect(
        "sender",
        "out",
        "receiver",
        "in",
        12,
        CommunicationType::PointToPoint,
        ProcessingMethod::Tree,
    )?;
    assert_eq!(manager.update_ports(), 1);

    // ----------
    // Simulation.
    // ----------

    for tick in 0..3 {
        for rank in 0..3 {
            let base = (tick * 100 + rank * 4) as f64;
            port.deliver(rank, &[base, base + 1.0, base + 2.0, base + 3.0])?;
        }
        let values = port.tick()?.ok_or("sender exhausted")?;
        assert_eq!(values[0], (tick * 100) as f64);
        assert_eq!(values[11], (tick * 100 + 11) as f64);
    }

    // The sender stopped: the next pass finds no data.
    assert_eq!(port.tick()?, None);

    // -------------
    // Disconnection.
    // -------------

    manager.disconnect("sender", "out", "receiver", "in")?;
    manager.update_ports();
    manager.remove_port("in")?;
    assert!(port.tick().is_err());

    Ok(())
}
