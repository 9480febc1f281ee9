//! Collective connection management across the applications of a run.

use std::cell::RefCell;
use std::rc::Rc;

use musix::application::{ApplicationInfo, ApplicationMap};
use musix::config::Configuration;
use musix::connectivity::{
    CommunicationType, ConnectivityError, ConnectivityInfo, PortDirection, ProcessingMethod,
};
use musix::port_code::PortCodes;
use musix::port_manager::{Port, PortConnectivityManager};
use musix::ErrorScope;

use crate::init_tracing;

/// A port that records the connectivity it was reconnected with.
#[derive(Default)]
struct RecordingPort {
    history: RefCell<Vec<Option<ConnectivityInfo>>>,
}
impl RecordingPort {
    fn reconnections(&self) -> usize {
        self.history.borrow().len()
    }
    fn last(&self) -> Option<ConnectivityInfo> {
        self.history.borrow().last().cloned().flatten()
    }
}
impl Port for RecordingPort {
    fn reconnect(&self, connectivity: Option<&ConnectivityInfo>) {
        self.history.borrow_mut().push(connectivity.cloned());
    }
}

fn applications() -> ApplicationMap {
    [
        ApplicationInfo::new("A", 0, 0, 2),
        ApplicationInfo::new("B", 1, 2, 3),
        ApplicationInfo::new("C", 2, 5, 1),
    ]
    .into_iter()
    .collect()
}

/// One manager per application, each with its own code counter as if it ran
/// on a separate process.
fn managers() -> Vec<PortConnectivityManager> {
    ["A", "B", "C"]
        .into_iter()
        .map(|app| {
            PortConnectivityManager::new(Configuration::new(app, applications()), PortCodes::new())
        })
        .collect()
}

fn connect(
    manager: &mut PortConnectivityManager,
    sender: (&str, &str),
    receiver: (&str, &str),
) -> Result<(), ConnectivityError> {
    manager.connect(
        sender.0,
        sender.1,
        receiver.0,
        receiver.1,
        8,
        CommunicationType::PointToPoint,
        ProcessingMethod::Tree,
    )
}

#[test]
fn connect_is_collective() {
    init_tracing();

    let mut managers = managers();
    for manager in &mut managers {
        connect(manager, ("A", "out"), ("B", "in")).unwrap();
    }

    let [a, b, c] = &managers[..] else {
        unreachable!()
    };

    let out = a.port_connectivity("out").unwrap();
    assert_eq!(out.direction(), PortDirection::Output);
    assert_eq!(out.width(), 8);
    assert_eq!(out.connections().len(), 1);
    let connector = &out.connections()[0];
    assert_eq!((connector.remote.app.as_str(), connector.remote.port.as_str()), ("B", "in"));
    assert_eq!(connector.code.get(), 0);
    assert_eq!((connector.remote_leader, connector.remote_process_count), (2, 3));

    let input = b.port_connectivity("in").unwrap();
    assert_eq!(input.direction(), PortDirection::Input);
    let connector = &input.connections()[0];
    assert_eq!((connector.remote.app.as_str(), connector.remote.port.as_str()), ("A", "out"));
    assert_eq!(connector.code.get(), 0);
    assert_eq!((connector.remote_leader, connector.remote_process_count), (0, 2));

    assert!(c.config().connectivity().is_empty());

    // All processes stay in lockstep.
    for manager in &managers {
        assert_eq!(manager.port_codes().peek(), 1);
        assert!(managers[0].verify_collective([manager.fingerprint()]).is_ok());
    }
    assert!(a.is_modified() && b.is_modified() && !c.is_modified());
}

#[test]
fn connect_codes_stay_synchronized() {
    let mut managers = managers();
    for manager in &mut managers {
        connect(manager, ("A", "out"), ("B", "in")).unwrap();
        connect(manager, ("B", "out"), ("C", "in")).unwrap();
        connect(manager, ("C", "out"), ("A", "in")).unwrap();
    }

    let code = |m: &PortConnectivityManager, port: &str| {
        m.port_connectivity(port).unwrap().connections()[0].code.get()
    };
    let [a, b, c] = &managers[..] else {
        unreachable!()
    };
    assert_eq!((code(a, "out"), code(b, "in")), (0, 0));
    assert_eq!((code(b, "out"), code(c, "in")), (1, 1));
    assert_eq!((code(c, "out"), code(a, "in")), (2, 2));
}

#[test]
fn connect_out_of_order_detected() {
    let mut managers = managers();
    let [a, b, _] = &mut managers[..] else {
        unreachable!()
    };

    connect(a, ("A", "out"), ("B", "in")).unwrap();
    connect(a, ("B", "out"), ("C", "in")).unwrap();
    connect(b, ("B", "out"), ("C", "in")).unwrap();
    connect(b, ("A", "out"), ("B", "in")).unwrap();

    let err = a.verify_collective([b.fingerprint()]).unwrap_err();
    assert!(matches!(err, ConnectivityError::CollectiveMismatch { .. }));
    assert_eq!(err.scope(), ErrorScope::Run);
}

#[test]
fn connect_unknown_remote_application() {
    let mut manager =
        PortConnectivityManager::new(Configuration::new("A", applications()), PortCodes::new());

    let err = connect(&mut manager, ("A", "out"), ("Z", "in")).unwrap_err();
    assert_eq!(
        err,
        ConnectivityError::MissingApplicationInfo {
            app: "Z".to_owned()
        }
    );
    assert_eq!(err.scope(), ErrorScope::Rank);
    assert!(!manager.is_connected("out"));
    // The code was consumed nonetheless.
    assert_eq!(manager.port_codes().peek(), 1);
}

#[test]
fn port_removal_guard() {
    init_tracing();

    let mut manager =
        PortConnectivityManager::new(Configuration::new("A", applications()), PortCodes::new());

    assert_eq!(
        manager.remove_port("out"),
        Err(ConnectivityError::PortNotInstantiated {
            port: "out".to_owned()
        })
    );

    let port = Rc::new(RecordingPort::default());
    manager.register_port("out", &port).unwrap();
    assert_eq!(
        manager.register_port("out", &port),
        Err(ConnectivityError::PortAlreadyInstantiated {
            port: "out".to_owned()
        })
    );

    connect(&mut manager, ("A", "out"), ("B", "in")).unwrap();
    let err = manager.remove_port("out").unwrap_err();
    assert_eq!(
        err,
        ConnectivityError::PortStillConnected {
            port: "out".to_owned()
        }
    );
    assert_eq!(err.scope(), ErrorScope::Run);

    manager.disconnect("A", "out", "B", "in").unwrap();
    manager.remove_port("out").unwrap();
    assert!(!manager.is_instantiated("out"));
}

#[test]
fn update_ports_batches_edits() {
    init_tracing();

    let mut manager =
        PortConnectivityManager::new(Configuration::new("B", applications()), PortCodes::new());

    let input = Rc::new(RecordingPort::default());
    let output = Rc::new(RecordingPort::default());
    let transient = Rc::new(RecordingPort::default());
    manager.register_port("in", &input).unwrap();
    manager.register_port("out", &output).unwrap();
    manager.register_port("tmp", &transient).unwrap();

    // Nothing to do yet.
    assert_eq!(manager.update_ports(), 0);

    connect(&mut manager, ("A", "out"), ("B", "in")).unwrap();
    connect(&mut manager, ("C", "out"), ("B", "in")).unwrap();
    connect(&mut manager, ("B", "out"), ("C", "in")).unwrap();
    connect(&mut manager, ("A", "x"), ("C", "y")).unwrap();
    manager.disconnect("B", "out", "C", "in").unwrap();
    assert!(manager.is_modified());

    drop(transient);
    assert!(!manager.is_instantiated("tmp"));
    assert_eq!(manager.ports().len(), 2);

    assert_eq!(manager.update_ports(), 2);
    assert!(!manager.is_modified());
    assert_eq!(input.reconnections(), 1);
    assert_eq!(output.reconnections(), 1);

    let info = input.last().unwrap();
    assert_eq!(info.connections().len(), 2);
    assert_eq!(output.last(), None);

    // A second pass without edits is a no-op.
    assert_eq!(manager.update_ports(), 0);
    assert_eq!(input.reconnections(), 1);
}

#[test]
fn disconnect_remote_port() {
    let mut managers = managers();
    for manager in &mut managers {
        connect(manager, ("A", "out"), ("B", "in")).unwrap();
        connect(manager, ("A", "out"), ("C", "in")).unwrap();
        connect(manager, ("A", "aux"), ("B", "in")).unwrap();
    }
    for manager in &mut managers {
        manager.disconnect_port("B", "in").unwrap();
    }

    let [a, b, c] = &managers[..] else {
        unreachable!()
    };

    // `A.aux` lost its only connection, `A.out` kept the one to `C.in`.
    assert!(!a.is_connected("aux"));
    let out = a.port_connectivity("out").unwrap();
    assert_eq!(out.connections().len(), 1);
    assert_eq!(out.connections()[0].remote.app, "C");

    assert!(!b.is_connected("in"));
    assert!(c.is_connected("in"));
}

#[test]
fn disconnect_unknown() {
    let mut manager =
        PortConnectivityManager::new(Configuration::new("A", applications()), PortCodes::new());

    assert!(matches!(
        manager.disconnect_port("A", "out"),
        Err(ConnectivityError::UnknownPort { .. })
    ));
    assert!(matches!(
        manager.disconnect("A", "out", "B", "in"),
        Err(ConnectivityError::UnknownConnection { .. })
    ));
    // Connections between other applications are ignored.
    manager.disconnect("B", "out", "C", "in").unwrap();
    assert!(!manager.is_modified());
}

#[test]
fn finalize_releases_ports() {
    let mut manager =
        PortConnectivityManager::new(Configuration::new("A", applications()), PortCodes::new());

    let kept = Rc::new(RecordingPort::default());
    let dropped = Rc::new(RecordingPort::default());
    manager.register_port("kept", &kept).unwrap();
    manager.register_port("dropped", &dropped).unwrap();
    connect(&mut manager, ("A", "kept"), ("B", "in")).unwrap();
    drop(dropped);

    assert_eq!(manager.finalize(), 1);
    assert!(manager.ports().is_empty());
    assert!(manager.is_connected("kept"));
    assert_eq!(Rc::strong_count(&kept), 1);
}

#[test]
fn disconnect_remote_port_duplicate_edges() {
    let mut managers = managers();
    for manager in &mut managers {
        connect(manager, ("A", "out"), ("B", "in")).unwrap();
        connect(manager, ("A", "out"), ("B", "in")).unwrap();
    }
    let port = Rc::new(RecordingPort::default());
    managers[0].register_port("out", &port).unwrap();

    for manager in &mut managers {
        manager.disconnect_port("B", "in").unwrap();
    }

    let [a, b, _] = &mut managers[..] else {
        unreachable!()
    };
    assert!(!a.is_connected("out"));
    assert!(!b.is_connected("in"));
    a.remove_port("out").unwrap();

    assert_eq!(a.update_ports(), 0);
    assert_eq!(port.reconnections(), 0);
}
