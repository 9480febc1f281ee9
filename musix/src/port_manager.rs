//! Connection management of the local ports.
//!
//! The [`PortConnectivityManager`] mediates all changes to the connections of
//! the ports of the local application. It keeps two pieces of state:
//!
//! * a registry of the live ports, referenced weakly so that the manager never
//!   extends the lifetime of a port,
//! * the [`Configuration`] of the process, whose connectivity map is mutated by
//!   [`connect`](PortConnectivityManager::connect) and
//!   [`disconnect`](PortConnectivityManager::disconnect).
//!
//! # Collective calls
//!
//! `connect` and the `disconnect` methods are SPMD collectives: they must be
//! called identically and in the same order on every process of every
//! application of the run, because each `connect` allocates a connection code
//! from a counter that must stay synchronized across the run. A process that
//! is neither the sender nor the receiver of a connection still allocates the
//! code and otherwise ignores the call.
//!
//! Misordered calls cannot be detected locally. As a debugging aid, the
//! manager folds each collective call into a [`CollectiveFingerprint`] that
//! the embedding runtime can compare across processes with
//! [`verify_collective`](PortConnectivityManager::verify_collective).
//!
//! # Batched reconnection
//!
//! Connectivity edits are not propagated to the ports immediately. Instead,
//! they mark the manager as modified, and the next call to
//! [`update_ports`](PortConnectivityManager::update_ports) reconnects all live
//! ports once, however many edits were made in between.
//!
//! #### Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use musix::application::{ApplicationInfo, ApplicationMap};
//! use musix::config::Configuration;
//! use musix::connectivity::{CommunicationType, ConnectivityInfo, ProcessingMethod};
//! use musix::port_code::PortCodes;
//! use musix::port_manager::{Port, PortConnectivityManager};
//!
//! #[derive(Default)]
//! struct CountingPort {
//!     reconnections: Cell<usize>,
//! }
//! impl Port for CountingPort {
//!     fn reconnect(&self, _connectivity: Option<&ConnectivityInfo>) {
//!         self.reconnections.set(self.reconnections.get() + 1);
//!     }
//! }
//!
//! let applications: ApplicationMap = [
//!     ApplicationInfo::new("A", 0, 0, 2),
//!     ApplicationInfo::new("B", 1, 2, 2),
//! ]
//! .into_iter()
//! .collect();
//!
//! let mut manager =
//!     PortConnectivityManager::new(Configuration::new("A", applications), PortCodes::new());
//! let port = Rc::new(CountingPort::default());
//! manager.register_port("out", &port).unwrap();
//!
//! manager
//!     .connect(
//!         "A",
//!         "out",
//!         "B",
//!         "in",
//!         4,
//!         CommunicationType::PointToPoint,
//!         ProcessingMethod::Tree,
//!     )
//!     .unwrap();
//! assert!(manager.is_connected("out"));
//!
//! manager.update_ports();
//! assert_eq!(port.reconnections.get(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, info, trace};

use crate::collective::{CollectiveFingerprint, CollectiveTrace};
use crate::config::Configuration;
use crate::connectivity::{
    CommunicationType, ConnectivityError, ConnectivityInfo, ConnectorInfo, Endpoint,
    PortDirection, ProcessingMethod,
};
use crate::port_code::PortCodes;

/// A connection endpoint owned outside of the manager.
pub trait Port {
    /// Refreshes the internal state of the port from the current
    /// connectivity of the port, or `None` if it has no connection.
    ///
    /// This must be idempotent.
    fn reconnect(&self, connectivity: Option<&ConnectivityInfo>);
}

/// Registry of the local ports and mediator of connectivity changes.
///
/// See the [module-level documentation](self) for more details.
pub struct PortConnectivityManager {
    config: Configuration,
    port_codes: PortCodes,
    ports: HashMap<String, Weak<dyn Port>>,
    is_modified: bool,
    trace: CollectiveTrace,
}

impl PortConnectivityManager {
    /// Creates a manager for the local application described by the
    /// configuration, allocating connection codes from `port_codes`.
    pub fn new(config: Configuration, port_codes: PortCodes) -> Self {
        Self {
            config,
            port_codes,
            ports: HashMap::new(),
            is_modified: false,
            trace: CollectiveTrace::default(),
        }
    }

    /// Returns the configuration of the process.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Returns the connection code counter.
    pub fn port_codes(&self) -> &PortCodes {
        &self.port_codes
    }

    /// Registers a port under the specified name.
    ///
    /// The manager only keeps a weak reference to the port. An error is
    /// returned if a live port is already registered under this name.
    pub fn register_port<P: Port + 'static>(
        &mut self,
        name: impl Into<String>,
        port: &Rc<P>,
    ) -> Result<(), ConnectivityError> {
        let name = name.into();
        if self.is_instantiated(&name) {
            return Err(ConnectivityError::PortAlreadyInstantiated { port: name });
        }
        let port: Weak<P> = Rc::downgrade(port);
        let port: Weak<dyn Port> = port;
        debug!(port = %name, "registering port");
        self.ports.insert(name, port);

        Ok(())
    }

    /// Checks whether a live port is registered under this name.
    pub fn is_instantiated(&self, name: &str) -> bool {
        self.ports
            .get(name)
            .is_some_and(|port| port.strong_count() > 0)
    }

    /// Checks whether the local port has at least one connection.
    pub fn is_connected(&self, name: &str) -> bool {
        self.config.connectivity().is_connected(name)
    }

    /// Returns the connectivity of a local port.
    pub fn port_connectivity(&self, name: &str) -> Option<&ConnectivityInfo> {
        self.config.connectivity().info(name)
    }

    /// Returns strong references to all live ports.
    pub fn ports(&self) -> Vec<Rc<dyn Port>> {
        self.ports.values().filter_map(Weak::upgrade).collect()
    }

    /// Checks whether connectivity changed since the last call to
    /// [`update_ports`](Self::update_ports).
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    /// Reconnects all live ports if connectivity changed since the last call,
    /// and returns the number of ports reconnected.
    ///
    /// Registry entries of expired ports are dropped along the way.
    pub fn update_ports(&mut self) -> usize {
        if !self.is_modified {
            return 0;
        }
        let connectivity = self.config.connectivity();
        let mut count = 0;
        self.ports.retain(|name, port| match port.upgrade() {
            Some(port) => {
                port.reconnect(connectivity.info(name));
                count += 1;
                true
            }
            None => {
                trace!(port = %name, "dropping expired port");
                false
            }
        });
        self.is_modified = false;
        debug!(ports = count, "ports reconnected");

        count
    }

    /// Removes a port from the registry.
    ///
    /// The port must be live and disconnected.
    pub fn remove_port(&mut self, name: &str) -> Result<(), ConnectivityError> {
        if !self.is_instantiated(name) {
            return Err(ConnectivityError::PortNotInstantiated {
                port: name.to_owned(),
            });
        }
        if self.is_connected(name) {
            return Err(ConnectivityError::PortStillConnected {
                port: name.to_owned(),
            });
        }
        self.ports.remove(name);
        debug!(port = name, "port removed");

        Ok(())
    }

    /// Connects `sender_app.sender_port` to `receiver_app.receiver_port`.
    ///
    /// This is a collective call, see the
    /// [module-level documentation](self#collective-calls). A connection code
    /// is allocated on every process; the connection is only recorded by the
    /// processes of the sender and receiver applications.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &mut self,
        sender_app: &str,
        sender_port: &str,
        receiver_app: &str,
        receiver_port: &str,
        width: usize,
        comm_type: CommunicationType,
        proc_method: ProcessingMethod,
    ) -> Result<(), ConnectivityError> {
        // Allocated unconditionally to keep the counter synchronized.
        let code = self.port_codes.alloc();
        self.trace.record(
            "connect",
            &[
                sender_app.into(),
                sender_port.into(),
                receiver_app.into(),
                receiver_port.into(),
                width.into(),
                comm_type.into(),
                proc_method.into(),
            ],
        );

        let (direction, local_port, remote) = if self.config.name() == sender_app {
            (
                PortDirection::Output,
                sender_port,
                Endpoint::new(receiver_app, receiver_port),
            )
        } else if self.config.name() == receiver_app {
            (
                PortDirection::Input,
                receiver_port,
                Endpoint::new(sender_app, sender_port),
            )
        } else {
            trace!(%code, sender_app, receiver_app, "connection not handled by this application");
            return Ok(());
        };

        let remote_info = self.config.applications().lookup(&remote.app).ok_or_else(|| {
            ConnectivityError::MissingApplicationInfo {
                app: remote.app.clone(),
            }
        })?;
        let connector = ConnectorInfo {
            code,
            remote_leader: remote_info.leader_rank(),
            remote_process_count: remote_info.process_count(),
            remote,
            comm_type,
            proc_method,
        };

        info!(
            port = local_port,
            %direction,
            remote = %connector.remote,
            %code,
            width,
            "connecting port"
        );
        self.config
            .connectivity_mut()
            .add(local_port, direction, width, connector)?;
        self.is_modified = true;

        Ok(())
    }

    /// Removes all connections of the port `app_name.port_name`.
    ///
    /// This is a collective call. On the processes of `app_name`, the port
    /// loses all its connections; on other processes, only the connections
    /// of local ports to this port are removed.
    pub fn disconnect_port(
        &mut self,
        app_name: &str,
        port_name: &str,
    ) -> Result<(), ConnectivityError> {
        self.trace
            .record("disconnect_port", &[app_name.into(), port_name.into()]);

        if self.config.name() == app_name {
            self.config
                .connectivity_mut()
                .remove(port_name)
                .ok_or_else(|| ConnectivityError::UnknownPort {
                    port: port_name.to_owned(),
                })?;
            info!(port = port_name, "port disconnected");
        } else {
            let connectivity = self.config.connectivity_mut();
            for local_port in connectivity.connected_local_ports(port_name, app_name) {
                let removed = connectivity.remove_connections(&local_port, app_name, port_name);
                info!(
                    port = %local_port,
                    remote_app = app_name,
                    remote_port = port_name,
                    connections = removed,
                    "connections removed"
                );
            }
        }
        self.is_modified = true;

        Ok(())
    }

    /// Removes the connection from `sender_app.sender_port` to
    /// `receiver_app.receiver_port`.
    ///
    /// This is a collective call. Processes of applications other than the
    /// sender and the receiver ignore it.
    pub fn disconnect(
        &mut self,
        sender_app: &str,
        sender_port: &str,
        receiver_app: &str,
        receiver_port: &str,
    ) -> Result<(), ConnectivityError> {
        self.trace.record(
            "disconnect",
            &[
                sender_app.into(),
                sender_port.into(),
                receiver_app.into(),
                receiver_port.into(),
            ],
        );

        let (local_port, remote_app, remote_port) = if self.config.name() == sender_app {
            (sender_port, receiver_app, receiver_port)
        } else if self.config.name() == receiver_app {
            (receiver_port, sender_app, sender_port)
        } else {
            return Ok(());
        };

        self.config
            .connectivity_mut()
            .remove_connection(local_port, remote_app, remote_port)
            .ok_or_else(|| ConnectivityError::UnknownConnection {
                port: local_port.to_owned(),
                remote: Endpoint::new(remote_app, remote_port),
            })?;
        info!(
            port = local_port,
            remote_app, remote_port, "connection removed"
        );
        self.is_modified = true;

        Ok(())
    }

    /// Returns a summary of the collective calls made so far.
    pub fn fingerprint(&self) -> CollectiveFingerprint {
        self.trace.fingerprint()
    }

    /// Checks that the peers issued the same collective calls as this
    /// process.
    pub fn verify_collective(
        &self,
        peers: impl IntoIterator<Item = CollectiveFingerprint>,
    ) -> Result<(), ConnectivityError> {
        let local = self.fingerprint();

        peers.into_iter().try_for_each(|peer| local.check(&peer))
    }

    /// Releases all ports at shutdown.
    ///
    /// The registry is emptied; ports remain alive as long as their owners
    /// hold them and the connectivity map is left untouched. Returns the
    /// number of live ports released.
    pub fn finalize(&mut self) -> usize {
        let live = self.ports.values().filter(|p| p.strong_count() > 0).count();
        self.ports.clear();
        debug!(ports = live, "port registry released");

        live
    }
}

impl fmt::Debug for PortConnectivityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortConnectivityManager")
            .field("app", &self.config.name())
            .field("ports", &self.ports.len())
            .field("is_modified", &self.is_modified)
            .finish_non_exhaustive()
    }
}
