//! Record of the connections of the local ports.
//!
//! The connection graph of a run is distributed: each process only records the
//! connections of the ports of its own application, in a [`ConnectivityMap`].
//! For every local port, a [`ConnectivityInfo`] holds the direction and width
//! of the port together with one [`ConnectorInfo`] per connection.

use std::collections::HashMap;
use std::fmt;

use slab::Slab;
use thiserror::Error;

use crate::port_code::PortCode;
use crate::ErrorScope;

/// Direction of a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortDirection {
    /// The port sends data.
    Output,
    /// The port receives data.
    Input,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => write!(f, "output"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Communication pattern used by a connection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommunicationType {
    /// Collective exchange among all processes of both applications.
    Collective,
    /// Pairwise exchange between the processes that share data.
    #[default]
    PointToPoint,
}

/// Method used to route events on the receiving side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessingMethod {
    /// Interval tree lookup.
    #[default]
    Tree,
    /// Precomputed lookup table.
    Table,
}

/// A port of a given application.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Endpoint {
    /// Application name.
    pub app: String,
    /// Port name.
    pub port: String,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(app: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.port)
    }
}

/// One connection of a local port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectorInfo {
    /// The port at the other end of the connection.
    pub remote: Endpoint,
    /// Globally unique connection code.
    pub code: PortCode,
    /// Global rank of the leader of the remote application.
    pub remote_leader: u32,
    /// Number of processes of the remote application.
    pub remote_process_count: u32,
    /// Communication pattern.
    pub comm_type: CommunicationType,
    /// Receiver-side routing method.
    pub proc_method: ProcessingMethod,
}

/// Direction, width and connections of a local port.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectivityInfo {
    port_name: String,
    direction: PortDirection,
    width: usize,
    connections: Vec<ConnectorInfo>,
}

impl ConnectivityInfo {
    /// Name of the local port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Direction of the local port.
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Width of the local port, i.e. the size of its global index space.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Connections of the local port, in the order they were made.
    pub fn connections(&self) -> &[ConnectorInfo] {
        &self.connections
    }
}

/// Error raised by connectivity bookkeeping and port management.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    /// The remote application is not in the application directory.
    #[error("no application info available for `{app}`")]
    MissingApplicationInfo {
        /// Name of the missing application.
        app: String,
    },
    /// There is no live port with this name.
    #[error("cannot remove port `{port}`: there is no instance of a port with this name")]
    PortNotInstantiated {
        /// Port name.
        port: String,
    },
    /// The port must be disconnected before it can be removed.
    #[error("cannot remove port `{port}`: ports must be disconnected before they can be removed")]
    PortStillConnected {
        /// Port name.
        port: String,
    },
    /// A live port with this name is already registered.
    #[error("port `{port}` is already instantiated")]
    PortAlreadyInstantiated {
        /// Port name.
        port: String,
    },
    /// The local port has no connection.
    #[error("port `{port}` is not connected")]
    UnknownPort {
        /// Port name.
        port: String,
    },
    /// The local port is not connected to the remote endpoint.
    #[error("port `{port}` is not connected to `{remote}`")]
    UnknownConnection {
        /// Local port name.
        port: String,
        /// Remote endpoint.
        remote: Endpoint,
    },
    /// The port is already connected with the opposite direction.
    #[error("port `{port}` is used both as output and input")]
    DirectionConflict {
        /// Port name.
        port: String,
    },
    /// The port is already connected with another width.
    #[error("port `{port}` has width {expected} but a connection of width {actual} was requested")]
    WidthMismatch {
        /// Port name.
        port: String,
        /// Width of the existing connections.
        expected: usize,
        /// Width of the requested connection.
        actual: usize,
    },
    /// The sequence of collective calls differs between processes.
    #[error(
        "collective call sequence mismatch: {local_calls} local calls (digest {local_digest:#018x}), \
         {remote_calls} remote calls (digest {remote_digest:#018x})"
    )]
    CollectiveMismatch {
        /// Number of collective calls made locally.
        local_calls: u64,
        /// Local call digest.
        local_digest: u64,
        /// Number of collective calls made by the peer.
        remote_calls: u64,
        /// Peer call digest.
        remote_digest: u64,
    },
}

impl ConnectivityError {
    /// Reports whether the error concerns only the calling rank or the whole
    /// run.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::MissingApplicationInfo { .. } | Self::PortAlreadyInstantiated { .. } => {
                ErrorScope::Rank
            }
            _ => ErrorScope::Run,
        }
    }
}

/// The connections of all local ports.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectivityMap {
    infos: Slab<ConnectivityInfo>,
    by_port: HashMap<String, usize>,
}

impl ConnectivityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a local port.
    ///
    /// The first connection of a port fixes its direction and width; later
    /// connections must agree with them. Duplicate connections are not
    /// detected.
    pub fn add(
        &mut self,
        port_name: &str,
        direction: PortDirection,
        width: usize,
        connector: ConnectorInfo,
    ) -> Result<(), ConnectivityError> {
        match self.by_port.get(port_name) {
            Some(&key) => {
                let info = &mut self.infos[key];
                if info.direction != direction {
                    return Err(ConnectivityError::DirectionConflict {
                        port: port_name.to_owned(),
                    });
                }
                if info.width != width {
                    return Err(ConnectivityError::WidthMismatch {
                        port: port_name.to_owned(),
                        expected: info.width,
                        actual: width,
                    });
                }
                info.connections.push(connector);
            }
            None => {
                let key = self.infos.insert(ConnectivityInfo {
                    port_name: port_name.to_owned(),
                    direction,
                    width,
                    connections: vec![connector],
                });
                self.by_port.insert(port_name.to_owned(), key);
            }
        }

        Ok(())
    }

    /// Removes all connections of a local port and returns them.
    pub fn remove(&mut self, port_name: &str) -> Option<ConnectivityInfo> {
        let key = self.by_port.remove(port_name)?;

        Some(self.infos.remove(key))
    }

    /// Removes the connection between a local port and a remote endpoint and
    /// returns it.
    ///
    /// The port is forgotten altogether once its last connection is removed.
    pub fn remove_connection(
        &mut self,
        port_name: &str,
        remote_app: &str,
        remote_port: &str,
    ) -> Option<ConnectorInfo> {
        let key = *self.by_port.get(port_name)?;
        let info = &mut self.infos[key];
        let pos = info
            .connections
            .iter()
            .position(|c| c.remote.app == remote_app && c.remote.port == remote_port)?;
        let connector = info.connections.remove(pos);

        if info.connections.is_empty() {
            self.remove(port_name);
        }

        Some(connector)
    }

    /// Removes all connections between a local port and a remote endpoint
    /// and returns how many were removed.
    ///
    /// The port is forgotten altogether once its last connection is removed.
    pub fn remove_connections(
        &mut self,
        port_name: &str,
        remote_app: &str,
        remote_port: &str,
    ) -> usize {
        let Some(&key) = self.by_port.get(port_name) else {
            return 0;
        };
        let info = &mut self.infos[key];
        let before = info.connections.len();
        info.connections
            .retain(|c| !(c.remote.app == remote_app && c.remote.port == remote_port));
        let removed = before - info.connections.len();

        if info.connections.is_empty() {
            self.remove(port_name);
        }

        removed
    }

    /// Returns the connectivity of a local port.
    pub fn info(&self, port_name: &str) -> Option<&ConnectivityInfo> {
        self.by_port.get(port_name).map(|&key| &self.infos[key])
    }

    /// Checks whether a local port has at least one connection.
    pub fn is_connected(&self, port_name: &str) -> bool {
        self.info(port_name)
            .is_some_and(|info| !info.connections.is_empty())
    }

    /// Returns the names of the local ports connected to a remote endpoint.
    pub fn connected_local_ports(&self, remote_port: &str, remote_app: &str) -> Vec<String> {
        let mut ports: Vec<_> = self
            .infos
            .iter()
            .filter(|(_, info)| {
                info.connections
                    .iter()
                    .any(|c| c.remote.app == remote_app && c.remote.port == remote_port)
            })
            .map(|(_, info)| info.port_name.clone())
            .collect();
        ports.sort_unstable();

        ports
    }

    /// Iterates over the connectivity of all local ports.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectivityInfo> {
        self.infos.iter().map(|(_, info)| info)
    }

    /// Returns the number of connected local ports.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Checks whether no local port is connected.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}
