//! Per-process configuration of a coupled run.

use crate::application::ApplicationMap;
use crate::connectivity::ConnectivityMap;

/// The state of a process that connection management reads and mutates.
///
/// It names the application the process belongs to, lists all applications
/// of the run and records the connections of the local ports.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Configuration {
    name: String,
    applications: ApplicationMap,
    connectivity: ConnectivityMap,
}

impl Configuration {
    /// Creates a configuration with no connection.
    pub fn new(name: impl Into<String>, applications: ApplicationMap) -> Self {
        Self {
            name: name.into(),
            applications,
            connectivity: ConnectivityMap::new(),
        }
    }

    /// Replaces the connectivity map, e.g. with one loaded at startup.
    pub fn with_connectivity(mut self, connectivity: ConnectivityMap) -> Self {
        self.connectivity = connectivity;

        self
    }

    /// Name of the local application.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory of all applications of the run.
    pub fn applications(&self) -> &ApplicationMap {
        &self.applications
    }

    /// Connections of the local ports.
    pub fn connectivity(&self) -> &ConnectivityMap {
        &self.connectivity
    }

    /// Connections of the local ports, mutably.
    pub fn connectivity_mut(&mut self) -> &mut ConnectivityMap {
        &mut self.connectivity
    }
}
