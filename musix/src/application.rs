//! Directory of the applications taking part in a run.

/// Static information about one application of the run.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApplicationInfo {
    name: String,
    color: u32,
    leader: u32,
    process_count: u32,
}

impl ApplicationInfo {
    /// Creates the description of an application.
    ///
    /// `color` identifies the process group of the application, `leader` is
    /// the global rank of its first process.
    pub fn new(name: impl Into<String>, color: u32, leader: u32, process_count: u32) -> Self {
        Self {
            name: name.into(),
            color,
            leader,
            process_count,
        }
    }

    /// Name of the application.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the process group of the application.
    pub fn color(&self) -> u32 {
        self.color
    }

    /// Global rank of the leader process.
    pub fn leader_rank(&self) -> u32 {
        self.leader
    }

    /// Number of processes running the application.
    pub fn process_count(&self) -> u32 {
        self.process_count
    }
}

/// Lookup table of [`ApplicationInfo`] by application name.
///
/// Runs involve a handful of applications, so lookups are linear scans.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApplicationMap {
    applications: Vec<ApplicationInfo>,
}

impl ApplicationMap {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an application, replacing any previous entry with the same name.
    pub fn add(&mut self, info: ApplicationInfo) {
        match self.applications.iter_mut().find(|a| a.name == info.name) {
            Some(existing) => *existing = info,
            None => self.applications.push(info),
        }
    }

    /// Looks up an application by name.
    pub fn lookup(&self, name: &str) -> Option<&ApplicationInfo> {
        self.applications.iter().find(|a| a.name == name)
    }

    /// Returns the number of applications.
    pub fn len(&self) -> usize {
        self.applications.len()
    }

    /// Checks whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Iterates over the applications in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ApplicationInfo> {
        self.applications.iter()
    }

    /// Total number of processes over all applications.
    pub fn process_count(&self) -> u32 {
        self.applications.iter().map(|a| a.process_count).sum()
    }
}

impl FromIterator<ApplicationInfo> for ApplicationMap {
    fn from_iter<T: IntoIterator<Item = ApplicationInfo>>(iter: T) -> Self {
        let mut map = Self::new();
        for info in iter {
            map.add(info);
        }

        map
    }
}
