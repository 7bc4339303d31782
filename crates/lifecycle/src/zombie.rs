//! ZombieTracker - Memoized deployment failures

use crate::timestamps::ResourceTimestamps;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;
use url::Url;

/// Failure record of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZombieEntry {
    /// Source location of the failed artifact
    pub uri: Url,
    /// Inputs as they were when the deployment failed
    pub resources: ResourceTimestamps,
}

impl ZombieEntry {
    pub fn new(uri: Url, resources: ResourceTimestamps) -> Self {
        Self { uri, resources }
    }

    /// Build an entry for the artifact at `location`
    pub fn at(location: &Path, resources: ResourceTimestamps) -> Option<Self> {
        Url::from_file_path(location).ok().map(|uri| Self::new(uri, resources))
    }

    /// Whether `path` is one of the inputs that failed
    pub fn is_for(&self, path: &Path) -> bool {
        self.resources.paths().any(|p| p == path)
    }

    /// Some input changed since the failure
    pub fn updated(&self) -> bool {
        self.resources.changed()
    }

    /// Every input that failed is still on disk
    pub fn exists(&self) -> bool {
        self.resources.all_exist()
    }

    /// Timestamp of the input that caused the failure
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.resources.latest()
    }
}

/// Zombie entries of one artifact kind, keyed by artifact name
#[derive(Debug, Clone, Default)]
pub struct ZombieTracker {
    entries: BTreeMap<String, ZombieEntry>,
}

impl ZombieTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) a failure
    pub fn record(&mut self, name: impl Into<String>, entry: ZombieEntry) {
        let name = name.into();
        tracing::debug!(artifact = %name, uri = %entry.uri, "recording zombie");
        self.entries.insert(name, entry);
    }

    pub fn clear(&mut self, name: &str) -> Option<ZombieEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ZombieEntry> {
        self.entries.get(name)
    }

    pub fn is_zombie(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The artifact is a zombie whose input changed since it failed
    pub fn is_updated(&self, name: &str) -> bool {
        self.entries.get(name).map(ZombieEntry::updated).unwrap_or(false)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `name -> (uri -> failure timestamp)`
    pub fn zombie_map(&self) -> BTreeMap<String, BTreeMap<Url, SystemTime>> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let mut by_uri = BTreeMap::new();
                if let Some(timestamp) = entry.timestamp() {
                    by_uri.insert(entry.uri.clone(), timestamp);
                }
                (name.clone(), by_uri)
            })
            .collect()
    }
}
