//! ResourceTimestamps - Modification times of an artifact's input files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Modification time of `path`, `None` if it cannot be read
pub fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Snapshot of the modification times of a set of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTimestamps {
    entries: BTreeMap<PathBuf, Option<SystemTime>>,
}

impl ResourceTimestamps {
    /// Record the current modification time of every path
    pub fn capture<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let entries = paths
            .into_iter()
            .map(Into::into)
            .map(|p| {
                let time = modified(&p);
                (p, time)
            })
            .collect();
        Self { entries }
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }

    pub fn get(&self, path: &Path) -> Option<SystemTime> {
        self.entries.get(path).copied().flatten()
    }

    /// Latest recorded modification time
    pub fn latest(&self) -> Option<SystemTime> {
        self.entries.values().flatten().max().copied()
    }

    /// Whether any file now has a different modification time than recorded
    pub fn changed(&self) -> bool {
        self.entries.iter().any(|(path, recorded)| {
            let current = modified(path);
            current.is_some() && current != *recorded
        })
    }

    /// Whether every recorded file still exists
    pub fn all_exist(&self) -> bool {
        self.entries.keys().all(|p| p.exists())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, Option<SystemTime>)> {
        self.entries.iter().map(|(p, t)| (p, *t))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    #[test]
    fn test_detects_touch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(&path, "coordinate: g:a:1.0.0").unwrap();

        let timestamps = ResourceTimestamps::capture([&path]);
        assert!(!timestamps.changed());

        let later = modified(&path).unwrap() + Duration::from_secs(2);
        File::options().write(true).open(&path).unwrap().set_modified(later).unwrap();
        assert!(timestamps.changed());
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.yaml");
        std::fs::write(&path, "").unwrap();

        let timestamps = ResourceTimestamps::capture([&path]);
        assert!(timestamps.all_exist());
        std::fs::remove_file(&path).unwrap();
        assert!(!timestamps.all_exist());
        // A vanished file is not a modification
        assert!(!timestamps.changed());
    }
}
