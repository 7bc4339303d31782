//! DependencyRepository - Source of resolved dependency descriptors

use parking_lot::RwLock;
use shared::{BundleCoordinate, DependencyDescriptor, DeploymentError, DescriptorMalformedError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Looks up what a resolved bundle declares
pub trait DependencyRepository: Send + Sync {
    /// `Ok(None)` when the coordinate is not present
    fn find(&self, coordinate: &BundleCoordinate) -> Result<Option<DependencyDescriptor>, DeploymentError>;
}

/// Maven-style directory of dependency descriptors.
///
/// `<root>/<group as path>/<artifactId>/<version>/<artifactId>-<version>[-<classifier>].yaml`
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the descriptor for `coordinate`
    pub fn path_of(&self, coordinate: &BundleCoordinate, with_classifier: bool) -> PathBuf {
        let mut dir = self.root.clone();
        for segment in coordinate.group_id.split('.') {
            dir.push(segment);
        }
        dir.push(&coordinate.artifact_id);
        dir.push(coordinate.version.to_string());

        let file = match (&coordinate.classifier, with_classifier) {
            (Some(classifier), true) => {
                format!("{}-{}-{}.yaml", coordinate.artifact_id, coordinate.version, classifier)
            }
            _ => format!("{}-{}.yaml", coordinate.artifact_id, coordinate.version),
        };
        dir.join(file)
    }

    /// Write a descriptor at its repository location
    pub fn install(&self, descriptor: &DependencyDescriptor) -> Result<PathBuf, DeploymentError> {
        let path = self.path_of(&descriptor.coordinate, true);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(descriptor).map_err(|e| DeploymentError::Other(e.to_string()))?;
        std::fs::write(&path, yaml)?;
        Ok(path)
    }
}

impl DependencyRepository for LocalRepository {
    fn find(&self, coordinate: &BundleCoordinate) -> Result<Option<DependencyDescriptor>, DeploymentError> {
        let candidates = [self.path_of(coordinate, true), self.path_of(coordinate, false)];
        let Some(path) = candidates.iter().find(|p| p.is_file()) else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(path)?;
        let mut descriptor: DependencyDescriptor =
            serde_yaml::from_str(&content).map_err(|e| DescriptorMalformedError {
                location: path.clone(),
                reason: e.to_string(),
            })?;

        // The requested coordinate is authoritative; the file may omit the classifier.
        descriptor.coordinate = coordinate.clone();
        tracing::debug!(coordinate = %coordinate, path = %path.display(), "resolved dependency");
        Ok(Some(descriptor))
    }
}

/// Repository held in memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    descriptors: RwLock<HashMap<BundleCoordinate, DependencyDescriptor>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a descriptor
    pub fn with(self, descriptor: DependencyDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&self, descriptor: DependencyDescriptor) {
        self.descriptors.write().insert(descriptor.coordinate.clone(), descriptor);
    }
}

impl DependencyRepository for InMemoryRepository {
    fn find(&self, coordinate: &BundleCoordinate) -> Result<Option<DependencyDescriptor>, DeploymentError> {
        Ok(self.descriptors.read().get(coordinate).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_lib() -> BundleCoordinate {
        "org.lib:json:2.1.0".parse().unwrap()
    }

    #[test]
    fn test_maven_layout() {
        let repo = LocalRepository::new("/repo");
        let plugin: BundleCoordinate = "org.acme:http:1.0.0:plugin".parse().unwrap();
        assert_eq!(
            repo.path_of(&plugin, true),
            PathBuf::from("/repo/org/acme/http/1.0.0/http-1.0.0-plugin.yaml")
        );
        assert_eq!(
            repo.path_of(&json_lib(), true),
            PathBuf::from("/repo/org/lib/json/2.1.0/json-2.1.0.yaml")
        );
    }

    #[test]
    fn test_install_then_find() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path());
        repo.install(&DependencyDescriptor::new(json_lib()).exporting(&["org.json"]))
            .unwrap();

        let found = repo.find(&json_lib()).unwrap().unwrap();
        assert_eq!(found.exported_packages, vec!["org.json"]);

        let missing: BundleCoordinate = "org.lib:json:3.0.0".parse().unwrap();
        assert!(repo.find(&missing).unwrap().is_none());
    }

    #[test]
    fn test_classifier_falls_back_to_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path());
        repo.install(&DependencyDescriptor::new(json_lib())).unwrap();

        let classified = json_lib().with_classifier("plugin");
        let found = repo.find(&classified).unwrap().unwrap();
        assert!(found.coordinate.is_plugin());
    }

    #[test]
    fn test_malformed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path());
        let path = repo.path_of(&json_lib(), true);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "exportedPackages: [").unwrap();

        let err = repo.find(&json_lib()).unwrap_err();
        assert!(matches!(err, DeploymentError::DescriptorMalformed(_)));
    }

    #[test]
    fn test_in_memory() {
        let repo = InMemoryRepository::new().with(DependencyDescriptor::new(json_lib()));
        assert!(repo.find(&json_lib()).unwrap().is_some());
    }

    #[test]
    fn test_in_memory_insert_after_panic_while_locked() {
        let repo = std::sync::Arc::new(InMemoryRepository::new());
        let holder = repo.clone();
        let panicked = std::thread::spawn(move || {
            let _descriptors = holder.descriptors.write();
            panic!("seeding failed");
        })
        .join();
        assert!(panicked.is_err());

        repo.insert(DependencyDescriptor::new(json_lib()));
        assert!(repo.find(&json_lib()).unwrap().is_some());
    }
}
