//! ArtifactRegistry - Known artifacts of one kind

use crate::status::ArtifactStatus;
use crate::timestamps::ResourceTimestamps;
use shared::{DeploymentError, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// One known artifact
#[derive(Debug)]
pub struct RegistryEntry<T> {
    pub name: String,
    /// Expanded artifact directory
    pub location: PathBuf,
    pub status: ArtifactStatus,
    /// `None` when the artifact failed before an instance could be built
    pub instance: Option<Arc<T>>,
    /// Inputs whose modification triggers a redeploy
    pub resources: ResourceTimestamps,
    /// Domain reference the artifact declares, known even when it failed
    pub domain: Option<String>,
}

// Manual impl: `T` itself need not be `Clone`.
impl<T> Clone for RegistryEntry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            location: self.location.clone(),
            status: self.status,
            instance: self.instance.clone(),
            resources: self.resources.clone(),
            domain: self.domain.clone(),
        }
    }
}

impl<T> RegistryEntry<T> {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            status: ArtifactStatus::New,
            instance: None,
            resources: ResourceTimestamps::default(),
            domain: None,
        }
    }

    /// Builder: attach the artifact instance
    pub fn with_instance(mut self, instance: Arc<T>) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Builder: set tracked inputs
    pub fn with_resources(mut self, resources: ResourceTimestamps) -> Self {
        self.resources = resources;
        self
    }
}

/// Artifacts of one kind, in registration order
#[derive(Debug)]
pub struct ArtifactRegistry<T> {
    entries: Vec<RegistryEntry<T>>,
}

impl<T> Default for ArtifactRegistry<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> ArtifactRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; an entry with the same name is replaced in place
    pub fn register(&mut self, entry: RegistryEntry<T>) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<RegistryEntry<T>> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry<T>> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RegistryEntry<T>> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn instance(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(|e| e.instance.clone())
    }

    pub fn status(&self, name: &str) -> Option<ArtifactStatus> {
        self.get(name).map(|e| e.status)
    }

    /// Drive `name` through the status machine
    pub fn set_status(&mut self, name: &str, next: ArtifactStatus) -> Result<()> {
        let entry = self
            .get_mut(name)
            .ok_or_else(|| DeploymentError::NotFound(name.to_string()))?;
        entry.status = entry.status.transition(name, next)?;
        Ok(())
    }

    /// Force a status, bypassing the transition rules (used by best-effort undeploy)
    pub fn force_status(&mut self, name: &str, status: ArtifactStatus) {
        if let Some(entry) = self.get_mut(name) {
            entry.status = status;
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry<T>> {
        self.entries.iter()
    }

    /// Owned copy of every entry
    pub fn snapshot(&self) -> Vec<RegistryEntry<T>> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
