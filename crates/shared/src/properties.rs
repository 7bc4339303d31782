//! Deployment properties persisted alongside an artifact

use crate::config::DeploymentConfig;
use crate::descriptor::ArtifactKind;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const PROPERTIES_FILE: &str = "deployment.properties.json";

/// Property bag supplied on deploy/redeploy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentProperties(BTreeMap<String, String>);

impl DeploymentProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a property
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl FromIterator<(String, String)> for DeploymentProperties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Stores deployment properties under the working directory
#[derive(Debug, Clone)]
pub struct PropertiesStore {
    root: PathBuf,
}

impl PropertiesStore {
    pub fn new(config: &DeploymentConfig) -> Self {
        Self { root: config.work_dir() }
    }

    fn path(&self, kind: ArtifactKind, name: &str) -> PathBuf {
        self.root.join(kind.root_dir()).join(name).join(PROPERTIES_FILE)
    }

    /// Persist `supplied` if given, otherwise return what was persisted before
    pub fn resolve(
        &self,
        kind: ArtifactKind,
        name: &str,
        supplied: Option<DeploymentProperties>,
    ) -> Result<DeploymentProperties> {
        match supplied {
            Some(properties) => {
                self.save(kind, name, &properties)?;
                Ok(properties)
            }
            None => self.load(kind, name),
        }
    }

    pub fn save(&self, kind: ArtifactKind, name: &str, properties: &DeploymentProperties) -> Result<()> {
        let path = self.path(kind, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(properties)?)?;
        Ok(())
    }

    pub fn load(&self, kind: ArtifactKind, name: &str) -> Result<DeploymentProperties> {
        let path = self.path(kind, name);
        if !path.exists() {
            return Ok(DeploymentProperties::new());
        }
        let content = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Forget everything stored for an artifact
    pub fn remove(&self, kind: ArtifactKind, name: &str) -> Result<()> {
        let dir = self.root.join(kind.root_dir()).join(name);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_reused_when_not_supplied() {
        let dir = tempfile::tempdir().unwrap();
        let store = PropertiesStore::new(&DeploymentConfig::new(dir.path()));

        let supplied = DeploymentProperties::new().with("env", "prod");
        store
            .resolve(ArtifactKind::Application, "app", Some(supplied.clone()))
            .unwrap();

        let reused = store.resolve(ArtifactKind::Application, "app", None).unwrap();
        assert_eq!(reused, supplied);

        store.remove(ArtifactKind::Application, "app").unwrap();
        assert!(store.load(ArtifactKind::Application, "app").unwrap().is_empty());
    }
}
