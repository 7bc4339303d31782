//! Configuration types for Hangar

use crate::descriptor::ArtifactKind;
use crate::error::{DeploymentError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_POLLING_INTERVAL: &str = "HANGAR_POLLING_INTERVAL_MS";
pub const ENV_PARALLEL_DEPLOYMENT: &str = "HANGAR_PARALLEL_DEPLOYMENT";
pub const ENV_STARTUP_ORDER: &str = "HANGAR_STARTUP_ORDER";

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_ANCHOR_SUFFIX: &str = "-anchor.txt";
pub const DEFAULT_PACKAGE_EXTENSION: &str = "jar";

/// Working data directory, relative to the base directory
pub const WORK_DIR: &str = ".hangar";
/// Maven-style local repository, relative to the base directory
pub const REPOSITORY_DIR: &str = "repository";

/// Deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentConfig {
    /// Directory holding `apps/`, `domains/`, `policies/` and `repository/`
    pub base_dir: PathBuf,

    /// Watcher polling interval
    pub polling_interval_ms: u64,

    /// Deploy applications concurrently on the startup cycle
    pub parallel_deployment: bool,

    /// Artifacts deployed first on startup, in this order
    pub startup_order: Vec<String>,

    /// Version of this runtime, checked against `minRuntimeVersion`
    pub runtime_version: Version,

    pub anchor_suffix: String,

    pub package_extension: String,

    /// Namespaces artifacts may not provide themselves
    pub reserved_namespaces: Vec<String>,

    /// Reserved packages the container exposes to every artifact
    pub container_exported_packages: Vec<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            parallel_deployment: false,
            startup_order: Vec::new(),
            runtime_version: Version::new(1, 0, 0),
            anchor_suffix: DEFAULT_ANCHOR_SUFFIX.to_string(),
            package_extension: DEFAULT_PACKAGE_EXTENSION.to_string(),
            reserved_namespaces: vec![
                "hangar.runtime".to_string(),
                "java".to_string(),
                "javax".to_string(),
                "org.slf4j".to_string(),
                "com.fasterxml.jackson".to_string(),
            ],
            container_exported_packages: vec![
                "hangar.runtime.api".to_string(),
                "java.lang".to_string(),
                "java.util".to_string(),
                "java.io".to_string(),
                "org.slf4j".to_string(),
            ],
        }
    }
}

impl DeploymentConfig {
    /// Create a configuration rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a YAML (or JSON) file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| DeploymentError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `HANGAR_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides(&mut self, vars: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = vars(ENV_POLLING_INTERVAL) {
            self.polling_interval_ms = value.trim().parse().map_err(|_| {
                DeploymentError::Config(format!("{} must be a number of milliseconds, got '{}'", ENV_POLLING_INTERVAL, value))
            })?;
        }

        if let Some(value) = vars(ENV_PARALLEL_DEPLOYMENT) {
            self.parallel_deployment = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" | "" => false,
                other => {
                    return Err(DeploymentError::Config(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_PARALLEL_DEPLOYMENT, other
                    )))
                }
            };
        }

        if let Some(value) = vars(ENV_STARTUP_ORDER) {
            self.startup_order = parse_startup_order(&value);
        }

        Ok(())
    }

    /// Builder: set the startup ordering list from its colon-delimited form
    pub fn with_startup_order(mut self, order: &str) -> Self {
        self.startup_order = parse_startup_order(order);
        self
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Root directory for a kind of artifact
    pub fn root(&self, kind: ArtifactKind) -> PathBuf {
        self.base_dir.join(kind.root_dir())
    }

    pub fn repository_dir(&self) -> PathBuf {
        self.base_dir.join(REPOSITORY_DIR)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.base_dir.join(WORK_DIR)
    }

    /// `<id><anchor suffix>`
    pub fn anchor_file_name(&self, artifact_name: &str) -> String {
        format!("{}{}", artifact_name, self.anchor_suffix)
    }

    /// `<id>.<package extension>`
    pub fn package_file_name(&self, artifact_name: &str) -> String {
        format!("{}.{}", artifact_name, self.package_extension)
    }
}

/// Split a colon-delimited startup list, dropping blanks and duplicates
pub fn parse_startup_order(value: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in value.split(':').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_startup_order_dedup() {
        assert_eq!(parse_startup_order("app1:app2::app1:app3"), vec!["app1", "app2", "app3"]);
        assert!(parse_startup_order("").is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_POLLING_INTERVAL, "250"),
            (ENV_PARALLEL_DEPLOYMENT, "true"),
            (ENV_STARTUP_ORDER, "b:a"),
        ]);
        let mut config = DeploymentConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.polling_interval(), Duration::from_millis(250));
        assert!(config.parallel_deployment);
        assert_eq!(config.startup_order, vec!["b", "a"]);
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        let mut config = DeploymentConfig::default();
        let result = config.apply_overrides(|k| (k == ENV_POLLING_INTERVAL).then(|| "soon".to_string()));
        assert!(matches!(result, Err(DeploymentError::Config(_))));
    }

    #[test]
    fn test_from_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangar.yaml");
        std::fs::write(&path, "baseDir: /opt/hangar\npollingIntervalMs: 100\n").unwrap();

        let config = DeploymentConfig::from_file(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/opt/hangar"));
        assert_eq!(config.polling_interval_ms, 100);
        assert_eq!(config.anchor_suffix, DEFAULT_ANCHOR_SUFFIX);
        assert_eq!(config.root(ArtifactKind::Domain), PathBuf::from("/opt/hangar/domains"));
    }
}
