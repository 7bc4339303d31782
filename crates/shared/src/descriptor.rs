//! Artifact and dependency descriptors

use crate::coordinate::BundleCoordinate;
use crate::error::DescriptorMalformedError;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// The kind of a deployable artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Application,
    Domain,
    Policy,
}

impl ArtifactKind {
    /// Root directory (relative to the base directory) holding artifacts of this kind
    pub fn root_dir(&self) -> &'static str {
        match self {
            ArtifactKind::Application => "apps",
            ArtifactKind::Domain => "domains",
            ArtifactKind::Policy => "policies",
        }
    }

    /// Primary configuration file, relative to the expanded artifact directory
    pub fn descriptor_file(&self) -> &'static str {
        match self {
            ArtifactKind::Application => "app.yaml",
            ArtifactKind::Domain => "domain.yaml",
            ArtifactKind::Policy => "policy.yaml",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Application => "application",
            ArtifactKind::Domain => "domain",
            ArtifactKind::Policy => "policy",
        };
        f.write_str(s)
    }
}

fn default_true() -> bool {
    true
}

/// Descriptor of a deployable artifact (application, domain or policy template)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    /// Artifact id; always the name of the expanded directory
    #[serde(default)]
    pub name: String,

    /// Set by the loader from the directory the descriptor was read from
    #[serde(skip, default = "default_kind")]
    pub kind: ArtifactKind,

    /// group:artifact:version[:classifier]
    pub coordinate: BundleCoordinate,

    /// Lowest runtime version able to run this artifact
    pub min_runtime_version: Option<Version>,

    /// Packages this artifact exports to its dependents
    #[serde(default)]
    pub exported_packages: Vec<String>,

    /// Resources this artifact exports to its dependents
    #[serde(default)]
    pub exported_resources: Vec<String>,

    /// Packages private to this artifact
    #[serde(default)]
    pub local_packages: Vec<String>,

    /// Declared plugin dependencies
    #[serde(default)]
    pub plugins: Vec<BundleCoordinate>,

    /// Declared shared libraries
    #[serde(default)]
    pub shared_libraries: Vec<BundleCoordinate>,

    /// Parent domain: a domain name or a domain coordinate
    pub domain: Option<String>,

    /// Extra files (relative paths) whose modification triggers a redeploy
    #[serde(default)]
    pub config_resources: Vec<String>,

    #[serde(default = "default_true")]
    pub redeployment_enabled: bool,
}

fn default_kind() -> ArtifactKind {
    ArtifactKind::Application
}

impl ArtifactDescriptor {
    /// Create a minimal descriptor
    pub fn new(name: impl Into<String>, kind: ArtifactKind, coordinate: BundleCoordinate) -> Self {
        Self {
            name: name.into(),
            kind,
            coordinate,
            min_runtime_version: None,
            exported_packages: Vec::new(),
            exported_resources: Vec::new(),
            local_packages: Vec::new(),
            plugins: Vec::new(),
            shared_libraries: Vec::new(),
            domain: None,
            config_resources: Vec::new(),
            redeployment_enabled: true,
        }
    }

    /// Builder: set parent domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Builder: add a plugin dependency
    pub fn with_plugin(mut self, plugin: BundleCoordinate) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Builder: add a shared library
    pub fn with_shared_library(mut self, library: BundleCoordinate) -> Self {
        self.shared_libraries.push(library);
        self
    }

    /// Builder: set exported packages
    pub fn with_exported_packages(mut self, packages: Vec<String>) -> Self {
        self.exported_packages = packages;
        self
    }

    /// Builder: set local packages
    pub fn with_local_packages(mut self, packages: Vec<String>) -> Self {
        self.local_packages = packages;
        self
    }

    /// Parse a descriptor from YAML text
    pub fn from_yaml(
        content: &str,
        location: &Path,
        kind: ArtifactKind,
    ) -> Result<Self, DescriptorMalformedError> {
        let mut descriptor: ArtifactDescriptor =
            serde_yaml::from_str(content).map_err(|e| DescriptorMalformedError {
                location: location.to_path_buf(),
                reason: e.to_string(),
            })?;
        descriptor.kind = kind;
        Ok(descriptor)
    }
}

/// Loads the descriptor of an expanded artifact directory
pub trait DescriptorLoader: Send + Sync {
    fn load(&self, artifact_dir: &Path, kind: ArtifactKind) -> Result<ArtifactDescriptor, DescriptorMalformedError>;
}

/// Reads `<dir>/<kind descriptor file>` as YAML
#[derive(Debug, Clone, Default)]
pub struct YamlDescriptorLoader;

impl DescriptorLoader for YamlDescriptorLoader {
    fn load(&self, artifact_dir: &Path, kind: ArtifactKind) -> Result<ArtifactDescriptor, DescriptorMalformedError> {
        let path = artifact_dir.join(kind.descriptor_file());
        let content = std::fs::read_to_string(&path).map_err(|e| DescriptorMalformedError {
            location: path.clone(),
            reason: e.to_string(),
        })?;

        let mut descriptor = ArtifactDescriptor::from_yaml(&content, &path, kind)?;
        descriptor.name = artifact_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DescriptorMalformedError {
                location: path.clone(),
                reason: "artifact directory has no name".to_string(),
            })?;
        Ok(descriptor)
    }
}

/// What a resolved dependency bundle (plugin or shared library) declares
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDescriptor {
    pub coordinate: BundleCoordinate,

    #[serde(default)]
    pub exported_packages: Vec<String>,

    #[serde(default)]
    pub exported_resources: Vec<String>,

    #[serde(default)]
    pub local_packages: Vec<String>,

    /// Other plugins this plugin depends on
    #[serde(default)]
    pub plugin_dependencies: Vec<BundleCoordinate>,

    /// Libraries bundled inside this plugin
    #[serde(default)]
    pub bundled_libraries: Vec<BundleCoordinate>,

    /// Packages only visible to `privileged_artifacts`
    #[serde(default)]
    pub privileged_exported_packages: Vec<String>,

    /// `group:artifact` ids allowed to see the privileged packages
    #[serde(default)]
    pub privileged_artifacts: Vec<String>,
}

impl DependencyDescriptor {
    pub fn new(coordinate: BundleCoordinate) -> Self {
        Self {
            coordinate,
            exported_packages: Vec::new(),
            exported_resources: Vec::new(),
            local_packages: Vec::new(),
            plugin_dependencies: Vec::new(),
            bundled_libraries: Vec::new(),
            privileged_exported_packages: Vec::new(),
            privileged_artifacts: Vec::new(),
        }
    }

    /// Builder: set exported packages
    pub fn exporting(mut self, packages: &[&str]) -> Self {
        self.exported_packages = packages.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Builder: add a plugin dependency
    pub fn depending_on(mut self, plugin: BundleCoordinate) -> Self {
        self.plugin_dependencies.push(plugin);
        self
    }

    /// Builder: add a bundled library
    pub fn bundling(mut self, library: BundleCoordinate) -> Self {
        self.bundled_libraries.push(library);
        self
    }

    /// Builder: privileged packages and their allow-list
    pub fn with_privileged(mut self, packages: &[&str], artifacts: &[&str]) -> Self {
        self.privileged_exported_packages = packages.iter().map(|p| p.to_string()).collect();
        self.privileged_artifacts = artifacts.iter().map(|a| a.to_string()).collect();
        self
    }
}
