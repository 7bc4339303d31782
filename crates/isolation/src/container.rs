//! ContainerPolicy - Namespaces owned by the runtime itself

use shared::DeploymentConfig;
use std::collections::BTreeSet;

/// Runtime-reserved namespaces.
///
/// Artifacts can never provide a package inside a reserved namespace; such
/// a package is only ever served by the container, and only when the
/// container exports it.
#[derive(Debug, Clone, Default)]
pub struct ContainerPolicy {
    reserved: Vec<String>,
    exported: BTreeSet<String>,
}

impl ContainerPolicy {
    pub fn new<R, E>(reserved: R, exported: E) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            reserved: reserved.into_iter().map(Into::into).collect(),
            exported: exported.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self::new(
            config.reserved_namespaces.iter().cloned(),
            config.container_exported_packages.iter().cloned(),
        )
    }

    /// Whether `package` is `ns` or lives below `ns` for some reserved `ns`
    pub fn is_reserved(&self, package: &str) -> bool {
        self.reserved.iter().any(|ns| {
            package
                .strip_prefix(ns.as_str())
                .map(|rest| rest.is_empty() || rest.starts_with('.'))
                .unwrap_or(false)
        })
    }

    /// Whether the container serves `package` to artifacts
    pub fn exports(&self, package: &str) -> bool {
        self.exported.contains(package)
    }

    pub fn exported_packages(&self) -> impl Iterator<Item = &String> {
        self.exported.iter()
    }

    /// Drop reserved packages an artifact tries to provide
    pub fn sanitize<'a>(&self, owner: &str, packages: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        let mut kept = BTreeSet::new();
        let mut dropped = Vec::new();

        for package in packages {
            if self.is_reserved(package) {
                dropped.push(package.as_str());
            } else {
                kept.insert(package.clone());
            }
        }

        if !dropped.is_empty() {
            tracing::warn!(
                artifact = owner,
                packages = ?dropped,
                "packages are reserved by the runtime and will be ignored"
            );
        }
        kept
    }
}
