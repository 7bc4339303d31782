//! ArchiveDeployer - Deploy, undeploy and redeploy artifacts of one kind

use crate::archive::ArchiveInstaller;
use crate::artifact::DeployableArtifact;
use crate::engine::ArtifactEngine;
use crate::factory::ArtifactFactory;
use isolation::{IsolationGraph, DEFAULT_DOMAIN};
use lifecycle::{ArtifactRegistry, ArtifactStatus, RegistryEntry, ResourceTimestamps, ZombieEntry, ZombieTracker};
use parking_lot::Mutex;
use shared::{
    is_compatible_version, ArtifactDescriptor, ArtifactKind, BundleCoordinate, DeploymentConfig, DeploymentError,
    DeploymentListener, DeploymentProperties, MissingDependencyError, PropertiesStore, Result,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use url::Url;

/// Deploys artifacts of one kind.
///
/// Callers serialize operations through the deployment lock; the internal
/// mutexes are only ever held for short bookkeeping, never while calling
/// listeners, the factory or the engine.
pub struct ArchiveDeployer {
    kind: ArtifactKind,
    installer: ArchiveInstaller,
    factory: ArtifactFactory,
    engine: Arc<dyn ArtifactEngine>,
    listener: Arc<dyn DeploymentListener>,
    properties: PropertiesStore,
    domains: Option<Arc<ArchiveDeployer>>,
    default_domain: Arc<IsolationGraph>,
    registry: Mutex<ArtifactRegistry<DeployableArtifact>>,
    zombies: Mutex<ZombieTracker>,
}

impl ArchiveDeployer {
    pub fn new(
        config: &DeploymentConfig,
        factory: ArtifactFactory,
        engine: Arc<dyn ArtifactEngine>,
        listener: Arc<dyn DeploymentListener>,
    ) -> Self {
        let kind = factory.kind();
        let default_domain = Arc::new(factory.resolver().default_domain());
        Self {
            kind,
            installer: ArchiveInstaller::new(kind, config),
            factory,
            engine,
            listener,
            properties: PropertiesStore::new(config),
            domains: None,
            default_domain,
            registry: Mutex::new(ArtifactRegistry::new()),
            zombies: Mutex::new(ZombieTracker::new()),
        }
    }

    /// Builder: where applications look their domain up
    pub fn with_domains(mut self, domains: Arc<ArchiveDeployer>) -> Self {
        self.domains = Some(domains);
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn installer(&self) -> &ArchiveInstaller {
        &self.installer
    }

    // ----- queries -----

    pub fn find(&self, name: &str) -> Option<Arc<DeployableArtifact>> {
        self.registry.lock().instance(name)
    }

    pub fn status(&self, name: &str) -> Option<ArtifactStatus> {
        self.registry.lock().status(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.lock().contains(name)
    }

    /// Known artifact names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.registry.lock().names()
    }

    pub fn entries(&self) -> Vec<RegistryEntry<DeployableArtifact>> {
        self.registry.lock().snapshot()
    }

    /// Running instances, in registration order
    pub fn artifacts(&self) -> Vec<Arc<DeployableArtifact>> {
        self.registry
            .lock()
            .entries()
            .filter_map(|e| e.instance.clone())
            .collect()
    }

    pub fn is_zombie(&self, name: &str) -> bool {
        self.zombies.lock().is_zombie(name)
    }

    pub fn zombie_map(&self) -> BTreeMap<String, BTreeMap<Url, SystemTime>> {
        self.zombies.lock().zombie_map()
    }

    /// Whether an exploded `name` should be (re)deployed: unknown artifacts
    /// and zombies whose input changed since they failed
    pub fn is_updated_zombie(&self, name: &str) -> bool {
        let zombies = self.zombies.lock();
        match zombies.get(name) {
            Some(zombie) => zombie.updated(),
            None => !self.registry.lock().contains(name),
        }
    }

    /// Drop failures of packages that never reached the registry and whose
    /// inputs are gone
    pub fn forget_vanished_zombies(&self) -> Vec<String> {
        let mut zombies = self.zombies.lock();
        let registry = self.registry.lock();
        let vanished: Vec<String> = zombies
            .names()
            .filter(|name| !registry.contains(name))
            .filter(|name| zombies.get(name).map(|z| !z.exists()).unwrap_or(false))
            .cloned()
            .collect();
        for name in &vanished {
            zombies.clear(name);
        }
        vanished
    }

    /// Whether `package` already failed and has not changed since
    pub fn is_failed_package(&self, package: &Path) -> bool {
        let Some(name) = self.installer.artifact_name(package) else {
            return false;
        };
        self.zombies
            .lock()
            .get(&name)
            .map(|zombie| zombie.is_for(package) && !zombie.updated())
            .unwrap_or(false)
    }

    /// Started artifacts whose tracked inputs changed
    pub fn modified(&self) -> Vec<String> {
        let zombies = self.zombies.lock();
        self.registry
            .lock()
            .entries()
            .filter(|e| e.status == ArtifactStatus::Started && !zombies.is_zombie(&e.name))
            .filter(|e| {
                e.instance
                    .as_ref()
                    .map(|a| a.descriptor().redeployment_enabled)
                    .unwrap_or(false)
            })
            .filter(|e| e.resources.changed())
            .map(|e| e.name.clone())
            .collect()
    }

    /// Names of the applications that reference domain `domain`, failed
    /// ones included, in registration order
    pub fn dependents(&self, domain: &str) -> Vec<String> {
        let coordinate = self
            .domains
            .as_ref()
            .and_then(|domains| domains.find(domain))
            .map(|d| d.descriptor().coordinate.clone());

        self.registry
            .lock()
            .entries()
            .filter(|e| {
                if e.instance.as_ref().and_then(|a| a.domain()) == Some(domain) {
                    return true;
                }
                match e.domain.as_deref() {
                    Some(reference) if reference == domain => true,
                    Some(reference) => match (reference.parse::<BundleCoordinate>(), &coordinate) {
                        (Ok(required), Some(provided)) => provided.same_bundle(&required),
                        _ => false,
                    },
                    None => false,
                }
            })
            .map(|e| e.name.clone())
            .collect()
    }

    /// A started domain referenced by name or by `group:artifact:version`
    pub fn find_started(&self, reference: &str) -> Option<Arc<DeployableArtifact>> {
        let coordinate = reference.parse::<BundleCoordinate>().ok();
        self.registry
            .lock()
            .entries()
            .filter(|e| e.status == ArtifactStatus::Started)
            .filter_map(|e| e.instance.clone())
            .find(|artifact| match &coordinate {
                Some(required) => {
                    let provided = &artifact.descriptor().coordinate;
                    provided.same_bundle(required) && is_compatible_version(&required.version, &provided.version)
                }
                None => artifact.name() == reference,
            })
    }

    // ----- operations -----

    /// Deploy the package `package` found in (or copied into) the root.
    ///
    /// Returns `Ok(None)` when the package already failed and has not
    /// changed since.
    pub fn deploy_packaged(
        &self,
        package: &Path,
        properties: Option<DeploymentProperties>,
    ) -> Result<Option<Arc<DeployableArtifact>>> {
        let name = self.installer.artifact_name(package).ok_or_else(|| {
            DeploymentError::Config(format!("'{}' is not an artifact package", package.display()))
        })?;

        if self.is_failed_package(package) {
            tracing::debug!(kind = %self.kind, artifact = %name, "package already failed, skipping");
            return Ok(None);
        }

        // The stale directory goes with the install; the package itself must stay
        self.retire(&name)?;
        self.listener.on_deployment_start(self.kind, &name);

        if let Err(error) = self.installer.install(package) {
            tracing::error!(kind = %self.kind, artifact = %name, %error, "failed to install package");
            self.record_zombie(&name, package, ResourceTimestamps::capture([package]));
            self.listener.on_deployment_failure(self.kind, &name, &error);
            return Err(error);
        }

        self.finish_deploy(&name, properties).map(Some)
    }

    /// Deploy the expanded directory `name`
    pub fn deploy_exploded(
        &self,
        name: &str,
        properties: Option<DeploymentProperties>,
    ) -> Result<Arc<DeployableArtifact>> {
        if !self.installer.artifact_dir(name).is_dir() {
            return Err(DeploymentError::NotFound(name.to_string()));
        }

        self.retire(name)?;
        self.listener.on_deployment_start(self.kind, name);
        self.finish_deploy(name, properties)
    }

    /// Tear down and deploy again from the same directory.
    ///
    /// Properties not supplied are taken from the previous deployment.
    pub fn redeploy(&self, name: &str, properties: Option<DeploymentProperties>) -> Result<Arc<DeployableArtifact>> {
        if !self.contains(name) && !self.is_zombie(name) {
            return Err(DeploymentError::NotFound(name.to_string()));
        }
        tracing::info!(kind = %self.kind, artifact = name, "redeploying");
        self.deploy_exploded(name, properties)
    }

    /// Undeploy and remove the artifact from disk.
    ///
    /// A zombie whose failed inputs are all still on disk is left alone.
    pub fn undeploy(&self, name: &str) -> Result<()> {
        let zombie_exists = self.zombies.lock().get(name).map(ZombieEntry::exists);
        match zombie_exists {
            Some(true) => {
                tracing::debug!(kind = %self.kind, artifact = name, "ignoring undeploy of a failed artifact still on disk");
                return Ok(());
            }
            Some(false) => {
                self.zombies.lock().clear(name);
            }
            None => {}
        }

        if !self.contains(name) {
            return Err(DeploymentError::NotFound(name.to_string()));
        }
        self.undeploy_inner(name, true)
    }

    /// Undeploy and remove from disk, failed artifacts still on disk included
    pub fn discard(&self, name: &str) -> Result<()> {
        self.zombies.lock().clear(name);
        if !self.contains(name) {
            return Err(DeploymentError::NotFound(name.to_string()));
        }
        self.undeploy_inner(name, true)
    }

    /// Undeploy but keep the expanded directory and deployment properties
    pub fn unload(&self, name: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(DeploymentError::NotFound(name.to_string()));
        }
        self.undeploy_inner(name, false)
    }

    /// Stop and dispose every artifact, most recently registered first
    pub fn stop_all(&self) {
        let mut entries = self.entries();
        entries.reverse();
        for entry in entries {
            if let Some(artifact) = entry.instance {
                self.shutdown(&artifact, entry.status == ArtifactStatus::Started);
                self.registry.lock().force_status(&entry.name, ArtifactStatus::Stopped);
            }
        }
    }

    // ----- internals -----

    /// Clear whatever a previous deployment of `name` left behind.
    ///
    /// A zombie is forgotten with an undeploy notification pair, so clients
    /// see failed -> undeployed -> deployed like any other redeploy.
    fn retire(&self, name: &str) -> Result<()> {
        if self.zombies.lock().clear(name).is_some() {
            self.listener.on_undeployment_start(self.kind, name);
            self.registry.lock().remove(name);
            self.listener.on_undeployment_success(self.kind, name);
            return Ok(());
        }

        if self.contains(name) {
            self.undeploy_inner(name, false)?;
        }
        Ok(())
    }

    fn finish_deploy(&self, name: &str, properties: Option<DeploymentProperties>) -> Result<Arc<DeployableArtifact>> {
        match self.deploy_inner(name, properties) {
            Ok(artifact) => {
                tracing::info!(kind = %self.kind, artifact = name, "deployed");
                self.listener.on_deployment_success(self.kind, name);
                Ok(artifact)
            }
            Err(error) => {
                tracing::error!(kind = %self.kind, artifact = name, %error, "failed to deploy");
                self.listener.on_deployment_failure(self.kind, name, &error);
                Err(error)
            }
        }
    }

    fn deploy_inner(&self, name: &str, properties: Option<DeploymentProperties>) -> Result<Arc<DeployableArtifact>> {
        let location = self.installer.artifact_dir(name);
        let primary = location.join(self.kind.descriptor_file());

        {
            // Tracked before anything can fail, so a failure is never retried in a loop
            let mut registry = self.registry.lock();
            registry.register(RegistryEntry::new(name, &location));
            registry.set_status(name, ArtifactStatus::Deploying)?;
        }

        let mut tracked = vec![if primary.is_file() { primary } else { location.clone() }];
        let outcome = self.build_and_start(name, &location, properties, &mut tracked);
        let resources = ResourceTimestamps::capture(tracked);

        match outcome {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                {
                    let mut registry = self.registry.lock();
                    if let Some(entry) = registry.get_mut(name) {
                        entry.instance = Some(artifact.clone());
                        entry.resources = resources;
                    }
                    registry.set_status(name, ArtifactStatus::Started)?;
                }
                self.zombies.lock().clear(name);
                self.installer.create_anchor(name)?;
                Ok(artifact)
            }
            Err(error) => {
                {
                    let mut registry = self.registry.lock();
                    if let Some(entry) = registry.get_mut(name) {
                        entry.resources = resources.clone();
                    }
                    registry.force_status(name, ArtifactStatus::DeploymentFailed);
                }
                if error.is_zombie_worthy() {
                    self.record_zombie(name, &location, resources);
                }
                if let Err(e) = self.installer.delete_anchor(name) {
                    tracing::warn!(kind = %self.kind, artifact = name, error = %e, "could not delete anchor");
                }
                Err(error)
            }
        }
    }

    fn build_and_start(
        &self,
        name: &str,
        location: &Path,
        properties: Option<DeploymentProperties>,
        tracked: &mut Vec<PathBuf>,
    ) -> Result<DeployableArtifact> {
        let descriptor = self.factory.load_descriptor(location)?;
        tracked.extend(descriptor.config_resources.iter().map(|r| location.join(r)));
        if let Some(entry) = self.registry.lock().get_mut(name) {
            entry.domain = descriptor.domain.clone();
        }

        let properties = self.properties.resolve(self.kind, name, properties)?;
        let domain = self.resolve_domain(&descriptor)?;
        let artifact = self.factory.create(descriptor, location, domain, properties)?;

        if let Err(error) = self.engine.start(&artifact) {
            self.shutdown(&artifact, true);
            return Err(DeploymentError::LifecycleCallback {
                artifact: name.to_string(),
                phase: "start".to_string(),
                reason: error.to_string(),
            });
        }
        Ok(artifact)
    }

    fn resolve_domain(&self, descriptor: &ArtifactDescriptor) -> Result<Option<(String, Arc<IsolationGraph>)>> {
        if self.kind != ArtifactKind::Application {
            return Ok(None);
        }

        match descriptor.domain.as_deref() {
            None | Some(DEFAULT_DOMAIN) => Ok(Some((DEFAULT_DOMAIN.to_string(), self.default_domain.clone()))),
            Some(reference) => self
                .domains
                .as_ref()
                .and_then(|domains| domains.find_started(reference))
                .map(|domain| Some((domain.name().to_string(), domain.graph().clone())))
                .ok_or_else(|| {
                    MissingDependencyError {
                        artifact: descriptor.name.clone(),
                        dependency: reference.to_string(),
                        reason: "domain is not deployed or not started".to_string(),
                    }
                    .into()
                }),
        }
    }

    fn record_zombie(&self, name: &str, location: &Path, resources: ResourceTimestamps) {
        if !resources.all_exist() {
            return;
        }
        match ZombieEntry::at(location, resources) {
            Some(entry) => self.zombies.lock().record(name, entry),
            None => tracing::debug!(kind = %self.kind, artifact = name, "cannot mark as zombie"),
        }
    }

    /// Best-effort stop and dispose; callback failures are logged once and swallowed
    fn shutdown(&self, artifact: &DeployableArtifact, running: bool) {
        if running {
            if let Err(error) = self.engine.stop(artifact) {
                tracing::warn!(kind = %self.kind, artifact = artifact.name(), %error, "stop callback failed");
            }
        }
        if let Err(error) = self.engine.dispose(artifact) {
            tracing::warn!(kind = %self.kind, artifact = artifact.name(), %error, "dispose callback failed");
        }
    }

    fn undeploy_inner(&self, name: &str, remove_files: bool) -> Result<()> {
        tracing::info!(kind = %self.kind, artifact = name, "request to undeploy");
        self.zombies.lock().clear(name);
        self.listener.on_undeployment_start(self.kind, name);

        let entry = self.registry.lock().get(name).cloned();
        if let Some(entry) = entry {
            if let Some(artifact) = &entry.instance {
                self.shutdown(artifact, entry.status == ArtifactStatus::Started);
            }
            let mut registry = self.registry.lock();
            registry.force_status(name, ArtifactStatus::Stopped);
            registry.force_status(name, ArtifactStatus::Destroyed);
            registry.remove(name);
        }

        let cleanup = if remove_files {
            self.installer
                .uninstall(name)
                .and_then(|_| self.properties.remove(self.kind, name))
        } else {
            self.installer.delete_anchor(name).map(|_| ())
        };

        match cleanup {
            Ok(()) => {
                tracing::info!(kind = %self.kind, artifact = name, "undeployed");
                self.listener.on_undeployment_success(self.kind, name);
                Ok(())
            }
            Err(error) => {
                tracing::error!(kind = %self.kind, artifact = name, %error, "failed to undeploy");
                self.listener.on_undeployment_failure(self.kind, name, &error);
                Err(error)
            }
        }
    }
}
