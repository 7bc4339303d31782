//! Deployment listener protocol

use crate::descriptor::ArtifactKind;
use crate::error::DeploymentError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named services wired into an artifact, open for customization until
/// the artifact is initialised
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactServices {
    services: BTreeMap<String, String>,
}

impl ArtifactServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a service
    pub fn override_service(&mut self, name: impl Into<String>, implementation: impl Into<String>) {
        self.services.insert(name.into(), implementation.into());
    }

    pub fn remove_service(&mut self, name: &str) -> Option<String> {
        self.services.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.services.get(name).map(String::as_str)
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }
}

/// Callbacks fired by the deployment service.
///
/// Callbacks run synchronously on the thread holding the deployment lock,
/// so `start` is always observed before `success`/`failure` of the same
/// operation.
pub trait DeploymentListener: Send + Sync {
    fn on_deployment_start(&self, _kind: ArtifactKind, _name: &str) {}
    fn on_deployment_success(&self, _kind: ArtifactKind, _name: &str) {}
    fn on_deployment_failure(&self, _kind: ArtifactKind, _name: &str, _error: &DeploymentError) {}
    fn on_undeployment_start(&self, _kind: ArtifactKind, _name: &str) {}
    fn on_undeployment_success(&self, _kind: ArtifactKind, _name: &str) {}
    fn on_undeployment_failure(&self, _kind: ArtifactKind, _name: &str, _error: &DeploymentError) {}

    /// The artifact instance exists but its services are not yet final
    fn on_artifact_created(&self, _kind: ArtifactKind, _name: &str, _services: &mut ArtifactServices) {}

    /// The artifact's wiring is final and it is about to start
    fn on_artifact_initialised(&self, _kind: ArtifactKind, _name: &str, _services: &ArtifactServices) {}
}

/// No-op listener
#[derive(Debug, Clone, Default)]
pub struct NullDeploymentListener;

impl DeploymentListener for NullDeploymentListener {}

/// Listener that reports every callback through `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingDeploymentListener;

impl DeploymentListener for TracingDeploymentListener {
    fn on_deployment_start(&self, kind: ArtifactKind, name: &str) {
        tracing::info!(%kind, artifact = name, "deploying");
    }

    fn on_deployment_success(&self, kind: ArtifactKind, name: &str) {
        tracing::info!(%kind, artifact = name, "deployed");
    }

    fn on_deployment_failure(&self, kind: ArtifactKind, name: &str, error: &DeploymentError) {
        tracing::error!(%kind, artifact = name, %error, "failed to deploy");
    }

    fn on_undeployment_start(&self, kind: ArtifactKind, name: &str) {
        tracing::info!(%kind, artifact = name, "undeploying");
    }

    fn on_undeployment_success(&self, kind: ArtifactKind, name: &str) {
        tracing::info!(%kind, artifact = name, "undeployed");
    }

    fn on_undeployment_failure(&self, kind: ArtifactKind, name: &str, error: &DeploymentError) {
        tracing::error!(%kind, artifact = name, %error, "failed to undeploy");
    }
}

/// Fans every callback out to a set of listeners, in registration order
#[derive(Default)]
pub struct CompositeDeploymentListener {
    listeners: RwLock<Vec<Arc<dyn DeploymentListener>>>,
}

impl CompositeDeploymentListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn DeploymentListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener previously added (compared by pointer)
    pub fn remove(&self, listener: &Arc<dyn DeploymentListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Callbacks may add listeners, so never hold the lock while calling out.
    fn snapshot(&self) -> Vec<Arc<dyn DeploymentListener>> {
        self.listeners.read().clone()
    }
}

impl DeploymentListener for CompositeDeploymentListener {
    fn on_deployment_start(&self, kind: ArtifactKind, name: &str) {
        for l in self.snapshot() {
            l.on_deployment_start(kind, name);
        }
    }

    fn on_deployment_success(&self, kind: ArtifactKind, name: &str) {
        for l in self.snapshot() {
            l.on_deployment_success(kind, name);
        }
    }

    fn on_deployment_failure(&self, kind: ArtifactKind, name: &str, error: &DeploymentError) {
        for l in self.snapshot() {
            l.on_deployment_failure(kind, name, error);
        }
    }

    fn on_undeployment_start(&self, kind: ArtifactKind, name: &str) {
        for l in self.snapshot() {
            l.on_undeployment_start(kind, name);
        }
    }

    fn on_undeployment_success(&self, kind: ArtifactKind, name: &str) {
        for l in self.snapshot() {
            l.on_undeployment_success(kind, name);
        }
    }

    fn on_undeployment_failure(&self, kind: ArtifactKind, name: &str, error: &DeploymentError) {
        for l in self.snapshot() {
            l.on_undeployment_failure(kind, name, error);
        }
    }

    fn on_artifact_created(&self, kind: ArtifactKind, name: &str, services: &mut ArtifactServices) {
        for l in self.snapshot() {
            l.on_artifact_created(kind, name, services);
        }
    }

    fn on_artifact_initialised(&self, kind: ArtifactKind, name: &str, services: &ArtifactServices) {
        for l in self.snapshot() {
            l.on_artifact_initialised(kind, name, services);
        }
    }
}
