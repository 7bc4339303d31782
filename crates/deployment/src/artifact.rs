//! DeployableArtifact - A runnable application, domain or policy template

use isolation::{IsolationGraph, Provider};
use policy::{PolicyEvent, PolicyManager, ProcessingResult};
use shared::{ArtifactDescriptor, ArtifactKind, ArtifactServices, DeploymentProperties, SymbolNotVisibleError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An artifact wired to its isolation graph, domain and services
pub struct DeployableArtifact {
    descriptor: ArtifactDescriptor,
    location: PathBuf,
    graph: Arc<IsolationGraph>,
    domain: Option<String>,
    properties: DeploymentProperties,
    services: ArtifactServices,
    policies: Option<PolicyManager>,
}

impl DeployableArtifact {
    pub(crate) fn new(
        descriptor: ArtifactDescriptor,
        location: PathBuf,
        graph: Arc<IsolationGraph>,
        domain: Option<String>,
        properties: DeploymentProperties,
        services: ArtifactServices,
        policies: Option<PolicyManager>,
    ) -> Self {
        Self {
            descriptor,
            location,
            graph,
            domain,
            properties,
            services,
            policies,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> ArtifactKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    /// Expanded artifact directory
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn graph(&self) -> &Arc<IsolationGraph> {
        &self.graph
    }

    /// Domain the application runs in
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn properties(&self) -> &DeploymentProperties {
        &self.properties
    }

    pub fn services(&self) -> &ArtifactServices {
        &self.services
    }

    pub fn policy_manager(&self) -> Option<&PolicyManager> {
        self.policies.as_ref()
    }

    /// Resolve a class or resource as seen by the artifact's own code.
    ///
    /// Invisible symbols only fail here, at first use, never at deployment.
    pub fn lookup(&self, symbol: &str) -> Result<Provider, SymbolNotVisibleError> {
        self.graph.lookup(symbol)
    }

    /// Run an event through the applied policies, then through `flow`
    pub fn process(&self, event: PolicyEvent, flow: &dyn Fn(PolicyEvent) -> ProcessingResult) -> ProcessingResult {
        match &self.policies {
            Some(policies) => policies.process(event, flow),
            None => flow(event),
        }
    }
}

impl fmt::Debug for DeployableArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployableArtifact")
            .field("name", &self.descriptor.name)
            .field("kind", &self.descriptor.kind)
            .field("location", &self.location)
            .field("domain", &self.domain)
            .finish()
    }
}
