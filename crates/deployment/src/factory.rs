//! ArtifactFactory - Descriptor and isolation graph to runnable artifact

use crate::artifact::DeployableArtifact;
use isolation::{IsolationGraph, IsolationResolver};
use policy::{PolicyHandlerFactory, PolicyManager, PolicyTemplate};
use shared::{
    ArtifactDescriptor, ArtifactKind, ArtifactServices, DeploymentListener, DeploymentProperties, DescriptorLoader,
    Result,
};
use std::path::Path;
use std::sync::Arc;

/// Services every artifact starts with; listeners may replace them
const DEFAULT_SERVICES: &[(&str, &str)] = &[
    ("scheduler", "default-scheduler"),
    ("lock-provider", "default-lock-provider"),
    ("object-store", "default-object-store"),
];

/// Builds artifacts of one kind
pub struct ArtifactFactory {
    kind: ArtifactKind,
    loader: Arc<dyn DescriptorLoader>,
    resolver: Arc<IsolationResolver>,
    listener: Arc<dyn DeploymentListener>,
    policy_handlers: Arc<dyn PolicyHandlerFactory>,
}

impl ArtifactFactory {
    pub fn new(
        kind: ArtifactKind,
        loader: Arc<dyn DescriptorLoader>,
        resolver: Arc<IsolationResolver>,
        listener: Arc<dyn DeploymentListener>,
        policy_handlers: Arc<dyn PolicyHandlerFactory>,
    ) -> Self {
        Self {
            kind,
            loader,
            resolver,
            listener,
            policy_handlers,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn resolver(&self) -> &Arc<IsolationResolver> {
        &self.resolver
    }

    pub fn load_descriptor(&self, location: &Path) -> Result<ArtifactDescriptor> {
        Ok(self.loader.load(location, self.kind)?)
    }

    /// Resolve and wire an artifact.
    ///
    /// `domain` is the name and graph of the domain an application runs in.
    pub fn create(
        &self,
        descriptor: ArtifactDescriptor,
        location: &Path,
        domain: Option<(String, Arc<IsolationGraph>)>,
        properties: DeploymentProperties,
    ) -> Result<DeployableArtifact> {
        let graph = Arc::new(
            self.resolver
                .resolve(&descriptor, domain.as_ref().map(|(_, graph)| graph.as_ref()))?,
        );
        let name = descriptor.name.clone();

        let mut services = ArtifactServices::new();
        for (service, implementation) in DEFAULT_SERVICES {
            services.override_service(*service, *implementation);
        }
        self.listener.on_artifact_created(self.kind, &name, &mut services);

        let policies = (self.kind == ArtifactKind::Application).then(|| {
            PolicyManager::new(name.clone(), graph.clone()).with_factory(self.policy_handlers.clone())
        });

        let artifact = DeployableArtifact::new(
            descriptor,
            location.to_path_buf(),
            graph,
            domain.map(|(name, _)| name),
            properties,
            services,
            policies,
        );

        self.listener.on_artifact_initialised(self.kind, &name, artifact.services());
        tracing::debug!(kind = %self.kind, artifact = %name, "artifact created");
        Ok(artifact)
    }

    /// Load and resolve a policy template
    pub fn create_template(&self, location: &Path) -> Result<PolicyTemplate> {
        let descriptor = self.loader.load(location, ArtifactKind::Policy)?;
        let graph = self.resolver.resolve(&descriptor, None)?;
        Ok(PolicyTemplate {
            name: descriptor.name.clone(),
            descriptor,
            graph: Arc::new(graph),
        })
    }
}
