//! PolicyManager - Policies applied to one application

use crate::chain::{PolicyChain, PolicyEvent, PolicyHandler, ProcessingResult};
use crate::parametrization::PolicyParametrization;
use isolation::IsolationGraph;
use parking_lot::RwLock;
use shared::{ArtifactDescriptor, DeploymentError, PolicyRegistrationError, VersionMismatchError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A deployed policy template: the artifact policies are instantiated from
#[derive(Debug, Clone)]
pub struct PolicyTemplate {
    pub name: String,
    pub descriptor: ArtifactDescriptor,
    pub graph: Arc<IsolationGraph>,
}

/// Builds the handler of a policy instance
pub trait PolicyHandlerFactory: Send + Sync {
    fn create(
        &self,
        template: &PolicyTemplate,
        parametrization: &PolicyParametrization,
    ) -> Result<Arc<dyn PolicyHandler>, DeploymentError>;
}

/// Default factory: the policy copies its parameters into the event
/// attributes and continues
#[derive(Debug, Clone, Default)]
pub struct ParameterPolicyFactory;

struct ParameterPolicy {
    parameters: BTreeMap<String, String>,
}

impl PolicyHandler for ParameterPolicy {
    fn handle(&self, event: PolicyEvent, next: &dyn Fn(PolicyEvent) -> ProcessingResult) -> ProcessingResult {
        let mut event = event;
        for (key, value) in &self.parameters {
            event.attributes.insert(key.clone(), value.clone());
        }
        next(event)
    }
}

impl PolicyHandlerFactory for ParameterPolicyFactory {
    fn create(
        &self,
        _template: &PolicyTemplate,
        parametrization: &PolicyParametrization,
    ) -> Result<Arc<dyn PolicyHandler>, DeploymentError> {
        Ok(Arc::new(ParameterPolicy {
            parameters: parametrization.parameters.clone(),
        }))
    }
}

/// Policies of one application
pub struct PolicyManager {
    application: String,
    graph: Arc<IsolationGraph>,
    chain: RwLock<PolicyChain>,
    factory: Arc<dyn PolicyHandlerFactory>,
}

impl PolicyManager {
    pub fn new(application: impl Into<String>, graph: Arc<IsolationGraph>) -> Self {
        Self {
            application: application.into(),
            graph,
            chain: RwLock::new(PolicyChain::new()),
            factory: Arc::new(ParameterPolicyFactory),
        }
    }

    /// Builder: set the handler factory
    pub fn with_factory(mut self, factory: Arc<dyn PolicyHandlerFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Attach a policy instance of `template`.
    ///
    /// Either the whole policy is attached or the chain is left untouched.
    pub fn add_policy(
        &self,
        template: &PolicyTemplate,
        parametrization: PolicyParametrization,
    ) -> Result<(), PolicyRegistrationError> {
        let mut chain = self.chain.write();

        if chain.contains(&parametrization.id) {
            return Err(PolicyRegistrationError::DuplicatePolicy {
                application: self.application.clone(),
                policy_id: parametrization.id,
            });
        }

        self.check_plugin_versions(template)?;

        let handler = self
            .factory
            .create(template, &parametrization)
            .map_err(|e| PolicyRegistrationError::Template {
                template: template.name.clone(),
                source: Box::new(e),
            })?;

        tracing::info!(
            application = %self.application,
            policy = %parametrization.id,
            template = %template.name,
            order = parametrization.order,
            "policy applied"
        );
        chain.insert(parametrization, handler);
        Ok(())
    }

    /// Detach a policy; `false` if it was not applied
    pub fn remove_policy(&self, policy_id: &str) -> bool {
        let removed = self.chain.write().remove(policy_id);
        if removed {
            tracing::info!(application = %self.application, policy = policy_id, "policy removed");
        }
        removed
    }

    /// Applied policy ids, in execution order
    pub fn policy_ids(&self) -> Vec<String> {
        self.chain.read().ids()
    }

    /// Run an event through the policies and then `flow`
    pub fn process(&self, event: PolicyEvent, flow: &dyn Fn(PolicyEvent) -> ProcessingResult) -> ProcessingResult {
        let chain = self.chain.read().clone();
        chain.process(event, flow)
    }

    /// A plugin the policy shares with the application (or its domain)
    /// must resolve to the very same version.
    fn check_plugin_versions(&self, template: &PolicyTemplate) -> Result<(), VersionMismatchError> {
        for plugin in template.graph.plugins() {
            let key = plugin.coordinate.key();
            if let Some(visible) = self.graph.plugin_coordinate(&key) {
                if visible.version != plugin.coordinate.version {
                    return Err(VersionMismatchError {
                        artifact: template.name.clone(),
                        dependency: key,
                        required: plugin.coordinate.version.to_string(),
                        found: visible.version.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolation::{ContainerPolicy, InMemoryRepository, IsolationResolver};
    use semver::Version;
    use shared::{ArtifactKind, BundleCoordinate, DependencyDescriptor};

    fn c(s: &str) -> BundleCoordinate {
        s.parse().unwrap()
    }

    fn resolver() -> IsolationResolver {
        let repo = InMemoryRepository::new()
            .with(DependencyDescriptor::new(c("org.p:http:1.0.0:plugin")).exporting(&["org.http"]))
            .with(DependencyDescriptor::new(c("org.p:http:1.1.0:plugin")).exporting(&["org.http"]));
        IsolationResolver::new(Arc::new(repo), ContainerPolicy::default(), Version::new(1, 0, 0))
    }

    fn manager(r: &IsolationResolver) -> PolicyManager {
        let app = ArtifactDescriptor::new("orders", ArtifactKind::Application, c("org.test:orders:1.0.0"))
            .with_plugin(c("org.p:http:1.0.0:plugin"));
        PolicyManager::new("orders", Arc::new(r.resolve(&app, None).unwrap()))
    }

    fn template(r: &IsolationResolver, http: &str) -> PolicyTemplate {
        let descriptor = ArtifactDescriptor::new("rate-limit", ArtifactKind::Policy, c("org.policies:rate-limit:1.0.0"))
            .with_plugin(c(http));
        PolicyTemplate {
            name: "rate-limit".to_string(),
            graph: Arc::new(r.resolve(&descriptor, None).unwrap()),
            descriptor,
        }
    }

    fn flow(event: PolicyEvent) -> ProcessingResult {
        Ok(event)
    }

    #[test]
    fn test_add_policy_with_matching_plugin_version() {
        let r = resolver();
        let m = manager(&r);
        m.add_policy(
            &template(&r, "org.p:http:1.0.0:plugin"),
            PolicyParametrization::new("limit").with_parameter("limit", "10"),
        )
        .unwrap();

        assert_eq!(m.policy_ids(), vec!["limit"]);
        let event = m.process(PolicyEvent::new("GET", "/"), &flow).unwrap();
        assert_eq!(event.attributes.get("limit").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_version_mismatch_leaves_chain_unchanged() {
        let r = resolver();
        let m = manager(&r);
        m.add_policy(&template(&r, "org.p:http:1.0.0:plugin"), PolicyParametrization::new("existing"))
            .unwrap();

        let err = m
            .add_policy(&template(&r, "org.p:http:1.1.0:plugin"), PolicyParametrization::new("new"))
            .unwrap_err();
        assert!(matches!(err, PolicyRegistrationError::VersionMismatch(_)));
        assert_eq!(m.policy_ids(), vec!["existing"]);
    }

    #[test]
    fn test_duplicate_policy_id() {
        let r = resolver();
        let m = manager(&r);
        let t = template(&r, "org.p:http:1.0.0:plugin");
        m.add_policy(&t, PolicyParametrization::new("p")).unwrap();
        assert!(matches!(
            m.add_policy(&t, PolicyParametrization::new("p")),
            Err(PolicyRegistrationError::DuplicatePolicy { .. })
        ));
    }

    #[test]
    fn test_failing_factory_is_reported_as_template_error() {
        struct Broken;
        impl PolicyHandlerFactory for Broken {
            fn create(&self, _: &PolicyTemplate, _: &PolicyParametrization) -> Result<Arc<dyn PolicyHandler>, DeploymentError> {
                Err(DeploymentError::Other("no handler".to_string()))
            }
        }

        let r = resolver();
        let m = manager(&r).with_factory(Arc::new(Broken));
        let err = m
            .add_policy(&template(&r, "org.p:http:1.0.0:plugin"), PolicyParametrization::new("p"))
            .unwrap_err();
        assert!(matches!(err, PolicyRegistrationError::Template { .. }));
        assert!(m.policy_ids().is_empty());
    }

    #[test]
    fn test_remove_policy() {
        let r = resolver();
        let m = manager(&r);
        m.add_policy(&template(&r, "org.p:http:1.0.0:plugin"), PolicyParametrization::new("p"))
            .unwrap();
        assert!(m.remove_policy("p"));
        assert!(!m.remove_policy("p"));
    }
}
