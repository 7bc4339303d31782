//! DeploymentService - Serialized facade over the domain and application deployers

use crate::archive::ArchiveInstaller;
use crate::artifact::DeployableArtifact;
use crate::deployer::ArchiveDeployer;
use crate::engine::{ArtifactEngine, NullArtifactEngine};
use crate::factory::ArtifactFactory;
use isolation::{DependencyRepository, IsolationResolver, LocalRepository};
use lifecycle::ArtifactStatus;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use policy::{ParameterPolicyFactory, PolicyHandlerFactory, PolicyParametrization, PolicyTemplate};
use shared::{
    ArtifactKind, CompositeDeploymentListener, DeploymentConfig, DeploymentError, DeploymentListener,
    DeploymentProperties, DescriptorLoader, PolicyRegistrationError, Result, YamlDescriptorLoader,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use url::Url;

/// Assembles a `DeploymentService`
pub struct DeploymentServiceBuilder {
    config: DeploymentConfig,
    repository: Option<Arc<dyn DependencyRepository>>,
    engine: Arc<dyn ArtifactEngine>,
    loader: Arc<dyn DescriptorLoader>,
    policy_handlers: Arc<dyn PolicyHandlerFactory>,
    listeners: Vec<Arc<dyn DeploymentListener>>,
}

impl DeploymentServiceBuilder {
    pub fn new(config: DeploymentConfig) -> Self {
        Self {
            config,
            repository: None,
            engine: Arc::new(NullArtifactEngine),
            loader: Arc::new(YamlDescriptorLoader),
            policy_handlers: Arc::new(ParameterPolicyFactory),
            listeners: Vec::new(),
        }
    }

    /// Builder: dependency source (defaults to the local `repository/` directory)
    pub fn with_repository(mut self, repository: Arc<dyn DependencyRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Builder: engine hosted by deployed artifacts
    pub fn with_engine(mut self, engine: Arc<dyn ArtifactEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_descriptor_loader(mut self, loader: Arc<dyn DescriptorLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_policy_handlers(mut self, factory: Arc<dyn PolicyHandlerFactory>) -> Self {
        self.policy_handlers = factory;
        self
    }

    /// Builder: register a listener before anything is deployed
    pub fn with_listener(mut self, listener: Arc<dyn DeploymentListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> DeploymentService {
        let config = self.config;
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(LocalRepository::new(config.repository_dir())));
        let resolver = Arc::new(IsolationResolver::from_config(&config, repository));

        let listeners = Arc::new(CompositeDeploymentListener::new());
        for listener in self.listeners {
            listeners.add(listener);
        }
        let listener: Arc<dyn DeploymentListener> = listeners.clone();

        let factory = |kind| {
            ArtifactFactory::new(
                kind,
                self.loader.clone(),
                resolver.clone(),
                listener.clone(),
                self.policy_handlers.clone(),
            )
        };

        let domains = Arc::new(ArchiveDeployer::new(
            &config,
            factory(ArtifactKind::Domain),
            self.engine.clone(),
            listener.clone(),
        ));
        let applications = Arc::new(
            ArchiveDeployer::new(
                &config,
                factory(ArtifactKind::Application),
                self.engine.clone(),
                listener.clone(),
            )
            .with_domains(domains.clone()),
        );

        DeploymentService {
            policy_installer: ArchiveInstaller::new(ArtifactKind::Policy, &config),
            policy_factory: factory(ArtifactKind::Policy),
            config,
            lock: ReentrantMutex::new(()),
            listeners,
            domains,
            applications,
            templates: Mutex::new(BTreeMap::new()),
        }
    }
}

/// Entry point for every deploy, undeploy and redeploy.
///
/// Operations from the watcher and from clients are serialized through one
/// re-entrant lock. Callers can hold `lock()` across several operations to
/// make them atomic with respect to the watcher.
pub struct DeploymentService {
    /// Configuration
    config: DeploymentConfig,
    /// Deployment lock
    lock: ReentrantMutex<()>,
    /// Registered listeners
    listeners: Arc<CompositeDeploymentListener>,
    domains: Arc<ArchiveDeployer>,
    applications: Arc<ArchiveDeployer>,
    /// Where policy templates are expanded
    policy_installer: ArchiveInstaller,
    policy_factory: ArtifactFactory,
    /// Policy templates loaded so far
    templates: Mutex<BTreeMap<String, PolicyTemplate>>,
}

impl DeploymentService {
    pub fn new(config: DeploymentConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: DeploymentConfig) -> DeploymentServiceBuilder {
        DeploymentServiceBuilder::new(config)
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Acquire the deployment lock, blocking while another operation runs
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Acquire the deployment lock only if nobody else holds it
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.lock.try_lock()
    }

    pub fn applications_deployer(&self) -> &Arc<ArchiveDeployer> {
        &self.applications
    }

    pub fn domains_deployer(&self) -> &Arc<ArchiveDeployer> {
        &self.domains
    }

    fn deployer(&self, kind: ArtifactKind) -> Result<&Arc<ArchiveDeployer>> {
        match kind {
            ArtifactKind::Application => Ok(&self.applications),
            ArtifactKind::Domain => Ok(&self.domains),
            ArtifactKind::Policy => Err(DeploymentError::Config(
                "policy templates are applied to applications, not deployed".to_string(),
            )),
        }
    }

    /// Create the kind roots if missing
    pub fn ensure_roots(&self) -> Result<()> {
        self.domains.installer().ensure_root()?;
        self.applications.installer().ensure_root()?;
        self.policy_installer.ensure_root()
    }

    // ----- deploy / undeploy / redeploy -----

    /// Deploy the expanded artifact `name`
    pub fn deploy(
        &self,
        kind: ArtifactKind,
        name: &str,
        properties: Option<DeploymentProperties>,
    ) -> Result<Arc<DeployableArtifact>> {
        let _guard = self.lock();
        match kind {
            ArtifactKind::Domain => self.with_dependents(name, || self.domains.deploy_exploded(name, properties)),
            _ => self.deployer(kind)?.deploy_exploded(name, properties),
        }
    }

    /// Deploy a package sitting in the kind root
    pub fn deploy_package(
        &self,
        kind: ArtifactKind,
        package: &Path,
        properties: Option<DeploymentProperties>,
    ) -> Result<Option<Arc<DeployableArtifact>>> {
        let _guard = self.lock();
        let deployer = self.deployer(kind)?;
        match deployer.installer().artifact_name(package) {
            Some(name) if kind == ArtifactKind::Domain && !deployer.is_failed_package(package) => {
                self.with_dependents(&name, || deployer.deploy_packaged(package, properties))
            }
            _ => deployer.deploy_packaged(package, properties),
        }
    }

    /// Copy the package at `uri` into the kind root and deploy it
    pub fn deploy_from(
        &self,
        kind: ArtifactKind,
        uri: &Url,
        properties: Option<DeploymentProperties>,
    ) -> Result<Arc<DeployableArtifact>> {
        let source = uri
            .to_file_path()
            .map_err(|_| DeploymentError::Config(format!("'{}' is not a local file URI", uri)))?;

        let _guard = self.lock();
        let deployer = self.deployer(kind)?;
        let package = deployer.installer().copy_in(&source)?;
        let name = deployer.installer().artifact_name(&package).unwrap_or_default();

        self.deploy_package(kind, &package, properties)?
            .ok_or_else(|| DeploymentError::Other(format!("'{}' already failed and has not changed", name)))
    }

    /// Undeploy `name` and remove it from disk. Undeploying a domain first
    /// undeploys every application running in it.
    pub fn undeploy(&self, kind: ArtifactKind, name: &str) -> Result<()> {
        match kind {
            ArtifactKind::Domain => self.undeploy_domain(name),
            _ => {
                let _guard = self.lock();
                self.deployer(kind)?.undeploy(name)
            }
        }
    }

    pub fn redeploy(
        &self,
        kind: ArtifactKind,
        name: &str,
        properties: Option<DeploymentProperties>,
    ) -> Result<Arc<DeployableArtifact>> {
        match kind {
            ArtifactKind::Domain => self.redeploy_domain(name, properties),
            _ => {
                let _guard = self.lock();
                self.deployer(kind)?.redeploy(name, properties)
            }
        }
    }

    /// Undeploy the applications of `name`, in registration order, then the domain
    pub fn undeploy_domain(&self, name: &str) -> Result<()> {
        let _guard = self.lock();

        for application in self.applications.dependents(name) {
            if let Err(error) = self.applications.discard(&application) {
                tracing::warn!(domain = name, application = %application, %error, "failed to undeploy dependent application");
            }
        }
        self.domains.undeploy(name)
    }

    /// Redeploy a domain and every application that references it
    pub fn redeploy_domain(
        &self,
        name: &str,
        properties: Option<DeploymentProperties>,
    ) -> Result<Arc<DeployableArtifact>> {
        let _guard = self.lock();
        self.with_dependents(name, || self.domains.redeploy(name, properties))
    }

    /// Run `deploy` for domain `name` between unloading its applications
    /// (keeping their files) and deploying them again.
    ///
    /// Applications come back whether or not the domain did; failed ones
    /// are retried too, since their domain is what failed them.
    fn with_dependents<T>(&self, name: &str, deploy: impl FnOnce() -> Result<T>) -> Result<T> {
        let dependents = self.applications.dependents(name);
        for application in &dependents {
            if let Err(error) = self.applications.unload(application) {
                tracing::warn!(domain = name, application = %application, %error, "failed to unload dependent application");
            }
        }

        let domain = deploy();

        for application in &dependents {
            // Listeners already carry the failure
            if let Err(error) = self.applications.deploy_exploded(application, None) {
                tracing::debug!(domain = name, application = %application, %error, "dependent application failed to deploy");
            }
        }
        domain
    }

    /// Stop every application, then every domain
    pub fn stop_all(&self) {
        let _guard = self.lock();
        self.applications.stop_all();
        self.domains.stop_all();
    }

    // ----- policies -----

    /// Apply a policy instance of `template` to a started application
    pub fn add_policy(
        &self,
        application: &str,
        template: &str,
        parametrization: PolicyParametrization,
    ) -> std::result::Result<(), PolicyRegistrationError> {
        let _guard = self.lock();

        let artifact = self
            .applications
            .find(application)
            .filter(|_| self.applications.status(application) == Some(ArtifactStatus::Started))
            .ok_or_else(|| PolicyRegistrationError::ApplicationNotStarted(application.to_string()))?;
        let manager = artifact
            .policy_manager()
            .ok_or_else(|| PolicyRegistrationError::ApplicationNotStarted(application.to_string()))?;

        let template = self
            .policy_template(template)
            .map_err(|e| PolicyRegistrationError::Template {
                template: template.to_string(),
                source: Box::new(e),
            })?;
        manager.add_policy(&template, parametrization)
    }

    /// Detach a policy; `false` if the application or the policy is unknown
    pub fn remove_policy(&self, application: &str, policy_id: &str) -> bool {
        let _guard = self.lock();
        self.applications
            .find(application)
            .and_then(|a| a.policy_manager().map(|m| m.remove_policy(policy_id)))
            .unwrap_or(false)
    }

    /// Load a policy template from `policies/<name>`, expanding
    /// `policies/<name>.jar` first if needed
    pub fn policy_template(&self, name: &str) -> Result<PolicyTemplate> {
        if let Some(template) = self.templates.lock().get(name) {
            return Ok(template.clone());
        }

        let location = self.policy_installer.artifact_dir(name);
        if !location.is_dir() {
            let package = self.policy_installer.package_path(name);
            if !package.is_file() {
                return Err(DeploymentError::NotFound(name.to_string()));
            }
            self.policy_installer.install(&package)?;
        }

        let template = self.policy_factory.create_template(&location)?;
        tracing::info!(template = name, "policy template loaded");
        self.templates.lock().insert(name.to_string(), template.clone());
        Ok(template)
    }

    // ----- lookups -----

    pub fn find_application(&self, name: &str) -> Option<Arc<DeployableArtifact>> {
        self.applications.find(name)
    }

    pub fn find_domain(&self, name: &str) -> Option<Arc<DeployableArtifact>> {
        self.domains.find(name)
    }

    pub fn applications(&self) -> Vec<Arc<DeployableArtifact>> {
        self.applications.artifacts()
    }

    pub fn domains(&self) -> Vec<Arc<DeployableArtifact>> {
        self.domains.artifacts()
    }

    /// `name -> (uri -> timestamp)` of the failed artifacts of `kind`
    pub fn zombie_map(&self, kind: ArtifactKind) -> BTreeMap<String, BTreeMap<Url, SystemTime>> {
        match self.deployer(kind) {
            Ok(deployer) => deployer.zombie_map(),
            Err(_) => BTreeMap::new(),
        }
    }

    // ----- listeners -----

    pub fn add_listener(&self, listener: Arc<dyn DeploymentListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DeploymentListener>) {
        self.listeners.remove(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BlockingEngine, Event, Fixture};
    use policy::PolicyEvent;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_undeploy_domain_cascades_in_registration_order() {
        let fx = Fixture::new();
        fx.write_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        fx.write_app("b-app", "coordinate: org.test:b-app:1.0.0\ndomain: shared\n");
        fx.write_app("a-app", "coordinate: org.test:a-app:1.0.0\ndomain: shared\n");
        fx.write_app("loner", "coordinate: org.test:loner:1.0.0\n");

        fx.service.deploy(ArtifactKind::Domain, "shared", None).unwrap();
        fx.service.deploy(ArtifactKind::Application, "b-app", None).unwrap();
        fx.service.deploy(ArtifactKind::Application, "a-app", None).unwrap();
        fx.service.deploy(ArtifactKind::Application, "loner", None).unwrap();
        fx.clear_events();

        fx.service.undeploy(ArtifactKind::Domain, "shared").unwrap();

        let undeployed: Vec<_> = fx
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::UndeploySuccess(name) => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(undeployed, vec!["b-app", "a-app", "shared"]);
        assert!(fx.service.find_domain("shared").is_none());
        assert!(fx.service.find_application("loner").is_some());
        assert_eq!(fx.service.applications().len(), 1);
    }

    #[test]
    fn test_redeploy_domain_redeploys_applications() {
        let fx = Fixture::new();
        fx.write_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\ndomain: shared\n");
        fx.service.deploy(ArtifactKind::Domain, "shared", None).unwrap();
        fx.service.deploy(ArtifactKind::Application, "orders", None).unwrap();
        fx.clear_events();

        fx.service.redeploy(ArtifactKind::Domain, "shared", None).unwrap();

        assert_eq!(
            fx.events(),
            vec![
                Event::UndeployStart("orders".into()),
                Event::UndeploySuccess("orders".into()),
                Event::UndeployStart("shared".into()),
                Event::UndeploySuccess("shared".into()),
                Event::DeployStart("shared".into()),
                Event::DeploySuccess("shared".into()),
                Event::DeployStart("orders".into()),
                Event::DeploySuccess("orders".into()),
            ]
        );
        assert!(fx.service.applications_deployer().installer().artifact_dir("orders").is_dir());
    }

    #[test]
    fn test_deploy_from_uri() {
        let fx = Fixture::new();
        let package = fx.package_elsewhere("orders", "coordinate: org.test:orders:1.0.0\n");
        let uri = Url::from_file_path(&package).unwrap();

        let artifact = fx
            .service
            .deploy_from(
                ArtifactKind::Application,
                &uri,
                Some(DeploymentProperties::new().with("env", "test")),
            )
            .unwrap();

        assert_eq!(artifact.name(), "orders");
        assert_eq!(artifact.properties().get("env"), Some("test"));
        assert!(package.exists());
        assert!(fx.service.applications_deployer().installer().has_anchor("orders"));
    }

    #[test]
    fn test_policy_kind_is_not_deployable() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.service.deploy(ArtifactKind::Policy, "rate-limit", None),
            Err(DeploymentError::Config(_))
        ));
        assert!(fx.service.zombie_map(ArtifactKind::Policy).is_empty());
    }

    #[test]
    fn test_add_policy_through_service() {
        let fx = Fixture::new();
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\n");
        fx.write_policy("rate-limit", "coordinate: org.test:rate-limit:1.0.0\n");

        let missing = fx
            .service
            .add_policy("orders", "rate-limit", PolicyParametrization::new("p1"));
        assert!(matches!(missing, Err(PolicyRegistrationError::ApplicationNotStarted(_))));

        fx.service.deploy(ArtifactKind::Application, "orders", None).unwrap();
        fx.service
            .add_policy(
                "orders",
                "rate-limit",
                PolicyParametrization::new("p1").with_parameter("limit", "10"),
            )
            .unwrap();

        let unknown = fx
            .service
            .add_policy("orders", "no-such-template", PolicyParametrization::new("p2"));
        assert!(matches!(unknown, Err(PolicyRegistrationError::Template { .. })));

        let app = fx.service.find_application("orders").unwrap();
        let seen = app.process(PolicyEvent::new("GET", "/orders"), &|e| Ok(e)).unwrap();
        assert_eq!(seen.attributes.get("limit").map(String::as_str), Some("10"));
        assert_eq!(seen.trail, vec!["p1"]);

        assert!(fx.service.remove_policy("orders", "p1"));
        assert!(!fx.service.remove_policy("orders", "p1"));
    }

    #[test]
    fn test_second_operation_blocks_while_deploy_in_progress() {
        let engine = Arc::new(BlockingEngine::default());
        let fx = Fixture::with_engine(engine.clone());
        fx.write_app("slow", "coordinate: org.test:slow:1.0.0\n");
        fx.write_app("other", "coordinate: org.test:other:1.0.0\n");
        let service = fx.service.clone();

        let first = thread::spawn(move || service.deploy(ArtifactKind::Application, "slow", None).map(|_| ()));
        engine.wait_until_started();

        let (done_tx, done_rx) = mpsc::channel();
        let service = fx.service.clone();
        let second = thread::spawn(move || {
            let result = service.deploy(ArtifactKind::Application, "other", None).map(|_| ());
            done_tx.send(()).unwrap();
            result
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        engine.release();

        first.join().unwrap().unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        second.join().unwrap().unwrap();

        let events = fx.events();
        let slow_done = events.iter().position(|e| *e == Event::DeploySuccess("slow".into())).unwrap();
        let other_start = events.iter().position(|e| *e == Event::DeployStart("other".into())).unwrap();
        assert!(slow_done < other_start);
    }

    #[test]
    fn test_lock_is_reentrant() {
        let fx = Fixture::new();
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\n");

        let _guard = fx.service.lock();
        fx.service.deploy(ArtifactKind::Application, "orders", None).unwrap();
        fx.service.undeploy(ArtifactKind::Application, "orders").unwrap();
        assert!(fx.service.find_application("orders").is_none());
    }
}
