//! Test fixtures shared by the deployment tests

use crate::archive::pack_directory;
use crate::artifact::DeployableArtifact;
use crate::engine::{ArtifactEngine, NullArtifactEngine};
use crate::service::DeploymentService;
use shared::{ArtifactKind, DeploymentConfig, DeploymentError, DeploymentListener, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DeployStart(String),
    DeploySuccess(String),
    DeployFailure(String),
    UndeployStart(String),
    UndeploySuccess(String),
    UndeployFailure(String),
}

/// Records listener callbacks in the order they were fired
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl DeploymentListener for RecordingListener {
    fn on_deployment_start(&self, _kind: ArtifactKind, name: &str) {
        self.push(Event::DeployStart(name.to_string()));
    }

    fn on_deployment_success(&self, _kind: ArtifactKind, name: &str) {
        self.push(Event::DeploySuccess(name.to_string()));
    }

    fn on_deployment_failure(&self, _kind: ArtifactKind, name: &str, _error: &DeploymentError) {
        self.push(Event::DeployFailure(name.to_string()));
    }

    fn on_undeployment_start(&self, _kind: ArtifactKind, name: &str) {
        self.push(Event::UndeployStart(name.to_string()));
    }

    fn on_undeployment_success(&self, _kind: ArtifactKind, name: &str) {
        self.push(Event::UndeploySuccess(name.to_string()));
    }

    fn on_undeployment_failure(&self, _kind: ArtifactKind, name: &str, _error: &DeploymentError) {
        self.push(Event::UndeployFailure(name.to_string()));
    }
}

/// Runs a closure whenever a deployment starts
pub struct OnDeployStart<F>(pub F);

impl<F> DeploymentListener for OnDeployStart<F>
where
    F: Fn(ArtifactKind, &str) + Send + Sync,
{
    fn on_deployment_start(&self, kind: ArtifactKind, name: &str) {
        (self.0)(kind, name);
    }
}

/// Engine whose start, or stop and dispose, always fail
#[derive(Default)]
pub struct FailingEngine {
    teardown: bool,
    teardown_calls: AtomicUsize,
}

impl FailingEngine {
    /// Starts fine, fails on stop and dispose
    pub fn on_teardown() -> Self {
        Self {
            teardown: true,
            ..Default::default()
        }
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }

    fn fail(&self, artifact: &DeployableArtifact, phase: &str) -> Result<()> {
        Err(DeploymentError::Other(format!("{} of {} failed", phase, artifact.name())))
    }
}

impl ArtifactEngine for FailingEngine {
    fn start(&self, artifact: &DeployableArtifact) -> Result<()> {
        if self.teardown {
            return Ok(());
        }
        self.fail(artifact, "start")
    }

    fn stop(&self, artifact: &DeployableArtifact) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        if self.teardown {
            return self.fail(artifact, "stop");
        }
        Ok(())
    }

    fn dispose(&self, artifact: &DeployableArtifact) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        if self.teardown {
            return self.fail(artifact, "dispose");
        }
        Ok(())
    }
}

#[derive(Default)]
struct Gate {
    started: bool,
    released: bool,
}

/// Engine whose `start` suspends until `release` is called
#[derive(Default)]
pub struct BlockingEngine {
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl BlockingEngine {
    pub fn wait_until_started(&self) {
        let mut gate = self.gate.lock().unwrap();
        while !gate.started {
            let (next, timeout) = self.changed.wait_timeout(gate, Duration::from_secs(5)).unwrap();
            assert!(!timeout.timed_out(), "engine never started");
            gate = next;
        }
    }

    pub fn release(&self) {
        self.gate.lock().unwrap().released = true;
        self.changed.notify_all();
    }
}

impl ArtifactEngine for BlockingEngine {
    fn start(&self, _artifact: &DeployableArtifact) -> Result<()> {
        let mut gate = self.gate.lock().unwrap();
        gate.started = true;
        self.changed.notify_all();
        while !gate.released {
            gate = self.changed.wait(gate).unwrap();
        }
        Ok(())
    }
}

/// A deployment service over a temporary base directory
pub struct Fixture {
    pub dir: TempDir,
    pub service: Arc<DeploymentService>,
    pub listener: Arc<RecordingListener>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(|_| {}, Arc::new(NullArtifactEngine))
    }

    pub fn with_engine(engine: Arc<dyn ArtifactEngine>) -> Self {
        Self::build(|_| {}, engine)
    }

    pub fn with_config(configure: impl FnOnce(&mut DeploymentConfig)) -> Self {
        Self::build(configure, Arc::new(NullArtifactEngine))
    }

    fn build(configure: impl FnOnce(&mut DeploymentConfig), engine: Arc<dyn ArtifactEngine>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DeploymentConfig::new(dir.path());
        config.polling_interval_ms = 50;
        configure(&mut config);

        let listener = Arc::new(RecordingListener::default());
        let service = DeploymentService::builder(config)
            .with_engine(engine)
            .with_listener(listener.clone())
            .build();
        service.ensure_roots().unwrap();

        Self {
            dir,
            service: Arc::new(service),
            listener,
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, kind: ArtifactKind, name: &str, descriptor: &str) -> PathBuf {
        let dir = self.base().join(kind.root_dir()).join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(kind.descriptor_file()), descriptor).unwrap();
        dir
    }

    pub fn write_app(&self, name: &str, descriptor: &str) -> PathBuf {
        self.write(ArtifactKind::Application, name, descriptor)
    }

    pub fn write_domain(&self, name: &str, descriptor: &str) -> PathBuf {
        self.write(ArtifactKind::Domain, name, descriptor)
    }

    pub fn write_policy(&self, name: &str, descriptor: &str) -> PathBuf {
        self.write(ArtifactKind::Policy, name, descriptor)
    }

    fn pack(&self, kind: ArtifactKind, name: &str, descriptor: &str, target: &Path) -> PathBuf {
        let source = self.base().join("sources").join(name);
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join(kind.descriptor_file()), descriptor).unwrap();

        fs::create_dir_all(target).unwrap();
        let package = target.join(format!("{}.jar", name));
        pack_directory(&source, &package).unwrap();
        package
    }

    /// `apps/<name>.jar`
    pub fn package_app(&self, name: &str, descriptor: &str) -> PathBuf {
        let root = self.base().join(ArtifactKind::Application.root_dir());
        self.pack(ArtifactKind::Application, name, descriptor, &root)
    }

    /// `domains/<name>.jar`
    pub fn package_domain(&self, name: &str, descriptor: &str) -> PathBuf {
        let root = self.base().join(ArtifactKind::Domain.root_dir());
        self.pack(ArtifactKind::Domain, name, descriptor, &root)
    }

    /// A package outside of any kind root
    pub fn package_elsewhere(&self, name: &str, descriptor: &str) -> PathBuf {
        let outside = self.base().join("outside");
        self.pack(ArtifactKind::Application, name, descriptor, &outside)
    }

    /// Push the modification time of `path` strictly past anything seen so far
    pub fn touch_later(&self, path: &Path) {
        let current = fs::metadata(path).unwrap().modified().unwrap();
        let later = current.max(SystemTime::now()) + Duration::from_secs(2);
        File::options().write(true).open(path).unwrap().set_modified(later).unwrap();
    }

    pub fn events(&self) -> Vec<Event> {
        self.listener.events()
    }

    pub fn clear_events(&self) {
        self.listener.clear();
    }
}
