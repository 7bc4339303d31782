//! DirectoryWatcher - Polling reconciliation of the kind roots with the registries

use crate::deployer::ArchiveDeployer;
use crate::service::DeploymentService;
use lifecycle::ArtifactStatus;
use parking_lot::Mutex;
use shared::{ArtifactKind, DeploymentError, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Something the startup cycle found on disk
enum Candidate {
    Package(PathBuf),
    Directory(String),
}

impl Candidate {
    fn deploy(&self, deployer: &ArchiveDeployer) {
        let outcome = match self {
            Candidate::Package(package) => deployer.deploy_packaged(package, None).map(|_| ()),
            Candidate::Directory(name) if deployer.is_updated_zombie(name) => {
                deployer.deploy_exploded(name, None).map(|_| ())
            }
            Candidate::Directory(_) => Ok(()),
        };
        // Listeners have already been told
        if let Err(error) = outcome {
            tracing::debug!(kind = %deployer.kind(), %error, "startup deployment failed");
        }
    }
}

/// One reconciliation pass over the filesystem
#[derive(Clone)]
struct Reconciler {
    service: Arc<DeploymentService>,
}

impl Reconciler {
    fn startup(&self) -> Result<()> {
        let _guard = self.service.lock();
        self.service.ensure_roots()?;

        for deployer in [self.service.domains_deployer(), self.service.applications_deployer()] {
            let deleted = deployer.installer().delete_all_anchors()?;
            if deleted > 0 {
                tracing::debug!(kind = %deployer.kind(), deleted, "removed leftover anchors");
            }
        }

        let domains = self.service.domains_deployer();
        let (listed, unlisted) = self.startup_candidates(domains)?;
        for candidate in listed.iter().chain(unlisted.iter()) {
            candidate.deploy(domains);
        }

        let applications = self.service.applications_deployer();
        let (listed, unlisted) = self.startup_candidates(applications)?;
        for candidate in &listed {
            candidate.deploy(applications);
        }

        if self.service.config().parallel_deployment && unlisted.len() > 1 {
            // The lock stays with this thread; workers go straight to the deployer
            thread::scope(|scope| {
                for candidate in &unlisted {
                    scope.spawn(move || candidate.deploy(applications));
                }
            });
        } else {
            for candidate in &unlisted {
                candidate.deploy(applications);
            }
        }

        tracing::info!(
            domains = self.service.domains_deployer().names().len(),
            applications = self.service.applications_deployer().names().len(),
            "startup deployment finished"
        );
        Ok(())
    }

    /// Packages and directories of one kind, split into those named in the
    /// startup order (in that order) and the rest (alphabetically)
    fn startup_candidates(&self, deployer: &ArchiveDeployer) -> Result<(Vec<Candidate>, Vec<Candidate>)> {
        let installer = deployer.installer();
        let mut found: Vec<(String, Candidate)> = Vec::new();

        for package in installer.list_packages()? {
            if let Some(name) = installer.artifact_name(&package) {
                found.push((name, Candidate::Package(package)));
            }
        }
        let packaged: BTreeSet<String> = found.iter().map(|(name, _)| name.clone()).collect();
        for name in installer.list_directories()? {
            if !packaged.contains(&name) {
                found.push((name.clone(), Candidate::Directory(name)));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut listed = Vec::new();
        for wanted in &self.service.config().startup_order {
            if let Some(index) = found.iter().position(|(name, _)| name == wanted) {
                listed.push(found.remove(index).1);
            }
        }
        let unlisted = found.into_iter().map(|(_, candidate)| candidate).collect();
        Ok((listed, unlisted))
    }

    /// Run a cycle unless an operation is in progress; `false` if skipped
    fn cycle_if_idle(&self) -> bool {
        match self.service.try_lock() {
            Some(_guard) => {
                self.cycle();
                true
            }
            None => {
                tracing::trace!("deployment lock busy, skipping cycle");
                false
            }
        }
    }

    fn cycle(&self) {
        let _guard = self.service.lock();
        let applications = self.service.applications_deployer();
        let domains = self.service.domains_deployer();

        self.undeploy_removed(applications);
        self.undeploy_removed(domains);

        for name in domains.modified() {
            report(self.service.redeploy_domain(&name, None).map(|_| ()));
        }
        self.deploy_new(domains);

        for name in applications.modified() {
            report(self.service.redeploy(ArtifactKind::Application, &name, None).map(|_| ()));
        }
        self.deploy_new(applications);
    }

    /// Undeploy artifacts whose directory or anchor disappeared
    fn undeploy_removed(&self, deployer: &ArchiveDeployer) {
        let installer = deployer.installer();

        for entry in deployer.entries() {
            let dir_gone = !installer.artifact_dir(&entry.name).exists();
            let anchor_gone = matches!(entry.status, ArtifactStatus::Started | ArtifactStatus::Stopped)
                && !installer.has_anchor(&entry.name);
            if !dir_gone && !anchor_gone {
                continue;
            }

            tracing::info!(kind = %deployer.kind(), artifact = %entry.name, dir_gone, anchor_gone, "artifact removed");
            report(self.service.undeploy(deployer.kind(), &entry.name));
        }

        for name in deployer.forget_vanished_zombies() {
            tracing::debug!(kind = %deployer.kind(), artifact = %name, "forgot failed package that is gone");
        }
    }

    fn deploy_new(&self, deployer: &ArchiveDeployer) {
        let kind = deployer.kind();
        match deployer.installer().list_packages() {
            Ok(packages) => {
                for package in packages {
                    report(self.service.deploy_package(kind, &package, None).map(|_| ()));
                }
            }
            Err(error) => tracing::warn!(%kind, %error, "cannot list packages"),
        }

        match deployer.installer().list_directories() {
            Ok(names) => {
                for name in names.iter().filter(|name| deployer.is_updated_zombie(name)) {
                    report(self.service.deploy(kind, name, None).map(|_| ()));
                }
            }
            Err(error) => tracing::warn!(%kind, %error, "cannot list artifact directories"),
        }
    }
}

// One artifact never aborts the cycle; listeners carry the failure.
fn report(outcome: Result<()>) {
    match outcome {
        Ok(()) | Err(DeploymentError::NotFound(_)) => {}
        Err(error) => tracing::debug!(%error, "reconciliation step failed"),
    }
}

struct Running {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Keeps the kind roots and the deployment registries in sync.
///
/// `start` runs the startup cycle on the calling thread, then polls on a
/// background thread at the configured interval. A cycle that finds the
/// deployment lock taken is skipped.
pub struct DirectoryWatcher {
    reconciler: Reconciler,
    running: Mutex<Option<Running>>,
}

impl DirectoryWatcher {
    pub fn new(service: Arc<DeploymentService>) -> Self {
        Self {
            reconciler: Reconciler { service },
            running: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<DeploymentService> {
        &self.reconciler.service
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Deploy what is on disk, then start polling
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        self.reconciler.startup()?;

        let interval = self.reconciler.service.config().polling_interval();
        let reconciler = self.reconciler.clone();
        let (shutdown, signal) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("hangar-watcher".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        reconciler.cycle_if_idle();
                    }
                    _ => break,
                }
            })?;

        tracing::info!(interval_ms = interval.as_millis() as u64, "directory watcher started");
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Deploy what is on disk without polling afterwards
    pub fn startup(&self) -> Result<()> {
        self.reconciler.startup()
    }

    /// Run one reconciliation cycle now, waiting for the deployment lock
    pub fn reconcile(&self) {
        self.reconciler.cycle();
    }

    /// Stop polling, then stop applications and domains
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            let _ = running.shutdown.send(());
            if running.handle.join().is_err() {
                tracing::error!("directory watcher thread panicked");
            }
            tracing::info!("directory watcher stopped");
        }
        self.reconciler.service.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Fixture, OnDeployStart};
    use std::fs;
    use std::sync::Barrier;
    use std::time::{Duration, Instant};
    use url::Url;

    fn deploy_starts(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::DeployStart(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_startup_deploys_domains_first_and_clears_old_anchors() {
        let fx = Fixture::new();
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\ndomain: shared\n");
        fx.write_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        let stale = fx.service.applications_deployer().installer().anchor_path("gone");
        fs::write(&stale, "").unwrap();

        DirectoryWatcher::new(fx.service.clone()).startup().unwrap();

        assert!(!stale.exists());
        assert_eq!(deploy_starts(&fx.events()), vec!["shared", "orders"]);
        assert_eq!(
            fx.service.applications_deployer().status("orders"),
            Some(ArtifactStatus::Started)
        );
    }

    #[test]
    fn test_startup_order() {
        let fx = Fixture::with_config(|c| c.startup_order = shared::parse_startup_order("zeta:missing:alpha:zeta"));
        for name in ["beta", "alpha", "zeta", "gamma"] {
            fx.write_app(name, &format!("coordinate: org.test:{}:1.0.0\n", name));
        }

        DirectoryWatcher::new(fx.service.clone()).startup().unwrap();

        assert_eq!(deploy_starts(&fx.events()), vec!["zeta", "alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_parallel_startup_deploys_everything() {
        let fx = Fixture::with_config(|c| c.parallel_deployment = true);
        for i in 0..6 {
            fx.write_app(&format!("app-{}", i), &format!("coordinate: org.test:app-{}:1.0.0\n", i));
        }
        fx.package_app("packed", "coordinate: org.test:packed:1.0.0\n");

        DirectoryWatcher::new(fx.service.clone()).startup().unwrap();

        assert_eq!(fx.service.applications().len(), 7);
        let successes = fx
            .events()
            .iter()
            .filter(|e| matches!(e, Event::DeploySuccess(_)))
            .count();
        assert_eq!(successes, 7);
    }

    #[test]
    fn test_unchanged_artifacts_are_left_alone() {
        let fx = Fixture::new();
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\n");
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();
        fx.clear_events();

        watcher.reconcile();
        watcher.reconcile();
        assert!(fx.events().is_empty());
    }

    #[test]
    fn test_dummy_app_failure_is_zombied_then_retried_once() {
        let fx = Fixture::new();
        fx.package_app("dummy-app", "coordinate: org.test:dummy-app:1.0.0\n");
        let watcher = DirectoryWatcher::new(fx.service.clone());
        let apps = fx.service.applications_deployer().clone();

        watcher.startup().unwrap();
        assert!(fx.events().contains(&Event::DeploySuccess("dummy-app".into())));
        assert_eq!(apps.status("dummy-app"), Some(ArtifactStatus::Started));
        assert!(apps.installer().has_anchor("dummy-app"));

        let config = apps.installer().artifact_dir("dummy-app").join("app.yaml");
        fs::write(&config, "coordinate: not-a-coordinate\n").unwrap();
        fx.touch_later(&config);
        fx.clear_events();

        watcher.reconcile();
        assert!(fx.events().contains(&Event::DeployFailure("dummy-app".into())));
        assert_eq!(apps.status("dummy-app"), Some(ArtifactStatus::DeploymentFailed));
        assert!(!apps.installer().has_anchor("dummy-app"));
        let zombies = apps.zombie_map();
        assert_eq!(zombies.len(), 1);
        let uri = Url::from_file_path(apps.installer().artifact_dir("dummy-app")).unwrap();
        assert!(zombies["dummy-app"].contains_key(&uri));

        fx.clear_events();
        watcher.reconcile();
        watcher.reconcile();
        assert!(fx.events().is_empty());

        fs::write(&config, "coordinate: org.test:dummy-app:1.0.1\n").unwrap();
        fx.touch_later(&config);
        watcher.reconcile();
        watcher.reconcile();
        assert_eq!(
            fx.events(),
            vec![
                Event::UndeployStart("dummy-app".into()),
                Event::UndeploySuccess("dummy-app".into()),
                Event::DeployStart("dummy-app".into()),
                Event::DeploySuccess("dummy-app".into()),
            ]
        );
        assert!(apps.zombie_map().is_empty());
    }

    #[test]
    fn test_deleting_domain_anchor_undeploys_applications_first() {
        let fx = Fixture::new();
        fx.write_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\ndomain: shared\n");
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();
        fx.clear_events();

        fs::remove_file(fx.service.domains_deployer().installer().anchor_path("shared")).unwrap();
        watcher.reconcile();

        assert_eq!(
            fx.events(),
            vec![
                Event::UndeployStart("orders".into()),
                Event::UndeploySuccess("orders".into()),
                Event::UndeployStart("shared".into()),
                Event::UndeploySuccess("shared".into()),
            ]
        );
        assert!(fx.service.applications_deployer().names().is_empty());
        assert!(fx.service.domains_deployer().names().is_empty());
    }

    #[test]
    fn test_deleting_domain_anchor_undeploys_failed_applications_too() {
        let fx = Fixture::new();
        fx.write_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        let orders = fx.write_app(
            "orders",
            "coordinate: org.test:orders:1.0.0\ndomain: shared\nplugins:\n  - org.p:gone:1.0.0:plugin\n",
        );
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();
        let apps = fx.service.applications_deployer();
        assert_eq!(apps.status("orders"), Some(ArtifactStatus::DeploymentFailed));
        assert!(apps.is_zombie("orders"));
        fx.clear_events();

        fs::remove_file(fx.service.domains_deployer().installer().anchor_path("shared")).unwrap();
        watcher.reconcile();

        assert_eq!(
            fx.events(),
            vec![
                Event::UndeployStart("orders".into()),
                Event::UndeploySuccess("orders".into()),
                Event::UndeployStart("shared".into()),
                Event::UndeploySuccess("shared".into()),
            ]
        );
        assert!(apps.names().is_empty());
        assert!(fx.service.domains_deployer().names().is_empty());
        assert!(fx.service.zombie_map(ArtifactKind::Application).is_empty());
        assert!(!orders.exists());
    }

    #[test]
    fn test_fixed_domain_brings_its_applications_back() {
        let fx = Fixture::new();
        let domain = fx.write_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        fx.write_app("orders", "coordinate: org.test:orders:1.0.0\ndomain: shared\n");
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();
        let apps = fx.service.applications_deployer();
        let domains = fx.service.domains_deployer();

        let config = domain.join("domain.yaml");
        fs::write(&config, "coordinate: [").unwrap();
        fx.touch_later(&config);
        watcher.reconcile();
        assert_eq!(domains.status("shared"), Some(ArtifactStatus::DeploymentFailed));
        assert_eq!(apps.status("orders"), Some(ArtifactStatus::DeploymentFailed));
        assert!(apps.is_zombie("orders"));

        // Nothing changed, so nothing is retried
        fx.clear_events();
        watcher.reconcile();
        assert!(fx.events().is_empty());

        fs::write(&config, "coordinate: org.test:shared:1.0.1\n").unwrap();
        fx.touch_later(&config);
        watcher.reconcile();
        watcher.reconcile();

        assert_eq!(domains.status("shared"), Some(ArtifactStatus::Started));
        assert_eq!(apps.status("orders"), Some(ArtifactStatus::Started));
        assert_eq!(fx.service.find_application("orders").unwrap().domain(), Some("shared"));
        assert!(fx.service.zombie_map(ArtifactKind::Application).is_empty());
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
    }

    #[test]
    fn test_deleting_zombied_folder_fires_undeploy() {
        let fx = Fixture::new();
        let dir = fx.write_app("broken", "coordinate: [");
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();
        assert!(fx.service.applications_deployer().is_zombie("broken"));
        fx.clear_events();

        fs::remove_dir_all(dir).unwrap();
        watcher.reconcile();

        assert_eq!(
            fx.events(),
            vec![
                Event::UndeployStart("broken".into()),
                Event::UndeploySuccess("broken".into()),
            ]
        );
        assert!(!fx.service.applications_deployer().contains("broken"));
        assert!(fx.service.zombie_map(ArtifactKind::Application).is_empty());
    }

    #[test]
    fn test_new_package_is_picked_up_by_next_cycle() {
        let fx = Fixture::new();
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();

        fx.package_domain("shared", "coordinate: org.test:shared:1.0.0\n");
        fx.package_app("orders", "coordinate: org.test:orders:1.0.0\ndomain: shared\n");
        watcher.reconcile();

        assert!(fx.service.find_domain("shared").is_some());
        assert_eq!(fx.service.find_application("orders").unwrap().domain(), Some("shared"));
    }

    #[test]
    fn test_cycle_skipped_while_lock_is_held_elsewhere() {
        let fx = Fixture::new();
        let watcher = DirectoryWatcher::new(fx.service.clone());
        let held = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let service = fx.service.clone();
        let (h, r) = (held.clone(), release.clone());
        let holder = thread::spawn(move || {
            let _guard = service.lock();
            h.wait();
            r.wait();
        });

        held.wait();
        assert!(!watcher.reconciler.cycle_if_idle());
        release.wait();
        holder.join().unwrap();
        assert!(watcher.reconciler.cycle_if_idle());
    }

    #[test]
    fn test_operation_from_deploy_callback_waits_for_lock() {
        let fx = Fixture::new();
        fx.write_app("first", "coordinate: org.test:first:1.0.0\n");

        let (tx, rx) = mpsc::channel::<&'static str>();
        let weak = Arc::downgrade(&fx.service);
        let spawned: Arc<std::sync::Mutex<Option<JoinHandle<()>>>> = Arc::default();
        let slot = spawned.clone();
        fx.service.add_listener(Arc::new(OnDeployStart(move |_kind: ArtifactKind, name: &str| {
            let mut slot = slot.lock().unwrap();
            if name != "first" || slot.is_some() {
                return;
            }
            let service = weak.upgrade().unwrap();
            let done = tx.clone();
            *slot = Some(thread::spawn(move || {
                service.undeploy(ArtifactKind::Application, "first").unwrap();
                done.send("undeployed").unwrap();
            }));
            thread::sleep(Duration::from_millis(100));
            tx.send("callback finished").unwrap();
        })));

        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.startup().unwrap();

        let handle = spawned.lock().unwrap().take().unwrap();
        handle.join().unwrap();
        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, vec!["callback finished", "undeployed"]);

        let events = fx.events();
        let deployed = events.iter().position(|e| *e == Event::DeploySuccess("first".into())).unwrap();
        let undeploying = events.iter().position(|e| *e == Event::UndeployStart("first".into())).unwrap();
        assert!(deployed < undeploying);
        assert!(fx.service.find_application("first").is_none());
    }

    #[test]
    fn test_start_polls_and_stop_stops() {
        let fx = Fixture::new();
        let watcher = DirectoryWatcher::new(fx.service.clone());
        watcher.start().unwrap();
        assert!(watcher.is_running());

        fx.write_app("late", "coordinate: org.test:late:1.0.0\n");
        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.service.find_application("late").is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(fx.service.find_application("late").is_some());

        watcher.stop();
        assert!(!watcher.is_running());
        assert_eq!(
            fx.service.applications_deployer().status("late"),
            Some(ArtifactStatus::Stopped)
        );
    }
}
