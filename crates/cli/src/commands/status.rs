//! hangar status command

use super::ConfigArgs;
use chrono::{DateTime, Local};
use clap::Args;
use deployment::{ArchiveDeployer, DeploymentService, DirectoryWatcher};
use lifecycle::ArtifactStatus;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Keep the anchor files written while reconciling
    #[arg(long)]
    pub keep_anchors: bool,
}

impl StatusCommand {
    pub fn run(&self, args: &ConfigArgs) -> anyhow::Result<()> {
        let config = args.load()?;
        let service = Arc::new(DeploymentService::new(config));
        let watcher = DirectoryWatcher::new(service.clone());
        watcher.startup()?;

        let report = serde_json::json!({
            "domains": deployer_report(service.domains_deployer()),
            "applications": deployer_report(service.applications_deployer()),
        });

        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_deployer("Domains", service.domains_deployer());
            print_deployer("Applications", service.applications_deployer());
        }

        watcher.stop();
        if !self.keep_anchors {
            for deployer in [service.domains_deployer(), service.applications_deployer()] {
                deployer.installer().delete_all_anchors()?;
            }
        }
        Ok(())
    }
}

fn deployer_report(deployer: &ArchiveDeployer) -> serde_json::Value {
    let artifacts: Vec<serde_json::Value> = deployer
        .entries()
        .iter()
        .map(|entry| {
            serde_json::json!({
                "name": entry.name,
                "status": entry.status,
                "domain": entry.instance.as_ref().and_then(|a| a.domain().map(str::to_string)),
            })
        })
        .collect();

    let zombies: serde_json::Map<String, serde_json::Value> = deployer
        .zombie_map()
        .into_iter()
        .map(|(name, failures)| {
            let failures: serde_json::Map<String, serde_json::Value> = failures
                .into_iter()
                .map(|(uri, at)| (uri.to_string(), serde_json::json!(DateTime::<Local>::from(at).to_rfc3339())))
                .collect();
            (name, serde_json::Value::Object(failures))
        })
        .collect();

    serde_json::json!({ "artifacts": artifacts, "zombies": zombies })
}

fn print_deployer(title: &str, deployer: &ArchiveDeployer) {
    println!("{}", console::style(title).bold());

    let entries = deployer.entries();
    if entries.is_empty() {
        println!("  (none)");
    }
    for entry in &entries {
        let status = match entry.status {
            ArtifactStatus::Started => console::style(entry.status.to_string()).green(),
            ArtifactStatus::DeploymentFailed => console::style(entry.status.to_string()).red(),
            _ => console::style(entry.status.to_string()).yellow(),
        };
        let domain = entry
            .instance
            .as_ref()
            .and_then(|a| a.domain())
            .map(|d| format!(" (domain: {})", d))
            .unwrap_or_default();
        println!("  {:<24} {}{}", entry.name, status, domain);
    }

    for (name, failures) in deployer.zombie_map() {
        for (uri, at) in failures {
            println!(
                "  {} {} failed at {} ({})",
                console::style("✗").red(),
                name,
                DateTime::<Local>::from(at).format("%Y-%m-%d %H:%M:%S"),
                uri
            );
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::DeploymentConfig;

    #[test]
    fn test_report_lists_started_and_failed_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for (name, descriptor) in [("good", "coordinate: org.test:good:1.0.0\n"), ("bad", "coordinate: [")] {
            let app = dir.path().join("apps").join(name);
            std::fs::create_dir_all(&app).unwrap();
            std::fs::write(app.join("app.yaml"), descriptor).unwrap();
        }

        let service = Arc::new(DeploymentService::new(DeploymentConfig::new(dir.path())));
        DirectoryWatcher::new(service.clone()).startup().unwrap();

        let report = deployer_report(service.applications_deployer());
        assert_eq!(report["artifacts"][0]["name"], "bad");
        assert_eq!(report["artifacts"][0]["status"], "DEPLOYMENT_FAILED");
        assert_eq!(report["artifacts"][1]["status"], "STARTED");
        assert_eq!(report["artifacts"][1]["domain"], "default");
        assert!(report["zombies"]["bad"].is_object());
    }
}
