//! hangar start command

use super::ConfigArgs;
use clap::Args;
use deployment::{DeploymentService, DirectoryWatcher};
use shared::{parse_startup_order, TracingDeploymentListener};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct StartCommand {
    /// Polling interval in milliseconds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Deploy applications concurrently on startup
    #[arg(long)]
    pub parallel: bool,

    /// Colon-delimited list of artifacts deployed first, in order
    #[arg(long)]
    pub startup_order: Option<String>,
}

impl StartCommand {
    pub fn run(&self, args: &ConfigArgs) -> anyhow::Result<()> {
        let mut config = args.load()?;
        if let Some(interval) = self.interval {
            config.polling_interval_ms = interval;
        }
        if self.parallel {
            config.parallel_deployment = true;
        }
        if let Some(order) = &self.startup_order {
            config.startup_order = parse_startup_order(order);
        }

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async move {
            let service = Arc::new(
                DeploymentService::builder(config)
                    .with_listener(Arc::new(TracingDeploymentListener))
                    .build(),
            );
            let watcher = Arc::new(DirectoryWatcher::new(service.clone()));

            let starting = watcher.clone();
            tokio::task::spawn_blocking(move || starting.start()).await??;

            println!(
                "{} {} domain(s), {} application(s) deployed; watching {}",
                console::style("✓").green(),
                service.domains().len(),
                service.applications().len(),
                service.config().base_dir.display()
            );
            println!("Press Ctrl+C to stop");

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            tokio::task::spawn_blocking(move || watcher.stop()).await?;

            println!("{} stopped", console::style("✓").green());
            Ok::<(), anyhow::Error>(())
        })
    }
}
