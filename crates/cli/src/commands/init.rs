//! hangar init command

use super::{ConfigArgs, CONFIG_FILE};
use clap::Args;
use shared::{ArtifactKind, DeploymentConfig, REPOSITORY_DIR};
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct InitCommand {
    /// Directory to initialize
    #[arg(default_value = ".")]
    pub directory: PathBuf,

    /// Create the directory layout only, without the example application
    #[arg(long)]
    pub minimal: bool,
}

impl InitCommand {
    pub fn run(&self, _args: &ConfigArgs) -> anyhow::Result<()> {
        println!("Initializing Hangar base directory in {:?}", self.directory);

        for kind in [ArtifactKind::Domain, ArtifactKind::Application, ArtifactKind::Policy] {
            std::fs::create_dir_all(self.directory.join(kind.root_dir()))?;
        }
        std::fs::create_dir_all(self.directory.join(REPOSITORY_DIR))?;

        let config_path = self.directory.join(CONFIG_FILE);
        if !config_path.exists() {
            let config = DeploymentConfig::new(".");
            std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
        }

        if !self.minimal {
            self.create_example_application(&self.directory)?;
        }

        println!("{} Hangar base directory initialized", console::style("✓").green());
        Ok(())
    }

    fn create_example_application(&self, base: &Path) -> anyhow::Result<()> {
        let app_dir = base.join(ArtifactKind::Application.root_dir()).join("hello");
        std::fs::create_dir_all(&app_dir)?;
        std::fs::write(
            app_dir.join(ArtifactKind::Application.descriptor_file()),
            r#"coordinate: org.example:hello:1.0.0
exportedPackages:
  - org.example.hello.api
localPackages:
  - org.example.hello.internal
"#,
        )?;
        Ok(())
    }
}
