//! CLI Commands

pub mod init;
pub mod resolve;
pub mod start;
pub mod status;

pub use init::InitCommand;
pub use resolve::ResolveCommand;
pub use start::StartCommand;
pub use status::StatusCommand;

use anyhow::Context;
use clap::Args;
use shared::DeploymentConfig;
use std::path::PathBuf;

/// Default configuration file, relative to the base directory
pub const CONFIG_FILE: &str = "hangar.json";

/// Options shared by every command
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Base directory holding apps/, domains/, policies/ and repository/
    #[arg(short, long, global = true, env = "HANGAR_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Configuration file (YAML or JSON); defaults to <base-dir>/hangar.json if present
    #[arg(short, long, global = true, env = "HANGAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

impl ConfigArgs {
    /// File, then environment, then flags
    pub fn load(&self) -> anyhow::Result<DeploymentConfig> {
        let base_dir = self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let file = self
            .config
            .clone()
            .or_else(|| Some(base_dir.join(CONFIG_FILE)).filter(|p| p.is_file()));

        let mut config = match file {
            Some(path) => DeploymentConfig::from_file(&path)
                .with_context(|| format!("cannot load configuration from {}", path.display()))?,
            None => DeploymentConfig::new(&base_dir),
        };
        config.apply_env()?;
        if self.base_dir.is_some() || self.config.is_none() {
            config.base_dir = base_dir;
        }
        Ok(config)
    }
}
