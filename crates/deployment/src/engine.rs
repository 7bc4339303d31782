//! ArtifactEngine - Runs whatever lives inside a deployed artifact

use crate::artifact::DeployableArtifact;
use shared::Result;

/// Start/stop/dispose callbacks of the execution engine hosted by an artifact
pub trait ArtifactEngine: Send + Sync {
    fn start(&self, _artifact: &DeployableArtifact) -> Result<()> {
        Ok(())
    }

    fn stop(&self, _artifact: &DeployableArtifact) -> Result<()> {
        Ok(())
    }

    fn dispose(&self, _artifact: &DeployableArtifact) -> Result<()> {
        Ok(())
    }
}

/// Engine that hosts nothing
#[derive(Debug, Clone, Default)]
pub struct NullArtifactEngine;

impl ArtifactEngine for NullArtifactEngine {}
